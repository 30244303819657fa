//! Calendar index: a bijection between `YYYYMMDD` calendar dates and dense
//! day indices `0..D` (spec.md §3, §4.1).

use chrono::{Duration, NaiveDate};
use std::collections::HashMap;

use crate::constants::{DATE_FORMAT, LONG_INDEX_PADDING_DAYS};
use crate::error::{MigratraceError, Result};

/// Dense `date <-> day index` mapping over a closed `[min, max]` range, plus
/// a "long" extension of the index used by downstream consumers that need
/// room past the observed range (spec.md §3).
#[derive(Debug, Clone)]
pub struct CalendarIndex {
    dates: Vec<NaiveDate>,
    index: HashMap<NaiveDate, usize>,
    long_len: usize,
}

impl CalendarIndex {
    /// Builds the index over every calendar date in `[min, max]` inclusive.
    /// Fails with `EmptyRange` if `min > max`.
    pub fn new(min: NaiveDate, max: NaiveDate) -> Result<Self> {
        if min > max {
            return Err(MigratraceError::EmptyRange);
        }
        let span = (max - min).num_days();
        let dates: Vec<NaiveDate> = (0..=span).map(|d| min + Duration::days(d)).collect();
        let index = dates
            .iter()
            .enumerate()
            .map(|(i, &date)| (date, i))
            .collect();
        let long_len = dates.len() + LONG_INDEX_PADDING_DAYS as usize;
        Ok(Self {
            dates,
            index,
            long_len,
        })
    }

    /// Builds the index from an iterator of `YYYYMMDD` integers.
    pub fn from_yyyymmdd<I: IntoIterator<Item = i64>>(dates: I) -> Result<Self> {
        let mut min = None;
        let mut max = None;
        let mut any = false;
        for raw in dates {
            any = true;
            let date = parse_yyyymmdd(raw)?;
            min = Some(min.map_or(date, |m: NaiveDate| m.min(date)));
            max = Some(max.map_or(date, |m: NaiveDate| m.max(date)));
        }
        if !any {
            return Err(MigratraceError::EmptyRange);
        }
        Self::new(min.unwrap(), max.unwrap())
    }

    /// Number of days in the closed input range.
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Length of the long index (`len() + padding`).
    pub fn long_len(&self) -> usize {
        self.long_len
    }

    /// Day index for a `YYYYMMDD` date, if it falls in the closed range.
    pub fn index_of(&self, date: i64) -> Result<usize> {
        let date = parse_yyyymmdd(date)?;
        self.index
            .get(&date)
            .copied()
            .ok_or_else(|| MigratraceError::InvalidParameter {
                message: format!("date {date} is outside the calendar index range"),
            })
    }

    /// `YYYYMMDD` date for a day index, including indices in the long range
    /// past `len()` (used only for display; those dates are synthesized).
    pub fn date_at(&self, day: usize) -> i64 {
        let date = if day < self.dates.len() {
            self.dates[day]
        } else {
            self.dates[0] + Duration::days(day as i64)
        };
        format_yyyymmdd(date)
    }
}

fn parse_yyyymmdd(raw: i64) -> Result<NaiveDate> {
    let text = raw.to_string();
    NaiveDate::parse_from_str(&text, DATE_FORMAT).map_err(|_| MigratraceError::InvalidParameter {
        message: format!("date {raw} is not a valid YYYYMMDD date"),
    })
}

fn format_yyyymmdd(date: NaiveDate) -> i64 {
    date.format(DATE_FORMAT).to_string().parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_dense_index_over_range() {
        let idx = CalendarIndex::from_yyyymmdd([20200101, 20200103, 20200102]).unwrap();
        assert_eq!(idx.len(), 3);
        assert_eq!(idx.index_of(20200101).unwrap(), 0);
        assert_eq!(idx.index_of(20200102).unwrap(), 1);
        assert_eq!(idx.index_of(20200103).unwrap(), 2);
        assert_eq!(idx.date_at(0), 20200101);
        assert_eq!(idx.long_len(), 3 + super::LONG_INDEX_PADDING_DAYS as usize);
    }

    #[test]
    fn empty_input_is_an_error() {
        let idx = CalendarIndex::from_yyyymmdd(std::iter::empty());
        assert!(matches!(idx, Err(MigratraceError::EmptyRange)));
    }

    #[test]
    fn rejects_malformed_date() {
        let idx = CalendarIndex::from_yyyymmdd([20200101, 20201301]);
        assert!(matches!(
            idx,
            Err(MigratraceError::InvalidParameter { .. })
        ));
    }
}
