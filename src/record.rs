//! Per-user record builder (spec.md §4.2): turns raw `(user_id, date,
//! location)` rows into, for each user, a `location -> sorted day indices`
//! map (an `ObservationSet` / `O_u` in spec.md §3's notation).

use std::collections::BTreeMap;

use crate::calendar::CalendarIndex;
use crate::error::{MigratraceError, Result};

pub type Location = i64;

/// `O_u`: per-user, immutable mapping `location -> sorted day indices`.
/// Invariant: each day index appears under at most one location.
#[derive(Debug, Clone, Default)]
pub struct ObservationSet {
    by_location: BTreeMap<Location, Vec<usize>>,
}

impl ObservationSet {
    pub fn locations(&self) -> impl Iterator<Item = Location> + '_ {
        self.by_location.keys().copied()
    }

    pub fn days(&self, location: Location) -> &[usize] {
        self.by_location
            .get(&location)
            .map_or(&[], Vec::as_slice)
    }

    pub fn location_count(&self) -> usize {
        self.by_location.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Location, &[usize])> {
        self.by_location.iter().map(|(&loc, days)| (loc, days.as_slice()))
    }
}

/// One input row: `(user_id, date as YYYYMMDD, location)`.
#[derive(Debug, Clone)]
pub struct DailyObservation {
    pub user_id: String,
    pub date: i64,
    pub location: Location,
}

/// Builds one `ObservationSet` per user from raw daily observations.
///
/// Duplicates of the same `(user_id, date, location)` triple are coalesced;
/// a `(user_id, date)` pair observed at two *different* locations is an
/// input violation and rejected with `DuplicateDay`.
pub fn build_records(
    observations: impl IntoIterator<Item = DailyObservation>,
    calendar: &CalendarIndex,
) -> Result<BTreeMap<String, ObservationSet>> {
    let mut seen_date: BTreeMap<(String, i64), Location> = BTreeMap::new();
    let mut raw: BTreeMap<String, BTreeMap<Location, Vec<usize>>> = BTreeMap::new();

    for obs in observations {
        let day = calendar.index_of(obs.date)?;
        let key = (obs.user_id.clone(), obs.date);
        match seen_date.get(&key) {
            Some(&existing) if existing != obs.location => {
                return Err(MigratraceError::DuplicateDay {
                    user_id: obs.user_id,
                    date: obs.date,
                });
            }
            Some(_) => continue, // exact duplicate row, coalesce silently
            None => {
                seen_date.insert(key, obs.location);
            }
        }
        let days = raw
            .entry(obs.user_id)
            .or_default()
            .entry(obs.location)
            .or_default();
        days.push(day);
    }

    let mut result = BTreeMap::new();
    for (user_id, mut by_location) in raw {
        for days in by_location.values_mut() {
            days.sort_unstable();
            days.dedup();
        }
        result.insert(user_id, ObservationSet { by_location });
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cal() -> CalendarIndex {
        CalendarIndex::from_yyyymmdd(20200101..=20200110).unwrap()
    }

    #[test]
    fn groups_by_user_and_location() {
        let cal = cal();
        let obs = vec![
            DailyObservation { user_id: "a".into(), date: 20200101, location: 1 },
            DailyObservation { user_id: "a".into(), date: 20200102, location: 1 },
            DailyObservation { user_id: "a".into(), date: 20200103, location: 2 },
            DailyObservation { user_id: "b".into(), date: 20200101, location: 9 },
        ];
        let records = build_records(obs, &cal).unwrap();
        assert_eq!(records.len(), 2);
        let a = &records["a"];
        assert_eq!(a.days(1), &[0, 1]);
        assert_eq!(a.days(2), &[2]);
        assert_eq!(records["b"].days(9), &[0]);
    }

    #[test]
    fn duplicate_row_on_same_location_is_coalesced() {
        let cal = cal();
        let obs = vec![
            DailyObservation { user_id: "a".into(), date: 20200101, location: 1 },
            DailyObservation { user_id: "a".into(), date: 20200101, location: 1 },
        ];
        let records = build_records(obs, &cal).unwrap();
        assert_eq!(records["a"].days(1), &[0]);
    }

    #[test]
    fn conflicting_location_on_same_date_is_rejected() {
        let cal = cal();
        let obs = vec![
            DailyObservation { user_id: "a".into(), date: 20200101, location: 1 },
            DailyObservation { user_id: "a".into(), date: 20200101, location: 2 },
        ];
        let err = build_records(obs, &cal).unwrap_err();
        assert!(matches!(err, MigratraceError::DuplicateDay { .. }));
    }
}
