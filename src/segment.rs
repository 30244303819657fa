//! Segment type plus the gap filler, segment builder and density filter
//! (spec.md §3 "Segment", §4.3, §4.4, §4.5).

use std::collections::BTreeMap;

use crate::record::{Location, ObservationSet};

/// A closed day-index interval `[start, end]` associated (implicitly, via
/// the map it lives in) with a single location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Segment {
    pub start: usize,
    pub end: usize,
}

impl Segment {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// `e - s + 1`.
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, day: usize) -> bool {
        self.start <= day && day <= self.end
    }

    pub fn intersects(&self, other: &Segment) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// `location -> sorted day indices`, the shape shared by `O_u` and `F_u`.
pub type DayMap = BTreeMap<Location, Vec<usize>>;

/// `location -> ordered list of disjoint segments` (`S_u` in spec.md §3).
pub type SegmentMap = BTreeMap<Location, Vec<Segment>>;

/// §4.3 gap filler. For each location independently, fills every gap of
/// length `2..=k` days with the days in between. Independence across
/// locations means overlaps created here are *not* checked against other
/// locations — that happens later (§4.6, §4.7).
///
/// Idempotent: `fill_missing_day(fill_missing_day(x, k), k) == fill_missing_day(x, k)`.
/// Monotone in `k`: a larger `k` only ever fills more days.
pub fn fill_missing_day(obs: &ObservationSet, k: i64) -> DayMap {
    let mut result = DayMap::new();
    for (loc, days) in obs.iter() {
        let mut filled: Vec<usize> = days.to_vec();
        for pair in days.windows(2) {
            let (d0, d1) = (pair[0] as i64, pair[1] as i64);
            let gap = d1 - d0;
            if gap > 1 && gap <= k {
                filled.extend((d0 + 1)..d1);
            }
        }
        filled.sort_unstable();
        filled.dedup();
        result.insert(loc, filled);
    }
    result
}

/// §4.4 segment builder. Per location with at least `k` filled days, groups
/// maximal runs of consecutive day indices and keeps those whose length is
/// `>= k`. Both the initial and final runs are length-gated the same as any
/// interior run. Output segments are strictly disjoint and in ascending
/// order.
pub fn find_segment(filled: &DayMap, k: usize) -> SegmentMap {
    let mut result = SegmentMap::new();
    for (&loc, days) in filled {
        if days.len() < k || k == 0 {
            continue;
        }
        let mut segments = Vec::new();
        let mut run_start = days[0];
        let mut prev = days[0];
        for &day in &days[1..] {
            if day != prev + 1 {
                push_if_long_enough(&mut segments, run_start, prev, k);
                run_start = day;
            }
            prev = day;
        }
        push_if_long_enough(&mut segments, run_start, prev, k);
        if !segments.is_empty() {
            result.insert(loc, segments);
        }
    }
    result
}

fn push_if_long_enough(segments: &mut Vec<Segment>, start: usize, end: usize, k: usize) {
    if end - start + 1 >= k {
        segments.push(Segment::new(start, end));
    }
}

/// §4.5 density filter. Keeps a segment `[s, e]` of location `L` iff the
/// count of *originally observed* (pre-fill) days of `L` within `[s, e]` is
/// `>= prop * (e - s + 1)`. Locations left with no surviving segment are
/// dropped from the map. Filtering location subsets independently gives the
/// same kept segments as filtering the whole map at once, since each
/// location's segments are judged purely against that location's own
/// original days.
pub fn filter_seg_appear_prop(original: &ObservationSet, segments: &SegmentMap, prop: f64) -> SegmentMap {
    let mut result = SegmentMap::new();
    for (&loc, segs) in segments {
        let days = original.days(loc);
        let kept: Vec<Segment> = segs
            .iter()
            .copied()
            .filter(|seg| {
                let appear = count_in_range(days, seg.start, seg.end);
                (appear as f64) >= prop * (seg.len() as f64)
            })
            .collect();
        if !kept.is_empty() {
            result.insert(loc, kept);
        }
    }
    result
}

/// Counts entries of a sorted slice within `[lo, hi]` via binary search.
pub fn count_in_range(sorted_days: &[usize], lo: usize, hi: usize) -> usize {
    let start = sorted_days.partition_point(|&d| d < lo);
    let end = sorted_days.partition_point(|&d| d <= hi);
    end - start
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::CalendarIndex;
    use crate::record::{build_records, DailyObservation};

    fn observation_set(user: &str, days: &[usize], loc: Location) -> ObservationSet {
        let cal = CalendarIndex::from_yyyymmdd(20200101..=20221231).unwrap();
        let obs = days
            .iter()
            .map(|&d| DailyObservation {
                user_id: user.into(),
                date: cal.date_at(d),
                location: loc,
            })
            .collect::<Vec<_>>();
        build_records(obs, &cal).unwrap().remove(user).unwrap()
    }

    #[test]
    fn fills_short_gaps_but_not_long_ones() {
        let mut days: Vec<usize> = (0..=50).collect();
        days.extend(55..=80); // gap of 4 between 50 and 55
        let obs = observation_set("u", &days, 1);
        let filled = fill_missing_day(&obs, 7);
        let loc_days = &filled[&1];
        assert!(loc_days.contains(&51) && loc_days.contains(&54));
        assert_eq!(loc_days.len(), 81); // 0..=80 fully contiguous
    }

    #[test]
    fn gap_of_one_is_already_consecutive_noop() {
        let obs = observation_set("u", &[0, 1, 2, 3], 1);
        let filled = fill_missing_day(&obs, 7);
        assert_eq!(filled[&1], vec![0, 1, 2, 3]);
    }

    #[test]
    fn gap_filler_is_idempotent_and_monotone() {
        let mut days: Vec<usize> = (0..=10).collect();
        days.extend(15..=20);
        let obs = observation_set("u", &days, 1);
        let once = fill_missing_day(&obs, 7);
        // Re-running on an observation set built from `once` should be a no-op.
        let obs2 = observation_set("u", &once[&1], 1);
        let twice = fill_missing_day(&obs2, 7);
        assert_eq!(once, twice);

        let filled_small_k = fill_missing_day(&obs, 3);
        let filled_large_k = fill_missing_day(&obs, 10);
        assert!(filled_small_k[&1].len() <= filled_large_k[&1].len());
    }

    #[test]
    fn segment_builder_keeps_runs_at_least_k_long() {
        let mut days = DayMap::new();
        days.insert(1, (0..=99).collect());
        let segs = find_segment(&days, 30);
        assert_eq!(segs[&1], vec![Segment::new(0, 99)]);

        let mut short = DayMap::new();
        short.insert(1, (0..=10).collect());
        assert!(find_segment(&short, 30).is_empty());
    }

    #[test]
    fn density_filter_drops_scattered_segment() {
        let obs = observation_set("u", &[0, 10, 20, 30, 40, 50, 60, 70, 80, 90], 1);
        let mut segs = SegmentMap::new();
        segs.insert(1, vec![Segment::new(0, 99)]);
        let filtered = filter_seg_appear_prop(&obs, &segs, 0.6);
        assert!(filtered.is_empty());
    }

    #[test]
    fn density_filter_keeps_dense_segment() {
        let obs = observation_set("u", &(0..=99).collect::<Vec<_>>(), 1);
        let mut segs = SegmentMap::new();
        segs.insert(1, vec![Segment::new(0, 99)]);
        let filtered = filter_seg_appear_prop(&obs, &segs, 0.6);
        assert_eq!(filtered[&1], vec![Segment::new(0, 99)]);
    }
}
