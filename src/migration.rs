//! Migration detector, change-point estimator, and post-filter/output join
//! (spec.md §4.8–§4.11).

use crate::calendar::CalendarIndex;
use crate::record::{Location, ObservationSet};
use crate::segment::{Segment, SegmentMap};

/// One `(home, destination)` pairing surviving §4.8, before the change-point
/// estimate and the `max_gap_home_des` post-filter.
#[derive(Debug, Clone, Copy)]
pub struct MigrationCandidate {
    pub home_loc: Location,
    pub dest_loc: Location,
    pub home_seg: Segment,
    pub dest_seg: Segment,
}

/// §4.8. Users with 0 or 1 surviving locations yield no candidates. Segments
/// are flattened and sorted by `(start, end, location)`; each entry pairs
/// with the *first* later segment (by scan order) in a different location
/// whose start is within `K` days of overlap with the current segment's end.
/// Each starting index yields at most one candidate, so a user's migrations
/// can form overlapping chains (spec.md §9 open question, resolved: allowed).
pub fn find_migration_by_segment(segments: &SegmentMap, overlap_tolerance: i64) -> Vec<MigrationCandidate> {
    if segments.len() <= 1 {
        return Vec::new();
    }

    let mut flat: Vec<(Location, Segment)> = segments
        .iter()
        .flat_map(|(&loc, segs)| segs.iter().map(move |&seg| (loc, seg)))
        .collect();
    flat.sort_by(|a, b| {
        a.1.start
            .cmp(&b.1.start)
            .then(a.1.end.cmp(&b.1.end))
            .then(a.0.cmp(&b.0))
    });

    let mut candidates = Vec::new();
    for i in 0..flat.len() {
        let (home_loc, home_seg) = flat[i];
        for &(dest_loc, dest_seg) in &flat[i + 1..] {
            if dest_loc == home_loc {
                continue;
            }
            if dest_seg.start as i64 - home_seg.end as i64 >= -overlap_tolerance + 1 {
                candidates.push(MigrationCandidate {
                    home_loc,
                    dest_loc,
                    home_seg,
                    dest_seg,
                });
                break;
            }
        }
    }
    candidates
}

/// §4.9. Picks the day in `[home_end, dest_start]` minimizing misclassified
/// residual observations, taking the *latest* day on a tie.
pub fn find_migration_day(
    home_days_between: &[usize],
    dest_days_between: &[usize],
    home_end: usize,
    dest_start: usize,
) -> (usize, usize) {
    let mut best_day = home_end;
    let mut best_err = usize::MAX;
    for m in home_end..=dest_start {
        let err_before = dest_days_between.iter().filter(|&&d| d < m).count();
        let err_after = home_days_between.iter().filter(|&&d| d > m).count();
        let err = err_before + err_after;
        if err <= best_err {
            best_err = err;
            best_day = m;
        }
    }
    (best_day, best_err)
}

fn days_between(days: &[usize], lo: usize, hi: usize) -> Vec<usize> {
    days.iter().copied().filter(|&d| d >= lo && d <= hi).collect()
}

/// A fully-resolved migration event, ready for CSV output (spec.md §4.10).
#[derive(Debug, Clone)]
pub struct MigrationEvent {
    pub user_id: String,
    pub home_loc: Location,
    pub dest_loc: Location,
    pub home_seg: Segment,
    pub dest_seg: Segment,
    pub migration_day: usize,
    pub num_error_day: usize,
    pub uncertainty: i64,
}

impl MigrationEvent {
    pub fn migration_date(&self, calendar: &CalendarIndex) -> i64 {
        calendar.date_at(self.migration_day)
    }
    pub fn home_start_date(&self, calendar: &CalendarIndex) -> i64 {
        calendar.date_at(self.home_seg.start)
    }
    pub fn home_end_date(&self, calendar: &CalendarIndex) -> i64 {
        calendar.date_at(self.home_seg.end)
    }
    pub fn destination_start_date(&self, calendar: &CalendarIndex) -> i64 {
        calendar.date_at(self.dest_seg.start)
    }
    pub fn destination_end_date(&self, calendar: &CalendarIndex) -> i64 {
        calendar.date_at(self.dest_seg.end)
    }
}

/// Resolves a candidate into a `MigrationEvent` via §4.9, then applies the
/// §4.10 `max_gap_home_des` post-filter. Returns `None` if the gap between
/// home and destination exceeds `max_gap_home_des`.
pub fn resolve_candidate(
    user_id: &str,
    candidate: MigrationCandidate,
    observations: &ObservationSet,
    max_gap_home_des: i64,
) -> Option<MigrationEvent> {
    let home_end = candidate.home_seg.end;
    let dest_start = candidate.dest_seg.start;
    let home_between = days_between(observations.days(candidate.home_loc), home_end, dest_start);
    let dest_between = days_between(observations.days(candidate.dest_loc), home_end, dest_start);
    let (migration_day, num_error_day) =
        find_migration_day(&home_between, &dest_between, home_end, dest_start);

    let gap = dest_start as i64 - home_end as i64;
    if gap > max_gap_home_des {
        return None;
    }

    Some(MigrationEvent {
        user_id: user_id.to_string(),
        home_loc: candidate.home_loc,
        dest_loc: candidate.dest_loc,
        home_seg: candidate.home_seg,
        dest_seg: candidate.dest_seg,
        migration_day,
        num_error_day,
        uncertainty: gap - 1,
    })
}

/// §4.11 short-term displacement filter.
pub fn is_short_term(event: &MigrationEvent, hmin: usize, hmax: usize, dmin: usize, dmax: usize) -> bool {
    let home_len = event.home_seg.len();
    let dest_len = event.dest_seg.len();
    (hmin..=hmax).contains(&home_len) && (dmin..=dmax).contains(&dest_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segs(map: &[(Location, &[(usize, usize)])]) -> SegmentMap {
        map.iter()
            .map(|&(loc, ranges)| {
                (
                    loc,
                    ranges.iter().map(|&(s, e)| Segment::new(s, e)).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn single_location_has_no_candidates() {
        let segments = segs(&[(1, &[(0, 99)])]);
        assert!(find_migration_by_segment(&segments, 1).is_empty());
    }

    #[test]
    fn pairs_home_with_first_later_other_location() {
        let segments = segs(&[(1, &[(0, 99)]), (2, &[(120, 259)])]);
        let candidates = find_migration_by_segment(&segments, 1);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].home_loc, 1);
        assert_eq!(candidates[0].dest_loc, 2);
    }

    #[test]
    fn change_point_picks_latest_day_on_tie() {
        // Clean migration: no observations in the gap, all error counts 0.
        let (day, err) = find_migration_day(&[], &[], 99, 120);
        assert_eq!(day, 120);
        assert_eq!(err, 0);
    }

    #[test]
    fn change_point_with_noise_scenario() {
        // home A on [0,99] with extra obs at 100; dest B on [106,205] with extra obs at 103.
        let home_between = vec![100];
        let dest_between = vec![103];
        let (day, err) = find_migration_day(&home_between, &dest_between, 99, 106);
        assert_eq!(day, 106);
        assert_eq!(err, 0);
    }

    #[test]
    fn uncertainty_and_gap_post_filter() {
        let segments = segs(&[(1, &[(0, 99)]), (2, &[(120, 259)])]);
        let candidates = find_migration_by_segment(&segments, 1);
        let obs = ObservationSet::default();
        let event = resolve_candidate("u", candidates[0], &obs, 30).unwrap();
        assert_eq!(event.uncertainty, 20);
        assert_eq!(event.migration_day, 120);

        let too_far = resolve_candidate("u", candidates[0], &obs, 15);
        assert!(too_far.is_none());
    }
}
