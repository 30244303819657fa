//! Overlap resolver (spec.md §4.7): subtracts large overlaps between
//! different-location segments, then re-segments each location's remaining
//! days with the final minimum length `d`.

use crate::segment::{find_segment, DayMap, Segment, SegmentMap};

/// For each location's segments, subtracts the intersection with any single
/// other-location segment that overlaps it by more than `min_overlap` days,
/// then re-runs the §4.4 segment builder on the surviving day set with
/// minimum length `d` (typically `num_stayed_days_migrant`).
pub fn change_overlap_segment(segments: &SegmentMap, min_overlap: usize, d: usize) -> SegmentMap {
    let mut changed_days = DayMap::new();

    for (&loc, loc_segments) in segments {
        let mut loc_changed_days = Vec::new();
        for &current in loc_segments {
            let mut surviving: Vec<bool> = vec![true; current.len()];
            for (&other_loc, other_segments) in segments {
                if other_loc == loc {
                    continue;
                }
                for &other in other_segments {
                    if intersection_len(current, other) > min_overlap {
                        mark_overlap_removed(current, other, &mut surviving);
                    }
                }
            }
            loc_changed_days.extend(
                (current.start..=current.end)
                    .zip(surviving)
                    .filter_map(|(day, keep)| keep.then_some(day)),
            );
        }
        if !loc_changed_days.is_empty() {
            loc_changed_days.sort_unstable();
            changed_days.insert(loc, loc_changed_days);
        }
    }

    find_segment(&changed_days, d)
}

fn intersection_len(a: Segment, b: Segment) -> usize {
    let lo = a.start.max(b.start);
    let hi = a.end.min(b.end);
    if lo > hi { 0 } else { hi - lo + 1 }
}

fn mark_overlap_removed(current: Segment, other: Segment, surviving: &mut [bool]) {
    let lo = current.start.max(other.start);
    let hi = current.end.min(other.end);
    if lo > hi {
        return;
    }
    for day in lo..=hi {
        surviving[day - current.start] = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtracts_large_overlap_from_both_sides() {
        let mut segs = SegmentMap::new();
        segs.insert(1, vec![Segment::new(0, 120)]);
        segs.insert(2, vec![Segment::new(100, 260)]);
        let resolved = change_overlap_segment(&segs, 0, 30);
        assert_eq!(resolved[&1], vec![Segment::new(0, 99)]);
        assert_eq!(resolved[&2], vec![Segment::new(121, 260)]);
    }

    #[test]
    fn small_overlap_within_tolerance_is_kept() {
        let mut segs = SegmentMap::new();
        segs.insert(1, vec![Segment::new(0, 100)]);
        segs.insert(2, vec![Segment::new(95, 200)]);
        // min_overlap=10 tolerates the 6-day overlap [95,100].
        let resolved = change_overlap_segment(&segs, 10, 30);
        assert_eq!(resolved[&1], vec![Segment::new(0, 100)]);
        assert_eq!(resolved[&2], vec![Segment::new(95, 200)]);
    }

    #[test]
    fn segments_shorter_than_d_after_subtraction_are_dropped() {
        let mut segs = SegmentMap::new();
        segs.insert(1, vec![Segment::new(0, 20)]);
        segs.insert(2, vec![Segment::new(15, 200)]);
        // Location 1 loses [15,20], leaving [0,14] (len 15) < d=30.
        let resolved = change_overlap_segment(&segs, 0, 30);
        assert!(!resolved.contains_key(&1));
    }
}
