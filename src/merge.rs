//! Segment merger (spec.md §4.6): joins adjacent same-location segments
//! whenever no other-location segment occupies the gap between them.

use std::collections::BTreeSet;

use crate::segment::{Segment, SegmentMap};

/// If the user has only one location in `segments`, they are not a migrant
/// candidate and an empty map is returned. Otherwise each location is walked
/// left-to-right, extending a running segment across any gap that no other
/// location's segment covers.
pub fn join_segment_if_no_gap(segments: &SegmentMap) -> SegmentMap {
    if segments.len() <= 1 {
        return SegmentMap::new();
    }

    let mut result = SegmentMap::new();
    for (&loc, loc_segments) in segments {
        let other_days = other_locations_day_set(segments, loc);
        result.insert(loc, merge_one_location(loc_segments, &other_days));
    }
    result
}

fn other_locations_day_set(segments: &SegmentMap, exclude: i64) -> BTreeSet<usize> {
    let mut days = BTreeSet::new();
    for (&loc, segs) in segments {
        if loc == exclude {
            continue;
        }
        for seg in segs {
            days.extend(seg.start..=seg.end);
        }
    }
    days
}

fn merge_one_location(segments: &[Segment], other_days: &BTreeSet<usize>) -> Vec<Segment> {
    let mut merged = Vec::new();
    let mut iter = segments.iter().copied();
    let Some(mut current) = iter.next() else {
        return merged;
    };

    for next in iter {
        // Open interval (current.end, next.start): does any other-location day fall in it?
        let gap_is_clear = !(current.end + 1..next.start).any(|day| other_days.contains(&day));
        if gap_is_clear {
            current = Segment::new(current.start, next.end);
        } else {
            merged.push(current);
            current = next;
        }
    }
    merged.push(current);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_location_is_not_a_migrant_candidate() {
        let mut segs = SegmentMap::new();
        segs.insert(1, vec![Segment::new(0, 99)]);
        assert!(join_segment_if_no_gap(&segs).is_empty());
    }

    #[test]
    fn merges_across_clear_gap() {
        let mut segs = SegmentMap::new();
        segs.insert(1, vec![Segment::new(0, 10), Segment::new(15, 20)]);
        segs.insert(2, vec![Segment::new(100, 110)]);
        let merged = join_segment_if_no_gap(&segs);
        assert_eq!(merged[&1], vec![Segment::new(0, 20)]);
    }

    #[test]
    fn does_not_merge_when_other_location_occupies_gap() {
        let mut segs = SegmentMap::new();
        segs.insert(1, vec![Segment::new(0, 10), Segment::new(15, 20)]);
        segs.insert(2, vec![Segment::new(12, 12)]);
        let merged = join_segment_if_no_gap(&segs);
        assert_eq!(merged[&1], vec![Segment::new(0, 10), Segment::new(15, 20)]);
    }
}
