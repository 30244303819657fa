//! Per-user pipeline driver (spec.md §4): wires the gap filler, segment
//! builder, density filter, merger, overlap resolver and migration detector
//! into the full 8-stage transformation, run over all users in parallel.

use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::merge::join_segment_if_no_gap;
use crate::migration::{find_migration_by_segment, is_short_term, resolve_candidate, MigrationEvent};
use crate::overlap::change_overlap_segment;
use crate::record::ObservationSet;
use crate::segment::{fill_missing_day, filter_seg_appear_prop, find_segment, SegmentMap};

/// A checkpoint in the per-user segment refinement chain `S¹..S⁴` (spec.md
/// §3), used to let the `segments` debug CLI command dump an intermediate
/// stage instead of always the final overlap-resolved one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// `S²`, after the §4.5 density filter.
    Density,
    /// `S³`, after the §4.6 segment merger.
    Merged,
    /// `S⁴`, after the §4.7 overlap resolver.
    Resolved,
}

/// Runs §4.3–§4.7 for one user, stopping at the requested checkpoint.
pub fn stage_segments(obs: &ObservationSet, cfg: &PipelineConfig, stage: Stage) -> SegmentMap {
    let filled = fill_missing_day(obs, cfg.num_days_missing_gap);
    let segments = find_segment(&filled, cfg.small_seg_len);
    let dense = filter_seg_appear_prop(obs, &segments, cfg.seg_prop);
    if stage == Stage::Density {
        return dense;
    }
    let merged = join_segment_if_no_gap(&dense);
    if stage == Stage::Merged {
        return merged;
    }
    change_overlap_segment(&merged, cfg.min_overlap_part_len, cfg.num_stayed_days_migrant)
}

fn events_from_resolved(user_id: &str, obs: &ObservationSet, cfg: &PipelineConfig, resolved: &SegmentMap) -> Vec<MigrationEvent> {
    let candidates = find_migration_by_segment(resolved, cfg.min_overlap_part_len as i64);
    candidates
        .into_iter()
        .filter_map(|candidate| resolve_candidate(user_id, candidate, obs, cfg.max_gap_home_des))
        .collect()
}

/// Runs §4.3–§4.10 for a single user and returns their surviving migration
/// events. Never fails: any stage that leaves no segments simply yields no
/// events for this user.
pub fn process_user(user_id: &str, obs: &ObservationSet, cfg: &PipelineConfig) -> Vec<MigrationEvent> {
    let resolved = stage_segments(obs, cfg, Stage::Resolved);
    events_from_resolved(user_id, obs, cfg, &resolved)
}

/// Runs the full pipeline over every user in `records`, in parallel.
/// Per-user panics can't happen (stages are pure, total functions), so every
/// user contributes whatever events they produce, in no particular cross-user
/// order; callers that need deterministic output must sort the result.
pub fn run_all(records: &BTreeMap<String, ObservationSet>, cfg: &PipelineConfig) -> Vec<MigrationEvent> {
    records
        .par_iter()
        .flat_map(|(user_id, obs)| process_user(user_id, obs, cfg))
        .collect()
}

/// Applies the optional §4.11 short-term displacement filter.
pub fn filter_short_term(
    events: Vec<MigrationEvent>,
    hmin: usize,
    hmax: usize,
    dmin: usize,
    dmax: usize,
) -> Vec<MigrationEvent> {
    events
        .into_iter()
        .filter(|event| is_short_term(event, hmin, hmax, dmin, dmax))
        .collect()
}

/// Sorts events into the deterministic output order: by `(user_id,
/// home_seg.start, dest_seg.start)`.
pub fn sort_events(mut events: Vec<MigrationEvent>) -> Vec<MigrationEvent> {
    events.sort_by(|a, b| {
        a.user_id
            .cmp(&b.user_id)
            .then(a.home_seg.start.cmp(&b.home_seg.start))
            .then(a.dest_seg.start.cmp(&b.dest_seg.start))
    });
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::CalendarIndex;
    use crate::record::{build_records, DailyObservation};

    fn obs_for(user: &str, days_a: &[i64], days_b: &[i64]) -> (BTreeMap<String, ObservationSet>, CalendarIndex) {
        let cal = CalendarIndex::from_yyyymmdd(20200101..=20221231).unwrap();
        let mut rows = Vec::new();
        for &d in days_a {
            rows.push(DailyObservation { user_id: user.into(), date: cal.date_at(d as usize), location: 1 });
        }
        for &d in days_b {
            rows.push(DailyObservation { user_id: user.into(), date: cal.date_at(d as usize), location: 2 });
        }
        (build_records(rows, &cal).unwrap(), cal)
    }

    #[test]
    fn end_to_end_clean_migration_scenario() {
        let days_a: Vec<i64> = (0..=99).collect();
        let days_b: Vec<i64> = (120..=259).collect();
        let (records, _cal) = obs_for("u1", &days_a, &days_b);
        let cfg = PipelineConfig::default();
        let events = process_user("u1", &records["u1"], &cfg);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].home_loc, 1);
        assert_eq!(events[0].dest_loc, 2);
        assert_eq!(events[0].migration_day, 120);
        assert_eq!(events[0].uncertainty, 20);
    }

    #[test]
    fn single_location_user_yields_no_events() {
        let days_a: Vec<i64> = (0..=199).collect();
        let (records, _cal) = obs_for("u1", &days_a, &[]);
        let cfg = PipelineConfig::default();
        let events = process_user("u1", &records["u1"], &cfg);
        assert!(events.is_empty());
    }

    #[test]
    fn run_all_covers_every_user() {
        let cal = CalendarIndex::from_yyyymmdd(20200101..=20221231).unwrap();
        let mut rows = Vec::new();
        for &d in &(0..=99).collect::<Vec<i64>>() {
            rows.push(DailyObservation { user_id: "u1".into(), date: cal.date_at(d as usize), location: 1 });
        }
        for &d in &(120..=259).collect::<Vec<i64>>() {
            rows.push(DailyObservation { user_id: "u1".into(), date: cal.date_at(d as usize), location: 2 });
        }
        for &d in &(0..=199).collect::<Vec<i64>>() {
            rows.push(DailyObservation { user_id: "u2".into(), date: cal.date_at(d as usize), location: 9 });
        }
        let records = build_records(rows, &cal).unwrap();
        let cfg = PipelineConfig::default();
        let events = run_all(&records, &cfg);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_id, "u1");
    }
}
