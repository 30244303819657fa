//! §4.12 frequency front end: a companion monthly-mode home-location
//! estimator that feeds the same migration finder logic as the segment-based
//! pipeline, but over hourly tower/district observations instead of daily
//! location observations.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};

use crate::constants::{DATE_FORMAT, EARTH_RADIUS_KM};
use crate::error::{MigratraceError, Result};
use crate::record::Location;

pub type TowerId = i64;

#[derive(Debug, Clone, Copy)]
pub struct HourlyObservation {
    pub user_id_idx: usize,
    pub date: i64,
    pub hour: u32,
    pub tower: Option<TowerId>,
    pub district: Location,
}

#[derive(Debug, Clone, Copy)]
pub struct TowerDistrict {
    pub tower: TowerId,
    pub district: Location,
    pub lat: f64,
    pub lon: f64,
}

/// Great-circle distance in km (haversine, `R = 6373.0`), matching the
/// reference implementation's `find_tower_nearby`.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Towers within `radius_km` of each tower, excluding the tower itself.
pub fn nearby_towers(towers: &[TowerDistrict], radius_km: f64) -> BTreeMap<TowerId, Vec<TowerId>> {
    let mut result = BTreeMap::new();
    for a in towers {
        let mut near: Vec<TowerId> = towers
            .iter()
            .filter(|b| b.tower != a.tower && haversine_km(a.lat, a.lon, b.lat, b.lon) <= radius_km)
            .map(|b| b.tower)
            .collect();
        near.sort_unstable();
        result.insert(a.tower, near);
    }
    result
}

/// `month + 12*(year - start_year)`, matching the reference's `month_index`.
pub fn month_index(date: i64, start_year: i32) -> Result<i64> {
    let text = date.to_string();
    let naive = NaiveDate::parse_from_str(&text, DATE_FORMAT).map_err(|_| {
        MigratraceError::InvalidParameter {
            message: format!("date {date} is not a valid YYYYMMDD date"),
        }
    })?;
    use chrono::Datelike;
    Ok(i64::from(naive.month()) + 12 * i64::from(naive.year() - start_year))
}

fn is_night_hour(hour: u32) -> bool {
    hour <= 9 || (19..=24).contains(&hour)
}

fn is_night_hour_rule6(hour: u32) -> bool {
    hour <= 7 || hour >= 18
}

/// Shifts observations at hour `<= 8` to the previous calendar day, per
/// spec.md §4.12 rule 6.
fn assign_midnight_to_previous_day(date: i64, hour: u32) -> i64 {
    if hour > 8 {
        return date;
    }
    let text = date.to_string();
    let Ok(naive) = NaiveDate::parse_from_str(&text, DATE_FORMAT) else {
        return date;
    };
    let shifted = naive - Duration::days(1);
    shifted.format(DATE_FORMAT).to_string().parse().unwrap_or(date)
}

/// Smallest-id tie-break used by rules 1–5 (spec.md §9 open question).
fn top1_by_count(counts: &BTreeMap<Location, u32>) -> Option<Location> {
    let max = *counts.values().max()?;
    counts
        .iter()
        .filter(|&(_, &c)| c == max)
        .map(|(&loc, _)| loc)
        .min()
}

/// One user's per-district activity counts for one month, under a given
/// counting rule (count of observations, or count of distinct days).
type MonthlyDistrictCounts = BTreeMap<usize, BTreeMap<i64, BTreeMap<Location, u32>>>;

fn night_filtered<'a>(
    observations: &'a [HourlyObservation],
) -> impl Iterator<Item = &'a HourlyObservation> {
    observations.iter().filter(|o| is_night_hour(o.hour))
}

/// Rule 1: most activity (observation count) at a district.
pub fn method1_monthly_home(
    observations: &[HourlyObservation],
    start_year: i32,
) -> Result<BTreeMap<usize, BTreeMap<i64, Location>>> {
    monthly_home_by_activity_count(observations.iter(), start_year)
}

/// Rule 2: most distinct days observed at a district.
pub fn method2_monthly_home(
    observations: &[HourlyObservation],
    start_year: i32,
) -> Result<BTreeMap<usize, BTreeMap<i64, Location>>> {
    monthly_home_by_distinct_days(observations.iter(), start_year, None)
}

/// Rule 2': as rule 2, but requires the winning count `>= prop * days_in_month`.
pub fn method2_prop_monthly_home(
    observations: &[HourlyObservation],
    start_year: i32,
    prop: f64,
) -> Result<BTreeMap<usize, BTreeMap<i64, Location>>> {
    monthly_home_by_distinct_days(observations.iter(), start_year, Some(prop))
}

/// Rule 3: as rule 1, restricted to night hours `{0..9} ∪ {19..24}` first.
pub fn method3_monthly_home(
    observations: &[HourlyObservation],
    start_year: i32,
) -> Result<BTreeMap<usize, BTreeMap<i64, Location>>> {
    monthly_home_by_activity_count(night_filtered(observations), start_year)
}

fn monthly_home_by_activity_count<'a>(
    observations: impl Iterator<Item = &'a HourlyObservation>,
    start_year: i32,
) -> Result<BTreeMap<usize, BTreeMap<i64, Location>>> {
    let mut counts: MonthlyDistrictCounts = BTreeMap::new();
    for obs in observations {
        let month = month_index(obs.date, start_year)?;
        *counts
            .entry(obs.user_id_idx)
            .or_default()
            .entry(month)
            .or_default()
            .entry(obs.district)
            .or_insert(0) += 1;
    }
    Ok(resolve_top1(&counts))
}

fn monthly_home_by_distinct_days<'a>(
    observations: impl Iterator<Item = &'a HourlyObservation>,
    start_year: i32,
    prop: Option<f64>,
) -> Result<BTreeMap<usize, BTreeMap<i64, Location>>> {
    // (user, month, district) -> set of distinct dates observed
    let mut distinct_days: BTreeMap<usize, BTreeMap<i64, BTreeMap<Location, std::collections::BTreeSet<i64>>>> =
        BTreeMap::new();
    for obs in observations {
        let month = month_index(obs.date, start_year)?;
        distinct_days
            .entry(obs.user_id_idx)
            .or_default()
            .entry(month)
            .or_default()
            .entry(obs.district)
            .or_default()
            .insert(obs.date);
    }

    let mut counts: MonthlyDistrictCounts = BTreeMap::new();
    for (&user, months) in &distinct_days {
        for (&month, districts) in months {
            for (&district, days) in districts {
                counts
                    .entry(user)
                    .or_default()
                    .entry(month)
                    .or_default()
                    .insert(district, days.len() as u32);
            }
        }
    }

    if let Some(prop) = prop {
        Ok(resolve_top1_over_prop(&counts, prop, start_year))
    } else {
        Ok(resolve_top1(&counts))
    }
}

fn resolve_top1(counts: &MonthlyDistrictCounts) -> BTreeMap<usize, BTreeMap<i64, Location>> {
    let mut result = BTreeMap::new();
    for (&user, months) in counts {
        for (&month, districts) in months {
            if let Some(top) = top1_by_count(districts) {
                result.entry(user).or_insert_with(BTreeMap::new).insert(month, top);
            }
        }
    }
    result
}

fn resolve_top1_over_prop(
    counts: &MonthlyDistrictCounts,
    prop: f64,
    start_year: i32,
) -> BTreeMap<usize, BTreeMap<i64, Location>> {
    let mut result = BTreeMap::new();
    for (&user, months) in counts {
        for (&month, districts) in months {
            let days_in_month = days_in_calendar_month(month, start_year);
            if let Some(&max_count) = districts.values().max() {
                if f64::from(max_count) >= prop * days_in_month {
                    if let Some(top) = top1_by_count(districts) {
                        result.entry(user).or_insert_with(BTreeMap::new).insert(month, top);
                    }
                }
            }
        }
    }
    result
}

/// Inverts `month_index` back to a calendar `(year, month)` and returns how
/// many days that month has.
fn days_in_calendar_month(month_idx: i64, start_year: i32) -> f64 {
    let zero_based = month_idx - 1;
    let year = start_year + i32::try_from(zero_based.div_euclid(12)).unwrap_or(0);
    let month = u32::try_from(zero_based.rem_euclid(12)).unwrap_or(0) + 1;
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    match (
        NaiveDate::from_ymd_opt(year, month, 1),
        NaiveDate::from_ymd_opt(next_year, next_month, 1),
    ) {
        (Some(first), Some(next_first)) => (next_first - first).num_days() as f64,
        _ => 30.0,
    }
}

/// Rules 4/5: expand each observation to `{tower} ∪ nearby[tower]`, pick the
/// top tower by count, then map to district via `tower_district`. Rule 5
/// additionally restricts to night hours first.
pub fn method4_monthly_home(
    observations: &[HourlyObservation],
    nearby: &BTreeMap<TowerId, Vec<TowerId>>,
    tower_to_district: &BTreeMap<TowerId, Location>,
    start_year: i32,
    night_only: bool,
) -> Result<BTreeMap<usize, BTreeMap<i64, Location>>> {
    let mut tower_counts: BTreeMap<usize, BTreeMap<i64, BTreeMap<TowerId, u32>>> = BTreeMap::new();
    for obs in observations {
        if night_only && !is_night_hour(obs.hour) {
            continue;
        }
        let Some(tower) = obs.tower else { continue };
        let month = month_index(obs.date, start_year)?;
        let entry = tower_counts
            .entry(obs.user_id_idx)
            .or_default()
            .entry(month)
            .or_default();
        *entry.entry(tower).or_insert(0) += 1;
        if let Some(neighbors) = nearby.get(&tower) {
            for &n in neighbors {
                *entry.entry(n).or_insert(0) += 1;
            }
        }
    }

    let mut result = BTreeMap::new();
    for (&user, months) in &tower_counts {
        for (&month, towers) in months {
            let max = towers.values().copied().max();
            let Some(max) = max else { continue };
            let Some(&top_tower) = towers
                .iter()
                .filter(|&(_, &c)| c == max)
                .map(|(t, _)| t)
                .min()
            else {
                continue;
            };
            if let Some(&district) = tower_to_district.get(&top_tower) {
                result.entry(user).or_insert_with(BTreeMap::new).insert(month, district);
            }
        }
    }
    Ok(result)
}

/// Rule 6: hierarchical hourly -> daily -> monthly modal district, with
/// ties broken first by daily modal count, then monthly modal count;
/// unresolved ties yield no home for that hour/day/month.
pub fn method6_monthly_home(
    observations: &[HourlyObservation],
    start_year: i32,
) -> Result<BTreeMap<usize, BTreeMap<i64, Location>>> {
    // Shift early-morning observations to the previous day and restrict to
    // the rule-6 night window before any aggregation.
    let shifted: Vec<HourlyObservation> = observations
        .iter()
        .filter(|o| is_night_hour_rule6(o.hour))
        .map(|o| HourlyObservation {
            date: assign_midnight_to_previous_day(o.date, o.hour),
            ..*o
        })
        .collect();

    let mut daily_counts: BTreeMap<(usize, i64), BTreeMap<Location, u32>> = BTreeMap::new();
    let mut monthly_counts: BTreeMap<(usize, i64), BTreeMap<Location, u32>> = BTreeMap::new();
    let mut hourly_counts: BTreeMap<(usize, i64, u32), BTreeMap<Location, u32>> = BTreeMap::new();
    let mut date_month: BTreeMap<i64, i64> = BTreeMap::new();

    for obs in &shifted {
        let month = month_index(obs.date, start_year)?;
        date_month.insert(obs.date, month);
        *daily_counts
            .entry((obs.user_id_idx, obs.date))
            .or_default()
            .entry(obs.district)
            .or_insert(0) += 1;
        *monthly_counts
            .entry((obs.user_id_idx, month))
            .or_default()
            .entry(obs.district)
            .or_insert(0) += 1;
        *hourly_counts
            .entry((obs.user_id_idx, obs.date, obs.hour))
            .or_default()
            .entry(obs.district)
            .or_insert(0) += 1;
    }

    // Hour -> resolved district.
    let mut hourly_resolved: BTreeMap<(usize, i64, u32), Location> = BTreeMap::new();
    for (&(user, date, hour), counts) in &hourly_counts {
        let tied = top_tied(counts);
        if let Some(district) = resolve_tie(&tied, daily_counts.get(&(user, date)), monthly_counts.get(&(user, month_for(&date_month, date)))) {
            hourly_resolved.insert((user, date, hour), district);
        }
    }

    // Day -> resolved district, aggregating hourly-resolved modal counts.
    let mut daily_resolved_counts: BTreeMap<(usize, i64), BTreeMap<Location, u32>> = BTreeMap::new();
    for (&(user, date, _hour), &district) in &hourly_resolved {
        *daily_resolved_counts
            .entry((user, date))
            .or_default()
            .entry(district)
            .or_insert(0) += 1;
    }
    let mut daily_resolved: BTreeMap<(usize, i64), Location> = BTreeMap::new();
    for (&(user, date), counts) in &daily_resolved_counts {
        let tied = top_tied(counts);
        if let Some(district) = resolve_tie(&tied, daily_counts.get(&(user, date)), monthly_counts.get(&(user, month_for(&date_month, date)))) {
            daily_resolved.insert((user, date), district);
        }
    }

    // Month -> resolved district, aggregating daily-resolved modal counts.
    let mut monthly_resolved_counts: BTreeMap<(usize, i64), BTreeMap<Location, u32>> = BTreeMap::new();
    for (&(user, date), &district) in &daily_resolved {
        let month = month_for(&date_month, date);
        *monthly_resolved_counts
            .entry((user, month))
            .or_default()
            .entry(district)
            .or_insert(0) += 1;
    }
    let mut result: BTreeMap<usize, BTreeMap<i64, Location>> = BTreeMap::new();
    for (&(user, month), counts) in &monthly_resolved_counts {
        let tied = top_tied(counts);
        let resolved = if tied.len() == 1 {
            Some(tied[0])
        } else {
            let restricted: BTreeMap<Location, u32> = monthly_counts
                .get(&(user, month))
                .into_iter()
                .flat_map(|m| m.iter())
                .filter(|(d, _)| tied.contains(d))
                .map(|(&d, &c)| (d, c))
                .collect();
            let fallback = top_tied(&restricted);
            (fallback.len() == 1).then_some(fallback[0])
        };
        if let Some(district) = resolved {
            result.entry(user).or_insert_with(BTreeMap::new).insert(month, district);
        }
    }
    Ok(result)
}

fn month_for(date_month: &BTreeMap<i64, i64>, date: i64) -> i64 {
    date_month.get(&date).copied().unwrap_or_default()
}

fn top_tied(counts: &BTreeMap<Location, u32>) -> Vec<Location> {
    let Some(&max) = counts.values().max() else {
        return Vec::new();
    };
    counts
        .iter()
        .filter(|&(_, &c)| c == max)
        .map(|(&d, _)| d)
        .collect()
}

fn resolve_tie(
    tied: &[Location],
    daily_fallback: Option<&BTreeMap<Location, u32>>,
    monthly_fallback: Option<&BTreeMap<Location, u32>>,
) -> Option<Location> {
    if tied.len() == 1 {
        return Some(tied[0]);
    }
    if tied.is_empty() {
        return None;
    }
    if let Some(daily) = daily_fallback {
        let restricted: BTreeMap<Location, u32> = daily
            .iter()
            .filter(|(d, _)| tied.contains(d))
            .map(|(&d, &c)| (d, c))
            .collect();
        let narrowed = top_tied(&restricted);
        if narrowed.len() == 1 {
            return Some(narrowed[0]);
        }
        if let Some(monthly) = monthly_fallback {
            let restricted: BTreeMap<Location, u32> = monthly
                .iter()
                .filter(|(d, _)| narrowed.contains(d))
                .map(|(&d, &c)| (d, c))
                .collect();
            let final_tied = top_tied(&restricted);
            if final_tied.len() == 1 {
                return Some(final_tied[0]);
            }
        }
    }
    None
}

/// Shared migration finder (spec.md §4.12): reports an event at month `m`
/// iff `home(m-2)=home(m-1)=home(m) != home(m+1)=home(m+2)=home(m+3)` and the
/// six months are consecutive.
pub fn find_migration_from_monthly_home(monthly_home: &BTreeMap<i64, Location>) -> Vec<(i64, Location, Location)> {
    let entries: Vec<(i64, Location)> = monthly_home.iter().map(|(&m, &d)| (m, d)).collect();
    let n = entries.len();
    let mut results = Vec::new();
    if n < 6 {
        return results;
    }
    for idx in 2..=(n - 4) {
        let (m_before, d_before) = entries[idx - 2];
        let (_, d_before1) = entries[idx - 1];
        let (m_curr, d_curr) = entries[idx];
        let (_, d_after1) = entries[idx + 1];
        let (_, d_after2) = entries[idx + 2];
        let (m_after3, d_after3) = entries[idx + 3];
        if d_before == d_before1
            && d_before1 == d_curr
            && d_after1 == d_after2
            && d_after2 == d_after3
            && d_curr != d_after1
            && m_before + 5 == m_after3
        {
            results.push((m_curr, d_curr, d_after1));
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_zero_distance_for_same_point() {
        assert!(haversine_km(50.0, 30.0, 50.0, 30.0) < 1e-9);
    }

    #[test]
    fn nearby_towers_excludes_self_and_far_towers() {
        let towers = vec![
            TowerDistrict { tower: 1, district: 10, lat: 50.0, lon: 30.0 },
            TowerDistrict { tower: 2, district: 10, lat: 50.001, lon: 30.001 },
            TowerDistrict { tower: 3, district: 20, lat: 60.0, lon: 30.0 },
        ];
        let near = nearby_towers(&towers, 1.0);
        assert_eq!(near[&1], vec![2]);
        assert!(near[&3].is_empty());
    }

    #[test]
    fn month_index_matches_reference_formula() {
        assert_eq!(month_index(20200315, 2020).unwrap(), 3);
        assert_eq!(month_index(20210115, 2020).unwrap(), 13);
    }

    #[test]
    fn method1_picks_highest_activity_district() {
        let obs = vec![
            HourlyObservation { user_id_idx: 0, date: 20200101, hour: 10, tower: None, district: 1 },
            HourlyObservation { user_id_idx: 0, date: 20200102, hour: 10, tower: None, district: 1 },
            HourlyObservation { user_id_idx: 0, date: 20200103, hour: 10, tower: None, district: 2 },
        ];
        let homes = method1_monthly_home(&obs, 2020).unwrap();
        assert_eq!(homes[&0][&1], 1);
    }

    #[test]
    fn migration_requires_six_consecutive_stable_months() {
        let mut monthly = BTreeMap::new();
        for m in 1..=3 {
            monthly.insert(m, 7);
        }
        for m in 4..=6 {
            monthly.insert(m, 8);
        }
        let events = find_migration_from_monthly_home(&monthly);
        assert_eq!(events, vec![(3, 7, 8)]);
    }

    #[test]
    fn no_migration_when_gap_in_months() {
        let mut monthly = BTreeMap::new();
        monthly.insert(1, 7);
        monthly.insert(2, 7);
        monthly.insert(3, 7);
        monthly.insert(5, 8); // skips month 4, breaking consecutiveness
        monthly.insert(6, 8);
        monthly.insert(7, 8);
        assert!(find_migration_from_monthly_home(&monthly).is_empty());
    }
}
