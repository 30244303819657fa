//! CSV input/output and archive helpers (spec.md §6), grounded in the
//! teacher's `data::to_csv` and `main::archive_csv_file`/`remove_csv_file`.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use crate::calendar::CalendarIndex;
use crate::constants::CSV_ARCHIVE_EXTENSION;
use crate::error::{MigratraceError, Result};
use crate::frequency::{HourlyObservation, TowerDistrict};
use crate::migration::MigrationEvent;
use crate::record::{DailyObservation, Location};

#[derive(Debug, Deserialize)]
struct InputRow {
    user_id: String,
    date: i64,
    location: Location,
}

/// Reads raw `(user_id, date, location)` rows from a CSV file.
pub fn read_observations_csv(path: &Path) -> Result<Vec<DailyObservation>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let row: InputRow = record?;
        rows.push(DailyObservation {
            user_id: row.user_id,
            date: row.date,
            location: row.location,
        });
    }
    Ok(rows)
}

#[derive(Debug, Deserialize)]
struct TowerDistrictRow {
    tower_id: i64,
    district_id: Location,
    lat: f64,
    lon: f64,
}

/// Reads a `tower_id,district_id,lat,lon` CSV describing the tower-to-district
/// map used by the frequency front end's rule 4/5/6 tower expansion.
pub fn read_tower_district_csv(path: &Path) -> Result<Vec<TowerDistrict>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let row: TowerDistrictRow = record?;
        rows.push(TowerDistrict {
            tower: row.tower_id,
            district: row.district_id,
            lat: row.lat,
            lon: row.lon,
        });
    }
    Ok(rows)
}

#[derive(Debug, Serialize)]
struct MigrationEventRow {
    user_id: String,
    home: Location,
    destination: Location,
    migration_date: i64,
    uncertainty: i64,
    num_error_day: usize,
    home_start: usize,
    home_end: usize,
    destination_start: usize,
    destination_end: usize,
    home_start_date: i64,
    home_end_date: i64,
    destination_start_date: i64,
    destination_end_date: i64,
}

fn create_with_parent(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(File::create(path)?)
}

/// Writes the migration-event output CSV (spec.md §6's 14-column schema).
pub fn write_migration_events_csv(
    events: &[MigrationEvent],
    calendar: &CalendarIndex,
    path: &Path,
) -> Result<()> {
    let file = create_with_parent(path)?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    for event in events {
        writer.serialize(MigrationEventRow {
            user_id: event.user_id.clone(),
            home: event.home_loc,
            destination: event.dest_loc,
            migration_date: event.migration_date(calendar),
            uncertainty: event.uncertainty,
            num_error_day: event.num_error_day,
            home_start: event.home_seg.start,
            home_end: event.home_seg.end,
            destination_start: event.dest_seg.start,
            destination_end: event.dest_seg.end,
            home_start_date: event.home_start_date(calendar),
            home_end_date: event.home_end_date(calendar),
            destination_start_date: event.destination_start_date(calendar),
            destination_end_date: event.destination_end_date(calendar),
        })?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct SegmentRow {
    user_id: String,
    location: Location,
    segment_start_date: i64,
    segment_end_date: i64,
    segment_length: usize,
}

/// Writes the optional segments debug CSV, sorted by `(user_id,
/// segment_start_date)` for deterministic output.
pub fn write_segments_csv(
    rows: &[(String, Location, usize, usize)],
    calendar: &CalendarIndex,
    path: &Path,
) -> Result<()> {
    let mut formatted: Vec<SegmentRow> = rows
        .iter()
        .map(|(user_id, location, start, end)| SegmentRow {
            user_id: user_id.clone(),
            location: *location,
            segment_start_date: calendar.date_at(*start),
            segment_end_date: calendar.date_at(*end),
            segment_length: end - start + 1,
        })
        .collect();
    formatted.sort_by(|a, b| {
        a.user_id
            .cmp(&b.user_id)
            .then(a.segment_start_date.cmp(&b.segment_start_date))
    });

    let file = create_with_parent(path)?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    for row in formatted {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct HourlyRow {
    user_id: String,
    date: i64,
    hour: u32,
    tower: Option<i64>,
    district: Location,
}

/// Reads hourly tower/district observations, assigning each distinct
/// `user_id` a dense index and returning both the observations and the
/// index-to-user-id lookup (in index order).
pub fn read_hourly_csv(path: &Path) -> Result<(Vec<HourlyObservation>, Vec<String>)> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut user_index: BTreeMap<String, usize> = BTreeMap::new();
    let mut user_ids = Vec::new();
    let mut observations = Vec::new();
    for record in reader.deserialize() {
        let row: HourlyRow = record?;
        let idx = *user_index.entry(row.user_id.clone()).or_insert_with(|| {
            user_ids.push(row.user_id.clone());
            user_ids.len() - 1
        });
        observations.push(HourlyObservation {
            user_id_idx: idx,
            date: row.date,
            hour: row.hour,
            tower: row.tower,
            district: row.district,
        });
    }
    Ok((observations, user_ids))
}

#[derive(Debug, Serialize)]
struct FrequencyEventRow {
    user_id: String,
    home: Location,
    destination: Location,
    migration_month: i64,
}

/// Writes the frequency front end's monthly migration events.
pub fn write_frequency_events_csv(
    events: &[(String, i64, Location, Location)],
    path: &Path,
) -> Result<()> {
    let file = create_with_parent(path)?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    for (user_id, month, home, destination) in events {
        writer.serialize(FrequencyEventRow {
            user_id: user_id.clone(),
            home: *home,
            destination: *destination,
            migration_month: *month,
        })?;
    }
    writer.flush()?;
    Ok(())
}

fn file_name_for(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| MigratraceError::Config(format!("path {} has no file name", path.display())))
}

fn archive_path_for(csv_path: &Path) -> Result<PathBuf> {
    let file_name = file_name_for(csv_path)?;
    let archive_name = format!("{file_name}.{CSV_ARCHIVE_EXTENSION}");
    let mut archive_path = csv_path.to_path_buf();
    archive_path.set_file_name(archive_name);
    Ok(archive_path)
}

/// Gzips `csv_path` to `<csv_path>.gz`, matching the teacher's
/// `archive_csv_file`. Does not remove the source file.
pub fn archive_csv_file(csv_path: &Path) -> Result<PathBuf> {
    let archive_path = archive_path_for(csv_path)?;
    if let Some(parent) = archive_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let mut input = File::open(csv_path)?;
    let output = File::create(&archive_path)?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    std::io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    Ok(archive_path)
}

pub fn remove_csv_file(csv_path: &Path) -> Result<()> {
    fs::remove_file(csv_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn reads_observation_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "user_id,date,location").unwrap();
        writeln!(file, "u1,20200101,5").unwrap();
        let rows = read_observations_csv(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, "u1");
        assert_eq!(rows[0].location, 5);
    }

    #[test]
    fn archive_then_remove_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        fs::write(&path, "a,b\n1,2\n").unwrap();
        let archive = archive_csv_file(&path).unwrap();
        assert!(archive.exists());
        remove_csv_file(&path).unwrap();
        assert!(!path.exists());
    }
}
