//! Shared formatting and default-parameter constants, kept in one place so the
//! CLI, config loader and CSV layers never drift apart on a literal value.

/// `YYYYMMDD` integer date format used throughout the input/output CSVs.
pub const DATE_FORMAT: &str = "%Y%m%d";

/// Days appended past the observed date range for the "long" calendar index
/// (spec.md §3: "a separate long index extends D by >= 200 days").
pub const LONG_INDEX_PADDING_DAYS: i64 = 200;

pub const DEFAULT_NUM_STAYED_DAYS_MIGRANT: usize = 90;
pub const DEFAULT_NUM_DAYS_MISSING_GAP: i64 = 7;
pub const DEFAULT_SMALL_SEG_LEN: usize = 30;
pub const DEFAULT_SEG_PROP: f64 = 0.6;
pub const DEFAULT_MIN_OVERLAP_PART_LEN: usize = 0;
pub const DEFAULT_MAX_GAP_HOME_DES: i64 = 30;
pub const DEFAULT_MIN_HOME_SEGMENT_LEN: usize = 7;
pub const DEFAULT_MIN_DES_SEGMENT_LEN: usize = 7;
pub const DEFAULT_MAX_DES_SEGMENT_LEN: usize = 14;

/// Earth radius (km) used by the frequency front end's haversine distance,
/// matching the reference implementation's `R = 6373.0`.
pub const EARTH_RADIUS_KM: f64 = 6373.0;

pub const DEFAULT_OUTPUT_EVENTS_CSV: &str = "dist/migration_events.csv";
pub const DEFAULT_SEGMENTS_CSV: &str = "dist/segments.csv";
pub const DEFAULT_CONFIG_PATH: &str = "config/migratrace.toml";
pub const CSV_ARCHIVE_EXTENSION: &str = "gz";
