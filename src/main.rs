mod calendar;
mod config;
mod constants;
mod error;
mod frequency;
mod io;
mod merge;
mod migration;
mod overlap;
mod pipeline;
mod record;
mod segment;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::io::IsTerminal;
use std::path::PathBuf;

use clap_complete::{Shell, generate};
use tracing_subscriber::EnvFilter;

use crate::calendar::CalendarIndex;
use crate::config::{PipelineConfigOverrides, load_pipeline_config};
use crate::constants::{
    DEFAULT_CONFIG_PATH, DEFAULT_MAX_DES_SEGMENT_LEN, DEFAULT_MIN_DES_SEGMENT_LEN,
    DEFAULT_MIN_HOME_SEGMENT_LEN, DEFAULT_OUTPUT_EVENTS_CSV, DEFAULT_SEGMENTS_CSV,
};
use crate::frequency::{
    find_migration_from_monthly_home, method1_monthly_home, method2_monthly_home,
    method2_prop_monthly_home, method3_monthly_home, method4_monthly_home, method6_monthly_home,
    nearby_towers,
};
use crate::pipeline::{filter_short_term, run_all, sort_events, stage_segments};

const APP_ABOUT: &str = "migratrace - detect home-location migration events in per-user daily trajectories";

#[derive(Parser, Debug)]
#[command(name = "migratrace", about = APP_ABOUT)]
struct Args {
    /// Gzip output CSVs to `.csv.gz` after writing; the uncompressed CSV is removed.
    #[arg(long = "archive-csv", global = true)]
    archive_csv: bool,
    /// Size the global rayon thread pool; defaults to all available parallelism.
    #[arg(long = "jobs", short = 'j', global = true, value_name = "N")]
    jobs: Option<usize>,
    #[command(subcommand)]
    command: Command,
}

/// The nine §6 pipeline parameters as CLI flags, layered over the TOML config
/// file (spec.md §2: "CLI flags override the file"). Shared by `detect` and
/// `segments` via `#[command(flatten)]`.
#[derive(ClapArgs, Debug)]
struct PipelineOverrideArgs {
    #[arg(long = "num-stayed-days-migrant", value_name = "DAYS")]
    num_stayed_days_migrant: Option<usize>,
    #[arg(long = "num-days-missing-gap", value_name = "DAYS")]
    num_days_missing_gap: Option<i64>,
    #[arg(long = "small-seg-len", value_name = "DAYS")]
    small_seg_len: Option<usize>,
    #[arg(long = "seg-prop", value_name = "PROPORTION")]
    seg_prop: Option<f64>,
    #[arg(long = "min-overlap-part-len", value_name = "DAYS")]
    min_overlap_part_len: Option<usize>,
    #[arg(long = "max-gap-home-des", value_name = "DAYS")]
    max_gap_home_des: Option<i64>,
    #[arg(long = "min-home-segment-len", value_name = "DAYS")]
    min_home_segment_len: Option<usize>,
    #[arg(long = "min-des-segment-len", value_name = "DAYS")]
    min_des_segment_len: Option<usize>,
    #[arg(long = "max-des-segment-len", value_name = "DAYS")]
    max_des_segment_len: Option<usize>,
}

impl From<PipelineOverrideArgs> for PipelineConfigOverrides {
    fn from(args: PipelineOverrideArgs) -> Self {
        Self {
            num_stayed_days_migrant: args.num_stayed_days_migrant,
            num_days_missing_gap: args.num_days_missing_gap,
            small_seg_len: args.small_seg_len,
            seg_prop: args.seg_prop,
            min_overlap_part_len: args.min_overlap_part_len,
            max_gap_home_des: args.max_gap_home_des,
            min_home_segment_len: args.min_home_segment_len,
            min_des_segment_len: args.min_des_segment_len,
            max_des_segment_len: args.max_des_segment_len,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full 8-stage pipeline and write migration events to CSV.
    Detect {
        /// Input CSV of `(user_id, date, location)` daily observations.
        #[arg(short = 'i', long = "input-csv", value_name = "PATH")]
        input_csv: PathBuf,
        /// Where to write the migration-event CSV.
        #[arg(
            short = 'o',
            long = "output-csv",
            value_name = "PATH",
            default_value = DEFAULT_OUTPUT_EVENTS_CSV
        )]
        output_csv: PathBuf,
        /// TOML file with pipeline parameters (§6).
        #[arg(long = "config", value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        #[command(flatten)]
        pipeline_overrides: PipelineOverrideArgs,
        /// Also write the overlap-resolved (`S⁴`) segments to this debug CSV.
        #[arg(long = "segments-csv", value_name = "PATH")]
        segments_csv: Option<PathBuf>,
        /// Apply the optional §4.11 short-term displacement filter.
        #[arg(long = "short-term")]
        short_term: bool,
        #[arg(long = "home-min-len", value_name = "DAYS", default_value_t = DEFAULT_MIN_HOME_SEGMENT_LEN)]
        home_min_len: usize,
        #[arg(long = "home-max-len", value_name = "DAYS", default_value_t = usize::MAX)]
        home_max_len: usize,
        #[arg(long = "dest-min-len", value_name = "DAYS", default_value_t = DEFAULT_MIN_DES_SEGMENT_LEN)]
        dest_min_len: usize,
        #[arg(long = "dest-max-len", value_name = "DAYS", default_value_t = DEFAULT_MAX_DES_SEGMENT_LEN)]
        dest_max_len: usize,
    },
    /// Run the pipeline up to a chosen stage and dump the resulting segments.
    Segments {
        #[arg(short = 'i', long = "input-csv", value_name = "PATH")]
        input_csv: PathBuf,
        #[arg(
            short = 'o',
            long = "output-csv",
            value_name = "PATH",
            default_value = DEFAULT_SEGMENTS_CSV
        )]
        output_csv: PathBuf,
        #[arg(long = "config", value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        #[command(flatten)]
        pipeline_overrides: PipelineOverrideArgs,
        /// Which refinement checkpoint to dump (density-filtered `S²`,
        /// merged `S³`, or overlap-resolved `S⁴`).
        #[arg(long = "stage", value_enum, default_value_t = SegmentStage::Resolved)]
        stage: SegmentStage,
    },
    /// Run the frequency front end (§4.12) over hourly tower/district observations.
    Frequency {
        /// Input CSV of `(user_id, date, hour, tower, district)` rows.
        #[arg(long = "hourly-csv", value_name = "PATH")]
        hourly_csv: PathBuf,
        /// Optional `(tower_id, district_id, lat, lon)` CSV, required by rules 4/5.
        #[arg(long = "tower-district-csv", value_name = "PATH")]
        tower_district_csv: Option<PathBuf>,
        /// Radius in km for `nearby_towers`, required by rules 4/5.
        #[arg(long = "nearby-radius-km", value_name = "KM")]
        nearby_radius_km: Option<f64>,
        /// Which of the six §4.12 home-location rules to apply.
        #[arg(long = "rule", value_enum, default_value_t = FrequencyRule::Count)]
        rule: FrequencyRule,
        /// Minimum `count / days_in_month` proportion, used only by `distinct-days-prop`.
        #[arg(long = "prop", default_value_t = 0.5)]
        prop: f64,
        /// Calendar year that month index 1 falls in.
        #[arg(long = "start-year")]
        start_year: i32,
        /// Where to write the monthly migration-event CSV.
        #[arg(short = 'o', long = "output-csv", value_name = "PATH")]
        output_csv: PathBuf,
    },
    /// Generate shell completion files.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
        #[arg(short = 'o', long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SegmentStage {
    Density,
    Merged,
    Resolved,
}

impl From<SegmentStage> for pipeline::Stage {
    fn from(stage: SegmentStage) -> Self {
        match stage {
            SegmentStage::Density => pipeline::Stage::Density,
            SegmentStage::Merged => pipeline::Stage::Merged,
            SegmentStage::Resolved => pipeline::Stage::Resolved,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FrequencyRule {
    Count,
    DistinctDays,
    DistinctDaysProp,
    Night,
    Tower,
    NightTower,
    Hierarchical,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("migratrace=info"));
    let ansi = std::io::stdout().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(ansi)
        .compact()
        .init();
}

fn headline(message: &str) {
    tracing::info!(status = "start", "{message}");
}

fn success(message: &str) {
    tracing::info!(status = "ok", "{message}");
}

fn error(message: &str) {
    tracing::error!(status = "err", "{message}");
}

fn generate_completions(shell: Shell, output: Option<PathBuf>) -> Result<(), String> {
    use clap::CommandFactory;
    let mut cmd = Args::command();
    let bin_name = cmd.get_name().to_string();
    if let Some(path) = output {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|err| format!("Failed to create {}: {err}", parent.display()))?;
        }
        let mut file = std::fs::File::create(&path)
            .map_err(|err| format!("Failed to create {}: {err}", path.display()))?;
        generate(shell, &mut cmd, bin_name, &mut file);
    } else {
        let mut stdout = std::io::stdout();
        generate(shell, &mut cmd, bin_name, &mut stdout);
    }
    Ok(())
}

fn archive_if_requested(path: &std::path::Path, archive_csv: bool) {
    if !archive_csv {
        return;
    }
    match io::archive_csv_file(path) {
        Ok(archived) => {
            success(&format!("Saved archive to {}", archived.display()));
            if let Err(err) = io::remove_csv_file(path) {
                error(&format!("Failed to remove {}: {err}", path.display()));
            }
        }
        Err(err) => error(&format!("Failed to archive {}: {err}", path.display())),
    }
}

fn run_detect(
    input_csv: PathBuf,
    output_csv: PathBuf,
    config_path: PathBuf,
    pipeline_overrides: PipelineOverrideArgs,
    segments_csv: Option<PathBuf>,
    short_term: bool,
    home_min_len: usize,
    home_max_len: usize,
    dest_min_len: usize,
    dest_max_len: usize,
    archive_csv: bool,
) {
    init_logging();
    headline(APP_ABOUT);

    let cfg = match load_pipeline_config(
        &config_path,
        std::path::Path::new(DEFAULT_CONFIG_PATH),
        pipeline_overrides.into(),
    ) {
        Ok(cfg) => cfg,
        Err(err) => {
            error(&err.to_string());
            return;
        }
    };
    tracing::info!(mode = "detect", input_csv = %input_csv.display(), output_csv = %output_csv.display(), ?cfg, "Running migration detection pipeline");

    let rows = match io::read_observations_csv(&input_csv) {
        Ok(rows) => rows,
        Err(err) => {
            error(&format!("Failed to read {}: {err}", input_csv.display()));
            return;
        }
    };
    let dates = rows.iter().map(|r| r.date).collect::<Vec<_>>();
    let calendar = match CalendarIndex::from_yyyymmdd(dates) {
        Ok(cal) => cal,
        Err(err) => {
            error(&err.to_string());
            return;
        }
    };
    let records = match record::build_records(rows, &calendar) {
        Ok(records) => records,
        Err(err) => {
            error(&err.to_string());
            return;
        }
    };

    tracing::info!(user_count = records.len(), "Loaded per-user records");
    let mut events = sort_events(run_all(&records, &cfg));
    if short_term {
        events = filter_short_term(events, home_min_len, home_max_len, dest_min_len, dest_max_len);
    }

    if let Err(err) = io::write_migration_events_csv(&events, &calendar, &output_csv) {
        error(&format!("Failed to write {}: {err}", output_csv.display()));
        return;
    }
    archive_if_requested(&output_csv, archive_csv);
    success(&format!("Wrote {} migration events to {}", events.len(), output_csv.display()));

    if let Some(segments_path) = segments_csv {
        let mut debug_rows = Vec::new();
        for (user_id, obs) in &records {
            let resolved = stage_segments(obs, &cfg, pipeline::Stage::Resolved);
            for (loc, segs) in resolved {
                for seg in segs {
                    debug_rows.push((user_id.clone(), loc, seg.start, seg.end));
                }
            }
        }
        if let Err(err) = io::write_segments_csv(&debug_rows, &calendar, &segments_path) {
            error(&format!("Failed to write {}: {err}", segments_path.display()));
            return;
        }
        archive_if_requested(&segments_path, archive_csv);
        success(&format!("Wrote {} segments to {}", debug_rows.len(), segments_path.display()));
    }
}

fn run_segments(
    input_csv: PathBuf,
    output_csv: PathBuf,
    config_path: PathBuf,
    pipeline_overrides: PipelineOverrideArgs,
    stage: SegmentStage,
    archive_csv: bool,
) {
    init_logging();
    headline(APP_ABOUT);

    let cfg = match load_pipeline_config(
        &config_path,
        std::path::Path::new(DEFAULT_CONFIG_PATH),
        pipeline_overrides.into(),
    ) {
        Ok(cfg) => cfg,
        Err(err) => {
            error(&err.to_string());
            return;
        }
    };

    let rows = match io::read_observations_csv(&input_csv) {
        Ok(rows) => rows,
        Err(err) => {
            error(&format!("Failed to read {}: {err}", input_csv.display()));
            return;
        }
    };
    let dates = rows.iter().map(|r| r.date).collect::<Vec<_>>();
    let calendar = match CalendarIndex::from_yyyymmdd(dates) {
        Ok(cal) => cal,
        Err(err) => {
            error(&err.to_string());
            return;
        }
    };
    let records = match record::build_records(rows, &calendar) {
        Ok(records) => records,
        Err(err) => {
            error(&err.to_string());
            return;
        }
    };

    let mut debug_rows = Vec::new();
    for (user_id, obs) in &records {
        let segments = stage_segments(obs, &cfg, stage.into());
        for (loc, segs) in segments {
            for seg in segs {
                debug_rows.push((user_id.clone(), loc, seg.start, seg.end));
            }
        }
    }

    if let Err(err) = io::write_segments_csv(&debug_rows, &calendar, &output_csv) {
        error(&format!("Failed to write {}: {err}", output_csv.display()));
        return;
    }
    archive_if_requested(&output_csv, archive_csv);
    success(&format!("Wrote {} segments to {}", debug_rows.len(), output_csv.display()));
}

fn run_frequency(
    hourly_csv: PathBuf,
    tower_district_csv: Option<PathBuf>,
    nearby_radius_km: Option<f64>,
    rule: FrequencyRule,
    prop: f64,
    start_year: i32,
    output_csv: PathBuf,
    archive_csv: bool,
) {
    init_logging();
    headline(APP_ABOUT);

    let (observations, user_ids) = match io::read_hourly_csv(&hourly_csv) {
        Ok(result) => result,
        Err(err) => {
            error(&format!("Failed to read {}: {err}", hourly_csv.display()));
            return;
        }
    };

    let monthly_home = match rule {
        FrequencyRule::Count => method1_monthly_home(&observations, start_year),
        FrequencyRule::DistinctDays => method2_monthly_home(&observations, start_year),
        FrequencyRule::DistinctDaysProp => method2_prop_monthly_home(&observations, start_year, prop),
        FrequencyRule::Night => method3_monthly_home(&observations, start_year),
        FrequencyRule::Tower | FrequencyRule::NightTower => {
            let (Some(tower_csv), Some(radius)) = (&tower_district_csv, nearby_radius_km) else {
                error("--tower-district-csv and --nearby-radius-km are required for tower-based rules");
                return;
            };
            let towers = match io::read_tower_district_csv(tower_csv) {
                Ok(towers) => towers,
                Err(err) => {
                    error(&format!("Failed to read {}: {err}", tower_csv.display()));
                    return;
                }
            };
            let nearby = nearby_towers(&towers, radius);
            let tower_to_district = towers.iter().map(|t| (t.tower, t.district)).collect();
            method4_monthly_home(
                &observations,
                &nearby,
                &tower_to_district,
                start_year,
                matches!(rule, FrequencyRule::NightTower),
            )
        }
        FrequencyRule::Hierarchical => method6_monthly_home(&observations, start_year),
    };

    let monthly_home = match monthly_home {
        Ok(result) => result,
        Err(err) => {
            error(&err.to_string());
            return;
        }
    };

    let mut events = Vec::new();
    for (&user_idx, months) in &monthly_home {
        for (month, home, destination) in find_migration_from_monthly_home(months) {
            events.push((user_ids[user_idx].clone(), month, home, destination));
        }
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    if let Err(err) = io::write_frequency_events_csv(&events, &output_csv) {
        error(&format!("Failed to write {}: {err}", output_csv.display()));
        return;
    }
    archive_if_requested(&output_csv, archive_csv);
    success(&format!("Wrote {} monthly migration events to {}", events.len(), output_csv.display()));
}

fn main() {
    let args = Args::parse();
    let archive_csv = args.archive_csv;

    if let Some(jobs) = args.jobs
        && let Err(err) = rayon::ThreadPoolBuilder::new().num_threads(jobs).build_global()
    {
        eprintln!("Failed to size thread pool to {jobs} jobs: {err}");
    }

    match args.command {
        Command::Completions { shell, output } => {
            if let Err(err) = generate_completions(shell, output) {
                eprintln!("{err}");
            }
        }
        Command::Detect {
            input_csv,
            output_csv,
            config,
            pipeline_overrides,
            segments_csv,
            short_term,
            home_min_len,
            home_max_len,
            dest_min_len,
            dest_max_len,
        } => run_detect(
            input_csv,
            output_csv,
            config,
            pipeline_overrides,
            segments_csv,
            short_term,
            home_min_len,
            home_max_len,
            dest_min_len,
            dest_max_len,
            archive_csv,
        ),
        Command::Segments { input_csv, output_csv, config, pipeline_overrides, stage } => {
            run_segments(input_csv, output_csv, config, pipeline_overrides, stage, archive_csv);
        }
        Command::Frequency {
            hourly_csv,
            tower_district_csv,
            nearby_radius_km,
            rule,
            prop,
            start_year,
            output_csv,
        } => run_frequency(
            hourly_csv,
            tower_district_csv,
            nearby_radius_km,
            rule,
            prop,
            start_year,
            output_csv,
            archive_csv,
        ),
    }
}
