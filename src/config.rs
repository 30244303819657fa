//! Pipeline parameter config: TOML file layered over the spec.md §6
//! defaults, following the same load-then-validate shape the teacher uses
//! for its model config.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::constants::{
    DEFAULT_MAX_DES_SEGMENT_LEN, DEFAULT_MAX_GAP_HOME_DES, DEFAULT_MIN_DES_SEGMENT_LEN,
    DEFAULT_MIN_HOME_SEGMENT_LEN, DEFAULT_MIN_OVERLAP_PART_LEN, DEFAULT_NUM_DAYS_MISSING_GAP,
    DEFAULT_NUM_STAYED_DAYS_MIGRANT, DEFAULT_SEG_PROP, DEFAULT_SMALL_SEG_LEN,
};
use crate::error::{MigratraceError, Result};

/// The nine tunable parameters of the detection pipeline (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub num_stayed_days_migrant: usize,
    pub num_days_missing_gap: i64,
    pub small_seg_len: usize,
    pub seg_prop: f64,
    pub min_overlap_part_len: usize,
    pub max_gap_home_des: i64,
    pub min_home_segment_len: usize,
    pub min_des_segment_len: usize,
    pub max_des_segment_len: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_stayed_days_migrant: DEFAULT_NUM_STAYED_DAYS_MIGRANT,
            num_days_missing_gap: DEFAULT_NUM_DAYS_MISSING_GAP,
            small_seg_len: DEFAULT_SMALL_SEG_LEN,
            seg_prop: DEFAULT_SEG_PROP,
            min_overlap_part_len: DEFAULT_MIN_OVERLAP_PART_LEN,
            max_gap_home_des: DEFAULT_MAX_GAP_HOME_DES,
            min_home_segment_len: DEFAULT_MIN_HOME_SEGMENT_LEN,
            min_des_segment_len: DEFAULT_MIN_DES_SEGMENT_LEN,
            max_des_segment_len: DEFAULT_MAX_DES_SEGMENT_LEN,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    num_stayed_days_migrant: Option<usize>,
    num_days_missing_gap: Option<i64>,
    small_seg_len: Option<usize>,
    seg_prop: Option<f64>,
    min_overlap_part_len: Option<usize>,
    max_gap_home_des: Option<i64>,
    min_home_segment_len: Option<usize>,
    min_des_segment_len: Option<usize>,
    max_des_segment_len: Option<usize>,
}

fn resolve(overrides: PipelineConfigFile) -> PipelineConfig {
    let defaults = PipelineConfig::default();
    PipelineConfig {
        num_stayed_days_migrant: overrides
            .num_stayed_days_migrant
            .unwrap_or(defaults.num_stayed_days_migrant),
        num_days_missing_gap: overrides
            .num_days_missing_gap
            .unwrap_or(defaults.num_days_missing_gap),
        small_seg_len: overrides.small_seg_len.unwrap_or(defaults.small_seg_len),
        seg_prop: overrides.seg_prop.unwrap_or(defaults.seg_prop),
        min_overlap_part_len: overrides
            .min_overlap_part_len
            .unwrap_or(defaults.min_overlap_part_len),
        max_gap_home_des: overrides.max_gap_home_des.unwrap_or(defaults.max_gap_home_des),
        min_home_segment_len: overrides
            .min_home_segment_len
            .unwrap_or(defaults.min_home_segment_len),
        min_des_segment_len: overrides
            .min_des_segment_len
            .unwrap_or(defaults.min_des_segment_len),
        max_des_segment_len: overrides
            .max_des_segment_len
            .unwrap_or(defaults.max_des_segment_len),
    }
}

/// The same nine parameters, supplied as CLI flags. Applied over the
/// file-resolved `PipelineConfig` as the last override layer (spec.md §2:
/// "CLI flags override the file").
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineConfigOverrides {
    pub num_stayed_days_migrant: Option<usize>,
    pub num_days_missing_gap: Option<i64>,
    pub small_seg_len: Option<usize>,
    pub seg_prop: Option<f64>,
    pub min_overlap_part_len: Option<usize>,
    pub max_gap_home_des: Option<i64>,
    pub min_home_segment_len: Option<usize>,
    pub min_des_segment_len: Option<usize>,
    pub max_des_segment_len: Option<usize>,
}

impl PipelineConfigOverrides {
    fn apply(self, cfg: PipelineConfig) -> PipelineConfig {
        PipelineConfig {
            num_stayed_days_migrant: self.num_stayed_days_migrant.unwrap_or(cfg.num_stayed_days_migrant),
            num_days_missing_gap: self.num_days_missing_gap.unwrap_or(cfg.num_days_missing_gap),
            small_seg_len: self.small_seg_len.unwrap_or(cfg.small_seg_len),
            seg_prop: self.seg_prop.unwrap_or(cfg.seg_prop),
            min_overlap_part_len: self.min_overlap_part_len.unwrap_or(cfg.min_overlap_part_len),
            max_gap_home_des: self.max_gap_home_des.unwrap_or(cfg.max_gap_home_des),
            min_home_segment_len: self.min_home_segment_len.unwrap_or(cfg.min_home_segment_len),
            min_des_segment_len: self.min_des_segment_len.unwrap_or(cfg.min_des_segment_len),
            max_des_segment_len: self.max_des_segment_len.unwrap_or(cfg.max_des_segment_len),
        }
    }
}

/// Validates cross-field invariants that a plain `Option`-merge can't catch.
pub fn validate(cfg: &PipelineConfig) -> Result<()> {
    if !(0.0..=1.0).contains(&cfg.seg_prop) {
        return Err(MigratraceError::InvalidParameter {
            message: format!("seg_prop must be within 0.0..=1.0, got {}", cfg.seg_prop),
        });
    }
    if cfg.num_stayed_days_migrant == 0 {
        return Err(MigratraceError::InvalidParameter {
            message: "num_stayed_days_migrant must be > 0".to_string(),
        });
    }
    if cfg.num_days_missing_gap < 0 {
        return Err(MigratraceError::InvalidParameter {
            message: "num_days_missing_gap must be >= 0".to_string(),
        });
    }
    if cfg.max_gap_home_des < 0 {
        return Err(MigratraceError::InvalidParameter {
            message: "max_gap_home_des must be >= 0".to_string(),
        });
    }
    if cfg.min_des_segment_len > cfg.max_des_segment_len {
        return Err(MigratraceError::InvalidParameter {
            message: format!(
                "min_des_segment_len ({}) must be <= max_des_segment_len ({})",
                cfg.min_des_segment_len, cfg.max_des_segment_len
            ),
        });
    }
    Ok(())
}

/// Loads a `PipelineConfig` from a TOML file, falling back to built-in
/// defaults when `path` is the conventional default location and doesn't
/// exist (any other missing path is an error), then applies `overrides` as
/// the final layer on top.
pub fn load_pipeline_config(
    path: &Path,
    default_path: &Path,
    overrides: PipelineConfigOverrides,
) -> Result<PipelineConfig> {
    let base = if !path.exists() {
        if path == default_path {
            tracing::info!(
                path = %path.display(),
                "Pipeline config not found, using built-in defaults"
            );
            PipelineConfig::default()
        } else {
            return Err(MigratraceError::Config(format!(
                "config file {} does not exist",
                path.display()
            )));
        }
    } else {
        let raw = fs::read_to_string(path)
            .map_err(|err| MigratraceError::Config(format!("failed to read {}: {err}", path.display())))?;
        let file: PipelineConfigFile = toml::from_str(&raw)
            .map_err(|err| MigratraceError::Config(format!("failed to parse {}: {err}", path.display())))?;
        resolve(file)
    };

    let cfg = overrides.apply(base);
    validate(&cfg)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.num_stayed_days_migrant, 90);
        assert_eq!(cfg.seg_prop, 0.6);
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn rejects_out_of_range_seg_prop() {
        let mut cfg = PipelineConfig::default();
        cfg.seg_prop = 1.5;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn rejects_inverted_des_segment_bounds() {
        let mut cfg = PipelineConfig::default();
        cfg.min_des_segment_len = 20;
        cfg.max_des_segment_len = 10;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn missing_default_path_falls_back_silently() {
        let path = Path::new("config/does-not-exist.toml");
        let cfg = load_pipeline_config(path, path, PipelineConfigOverrides::default()).unwrap();
        assert_eq!(cfg, PipelineConfig::default());
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let path = Path::new("/tmp/migratrace-missing-config.toml");
        let default_path = Path::new("config/migratrace.toml");
        assert!(load_pipeline_config(path, default_path, PipelineConfigOverrides::default()).is_err());
    }

    #[test]
    fn cli_override_wins_over_default() {
        let path = Path::new("config/does-not-exist.toml");
        let overrides = PipelineConfigOverrides {
            seg_prop: Some(0.9),
            ..Default::default()
        };
        let cfg = load_pipeline_config(path, path, overrides).unwrap();
        assert_eq!(cfg.seg_prop, 0.9);
        assert_eq!(cfg.num_stayed_days_migrant, PipelineConfig::default().num_stayed_days_migrant);
    }
}
