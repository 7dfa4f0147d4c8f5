use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{aggregate::DEFAULT_WINDOW_MONTHS, spatial::Crs, transform::PanelAssumptions};

pub const CONFIG_ENV_VAR: &str = "SOLAR_PIPELINE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "solar-pipeline.toml";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct IrradianceConfig {
    pub input_dir: PathBuf,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// When set, the combined and sorted sample table is also written here.
    pub samples_output: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RatesConfig {
    pub path: PathBuf,
    #[serde(default = "default_month_column")]
    pub month_column: String,
    pub rate_column: String,
    #[serde(default)]
    pub skip_rows: usize,
    #[serde(default = "default_window_months")]
    pub window_months: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoundariesConfig {
    pub path: PathBuf,
    #[serde(default = "default_name_field")]
    pub name_field: String,
    /// Overrides the `.prj` sidecar.
    pub crs: Option<Crs>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FootprintsConfig {
    pub path: PathBuf,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_footprint_crs")]
    pub crs: Crs,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinConfig {
    /// In working-reference units (degrees).
    #[serde(default = "default_max_distance")]
    pub max_distance: f64,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            max_distance: default_max_distance(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub dir: PathBuf,
    #[serde(default = "default_simplify_tolerance")]
    pub simplify_tolerance: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Relative paths below are resolved against this directory.
    #[serde(default)]
    pub base_dir: PathBuf,
    #[serde(default = "default_target_cities")]
    pub target_cities: Vec<String>,
    pub irradiance: IrradianceConfig,
    pub rates: RatesConfig,
    pub boundaries: BoundariesConfig,
    pub footprints: FootprintsConfig,
    #[serde(default)]
    pub join: JoinConfig,
    #[serde(default)]
    pub panel: PanelAssumptions,
    pub output: OutputConfig,
    pub metrics: Option<MetricsConfig>,
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

fn default_month_column() -> String {
    "Month".to_string()
}

fn default_window_months() -> usize {
    DEFAULT_WINDOW_MONTHS
}

fn default_name_field() -> String {
    "NAME".to_string()
}

fn default_chunk_size() -> usize {
    100_000
}

fn default_footprint_crs() -> Crs {
    Crs::Wgs84
}

fn default_max_distance() -> f64 {
    0.045
}

fn default_simplify_tolerance() -> f64 {
    0.0001
}

fn default_target_cities() -> Vec<String> {
    ["Phoenix", "Tucson", "Tempe", "Mesa", "Flagstaff"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl AppConfig {
    /// Load from the file named by `SOLAR_PIPELINE_CONFIG`, or `solar-pipeline.toml`.
    pub fn load() -> Result<Self, ConfigError> {
        use std::env;

        let path = env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_file(Path::new(&path))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.target_cities.is_empty() {
            return invalid("target_cities must name at least one city");
        }
        if self.irradiance.workers == 0 {
            return invalid("irradiance.workers must be at least 1");
        }
        if self.rates.window_months == 0 {
            return invalid("rates.window_months must be at least 1");
        }
        if self.footprints.chunk_size == 0 {
            return invalid("footprints.chunk_size must be at least 1");
        }
        if !(self.join.max_distance >= 0.0 && self.join.max_distance.is_finite()) {
            return invalid("join.max_distance must be a non-negative number");
        }
        if !(self.output.simplify_tolerance >= 0.0 && self.output.simplify_tolerance.is_finite()) {
            return invalid("output.simplify_tolerance must be a non-negative number");
        }
        Ok(())
    }

    /// `path` relative to `base_dir`; absolute paths are returned as is.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}
