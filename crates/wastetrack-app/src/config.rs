//! Configuration management for wastetrack
//!
//! Config stored at: ~/.config/wastetrack/config.json

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use wastetrack_domain::model::FleetConfig;
use wastetrack_domain::service::SearchPolicy;
use wastetrack_types::{ConfigError, Error, OutputFormat, Result};

use crate::cache_loader::DEFAULT_GEOCODE_BATCH_SIZE;
use crate::enrichment_job::EnrichmentPolicy;
use crate::retry::RetryPolicy;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Redis URL of the geospatial cache; the path selects the database
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default = "default_redis_timeout_ms")]
    pub redis_timeout_ms: u64,

    /// Object storage root override
    #[serde(default)]
    pub storage_root: Option<PathBuf>,

    /// Telemetry batch queue directory override
    #[serde(default)]
    pub telemetry_queue_dir: Option<PathBuf>,

    /// Geocode batch queue directory override
    #[serde(default)]
    pub geocode_queue_dir: Option<PathBuf>,

    /// Directory holding `postcodes.csv` and `outcodes.csv`
    #[serde(default = "default_reference_dir")]
    pub reference_dir: PathBuf,

    /// Multiplier applied to every simulated load
    #[serde(default = "default_weighting")]
    pub weighting: f64,

    /// Fleet table override (TOML); the built-in five-city fleet otherwise
    #[serde(default)]
    pub fleet_file: Option<PathBuf>,

    #[serde(default)]
    pub search: SearchPolicy,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub enrichment_policy: EnrichmentPolicy,

    #[serde(default = "default_geocode_batch_size")]
    pub geocode_batch_size: usize,

    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,

    /// Refuse to enrich against an empty index
    #[serde(default)]
    pub require_warm_index: bool,

    /// Default output format (json, table)
    #[serde(default = "default_output_format")]
    pub output_format: OutputFormat,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/2".to_string()
}

fn default_redis_timeout_ms() -> u64 {
    2_000
}

fn default_reference_dir() -> PathBuf {
    PathBuf::from("refdata")
}

fn default_weighting() -> f64 {
    1.0
}

fn default_geocode_batch_size() -> usize {
    DEFAULT_GEOCODE_BATCH_SIZE
}

fn default_lease_ttl_secs() -> u64 {
    300
}

fn default_output_format() -> OutputFormat {
    OutputFormat::Table
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            redis_timeout_ms: default_redis_timeout_ms(),
            storage_root: None,
            telemetry_queue_dir: None,
            geocode_queue_dir: None,
            reference_dir: default_reference_dir(),
            weighting: default_weighting(),
            fleet_file: None,
            search: SearchPolicy::default(),
            retry: RetryPolicy::default(),
            enrichment_policy: EnrichmentPolicy::default(),
            geocode_batch_size: default_geocode_batch_size(),
            lease_ttl_secs: default_lease_ttl_secs(),
            require_warm_index: false,
            output_format: default_output_format(),
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or(ConfigError::NotFound)?
            .join("wastetrack");
        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    fn data_dir() -> Result<PathBuf> {
        Ok(dirs::data_dir()
            .ok_or(ConfigError::NotFound)?
            .join("wastetrack"))
    }

    /// Object storage root
    pub fn storage_root(&self) -> Result<PathBuf> {
        match &self.storage_root {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::data_dir()?.join("storage")),
        }
    }

    pub fn telemetry_queue_dir(&self) -> Result<PathBuf> {
        match &self.telemetry_queue_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::data_dir()?.join("queues").join("telemetry")),
        }
    }

    pub fn geocode_queue_dir(&self) -> Result<PathBuf> {
        match &self.geocode_queue_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::data_dir()?.join("queues").join("geocodes")),
        }
    }

    pub fn redis_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_timeout_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    /// Fleet from `fleet_file`, or the built-in table
    pub fn fleet(&self) -> Result<FleetConfig> {
        match &self.fleet_file {
            Some(path) => FleetConfig::load_from_file(path),
            None => Ok(FleetConfig::default()),
        }
    }

    /// Reject values no pipeline stage can work with
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Error { ConfigError::Invalid(msg).into() };
        if !self.weighting.is_finite() || self.weighting < 0.0 {
            return Err(invalid(format!("weighting must be non-negative, got {}", self.weighting)));
        }
        if self.geocode_batch_size == 0 {
            return Err(invalid("geocode batch size must be positive".into()));
        }
        self.search
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.retry
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    /// Load config from file, or create default
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .map_err(|e| ConfigError::SaveError(format!("{}: {e}", path.display())))?;
        Ok(())
    }
}

fn display_path(path: Result<PathBuf>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|_| "(error)".to_string())
}

impl std::fmt::Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Wastetrack Configuration")?;
        writeln!(f, "========================")?;
        writeln!(f)?;
        writeln!(f, "Redis URL:          {}", self.redis_url)?;
        writeln!(f, "Redis timeout:      {} ms", self.redis_timeout_ms)?;
        writeln!(f, "Storage root:       {}", display_path(self.storage_root()))?;
        writeln!(f, "Telemetry queue:    {}", display_path(self.telemetry_queue_dir()))?;
        writeln!(f, "Geocode queue:      {}", display_path(self.geocode_queue_dir()))?;
        writeln!(f, "Reference data:     {}", self.reference_dir.display())?;
        writeln!(f, "Weighting:          {}", self.weighting)?;
        writeln!(
            f,
            "Fleet file:         {}",
            self.fleet_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(built-in)".to_string())
        )?;
        writeln!(
            f,
            "Search radius:      {} to {} {} (step {})",
            self.search.initial_radius, self.search.max_radius, self.search.unit, self.search.radius_step
        )?;
        writeln!(
            f,
            "Publish retry:      {} attempts, {}-{} ms backoff, {} ms deadline",
            self.retry.max_attempts,
            self.retry.initial_backoff_ms,
            self.retry.max_backoff_ms,
            self.retry.deadline_ms
        )?;
        writeln!(f, "Enrichment policy:  {}", self.enrichment_policy)?;
        writeln!(f, "Geocode batch size: {}", self.geocode_batch_size)?;
        writeln!(f, "Lease TTL:          {} s", self.lease_ttl_secs)?;
        writeln!(f, "Require warm index: {}", self.require_warm_index)?;
        writeln!(f, "Output format:      {}", self.output_format)?;

        if let Ok(path) = Self::config_path() {
            writeln!(f)?;
            writeln!(f, "Config file:        {}", path.display())?;
        }

        Ok(())
    }
}
