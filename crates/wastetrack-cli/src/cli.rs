//! CLI definition using clap

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use wastetrack_app::enrichment_job::EnrichmentPolicy;
use wastetrack_app::observability::LogFormat;
use wastetrack_types::{CodeKind, DistanceUnit, OutputFormat};

#[derive(Parser)]
#[command(name = "wastetrack")]
#[command(version)]
#[command(about = "Simulated waste-collection telemetry pipeline")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file to use instead of the default location
    #[arg(long, global = true, env = "WASTETRACK_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Redis URL of the geospatial cache (database from the path)
    #[arg(long, global = true, env = "WASTETRACK_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Object storage root directory
    #[arg(long, global = true, env = "WASTETRACK_STORAGE")]
    pub storage: Option<PathBuf>,

    /// Telemetry queue directory
    #[arg(long, global = true, env = "WASTETRACK_TELEMETRY_QUEUE")]
    pub telemetry_queue: Option<PathBuf>,

    /// Geocode queue directory
    #[arg(long, global = true, env = "WASTETRACK_GEOCODE_QUEUE")]
    pub geocode_queue: Option<PathBuf>,

    /// Output format (json, table). Uses config value if not specified.
    #[arg(long, short = 'f', global = true)]
    pub format: Option<OutputFormat>,

    /// Log output format
    #[arg(long, global = true, env = "WASTETRACK_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate historical readings and publish one batch per minute
    Backfill {
        /// First slot (YYYY-MM-DDTHH:MM:SS); the first batch is the next minute
        #[arg(long, default_value = "2018-12-31T00:00:00")]
        begin: String,

        /// End of the range (YYYY-MM-DDTHH:MM:SS). Defaults to now (UTC).
        #[arg(long)]
        end: Option<String>,

        /// Load multiplier. Uses config value if not specified.
        #[arg(long, short = 'w')]
        weighting: Option<f64>,

        /// Fleet table (TOML). Uses config value if not specified.
        #[arg(long)]
        fleet: Option<PathBuf>,

        /// Seed for a reproducible run
        #[arg(long)]
        seed: Option<u64>,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Run one live tick and deliver it to raw storage
    Live {
        /// Wall-clock time to tick at (YYYY-MM-DDTHH:MM:SS). Defaults to now (UTC).
        #[arg(long)]
        at: Option<String>,

        /// Load multiplier. Uses config value if not specified.
        #[arg(long, short = 'w')]
        weighting: Option<f64>,

        /// Fleet table (TOML). Uses config value if not specified.
        #[arg(long)]
        fleet: Option<PathBuf>,
    },

    /// Queue reference postcodes and outcodes as geocode batches
    QueueGeocodes {
        /// Directory holding outcodes.csv and postcodes.csv
        #[arg(long)]
        reference_dir: Option<PathBuf>,

        /// Codes per message. Uses config value if not specified.
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Load codes into the geospatial cache
    WarmCache {
        /// Load this CSV directly instead of draining the geocode queue
        #[arg(long)]
        file: Option<PathBuf>,

        /// Kind of codes in --file. Inferred from the file name if not specified.
        #[arg(long)]
        kind: Option<CodeKind>,
    },

    /// Write queued telemetry batches to raw storage
    WriteRaw {
        /// Messages received per poll
        #[arg(long, default_value_t = 10)]
        batch: usize,
    },

    /// Enrich raw objects and write Parquet output
    Enrich {
        /// Raw object keys to enrich
        keys: Vec<String>,

        /// Enrich every raw object under this prefix (e.g. 2019/01/01/)
        #[arg(long, short = 'p')]
        prefix: Option<String>,

        /// Handling of records that cannot be enriched. Uses config value if not specified.
        #[arg(long)]
        policy: Option<EnrichmentPolicy>,
    },

    /// Merge the Parquet files of each processed partition
    Compact {
        /// Date treated as today (YYYY-MM-DD). Defaults to the current UTC date.
        #[arg(long)]
        today: Option<String>,
    },

    /// Find the nearest code to a coordinate
    Resolve {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        #[arg(long, allow_negative_numbers = true)]
        lon: f64,

        #[arg(long, default_value = "postcode")]
        kind: CodeKind,

        /// Largest radius to try. Uses config value if not specified.
        #[arg(long)]
        max_radius: Option<f64>,

        /// Radius unit. Uses config value if not specified.
        #[arg(long)]
        unit: Option<DistanceUnit>,
    },

    /// Handle a JSON pipeline event
    Dispatch {
        /// Event file, or - for stdin
        event: PathBuf,
    },

    /// Manage configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Set Redis URL
        #[arg(long)]
        set_redis_url: Option<String>,

        /// Set object storage root
        #[arg(long)]
        set_storage: Option<PathBuf>,

        /// Set reference data directory
        #[arg(long)]
        set_reference_dir: Option<PathBuf>,

        /// Set default load weighting
        #[arg(long)]
        set_weighting: Option<f64>,

        /// Set fleet table file
        #[arg(long)]
        set_fleet_file: Option<PathBuf>,

        /// Set largest search radius
        #[arg(long)]
        set_max_radius: Option<f64>,

        /// Set search radius unit
        #[arg(long)]
        set_unit: Option<DistanceUnit>,

        /// Set maximum publish attempts
        #[arg(long)]
        set_max_attempts: Option<u32>,

        /// Set enrichment policy
        #[arg(long)]
        set_enrichment_policy: Option<EnrichmentPolicy>,

        /// Require a warm index before enriching
        #[arg(long)]
        set_require_warm_index: Option<bool>,

        /// Set default output format
        #[arg(long)]
        set_output: Option<OutputFormat>,

        /// Reset to default configuration
        #[arg(long)]
        reset: bool,
    },
}
