//! Command implementations

use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, Timelike, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use wastetrack_app::backfill::BackfillScheduler;
use wastetrack_app::cache_loader::{queue_geocodes, warm_from_csv, warm_from_queue};
use wastetrack_app::compaction::Compactor;
use wastetrack_app::config::Config;
use wastetrack_app::enrichment_job::{check_index_ready, EnrichmentJob, EnrichmentPolicy};
use wastetrack_app::events::{dispatch, PipelineContext, PipelineEvent};
use wastetrack_app::historical_writer::drain_to_raw;
use wastetrack_app::live::{run_live_tick, DeliveryStreamSink};
use wastetrack_app::observability::{init_logging, pipeline_span};
use wastetrack_app::repository::{
    open_geo_index, open_geocode_queue, open_object_store, open_telemetry_queue,
};
use wastetrack_domain::model::{FleetConfig, TimeSlot};
use wastetrack_domain::repository::GeoIndex;
use wastetrack_domain::service::{ProximityResolver, TruckSimulation};
use wastetrack_types::{
    CodeKind, DistanceUnit, Error, GeoPoint, OutputFormat, Result, TIMESLOT_FORMAT,
};

use crate::cli::{Cli, Commands};
use crate::output;

/// Receive batch size used when draining the geocode queue
const GEOCODE_RECEIVE_BATCH: usize = 10;

fn parse_time(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESLOT_FORMAT).map_err(|e| {
        Error::InvalidInput(format!("invalid time '{value}' (expected YYYY-MM-DDTHH:MM:SS): {e}"))
    })
}

fn now_utc() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    now.with_nanosecond(0).unwrap_or(now)
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config_file {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

pub fn execute(cli: Cli) -> Result<()> {
    init_logging(cli.log_format);

    // Load config
    let mut config = load_config(&cli)?;

    // Override from CLI args
    if let Some(ref url) = cli.redis_url {
        config.redis_url = url.clone();
    }
    if cli.storage.is_some() {
        config.storage_root = cli.storage.clone();
    }
    if cli.telemetry_queue.is_some() {
        config.telemetry_queue_dir = cli.telemetry_queue.clone();
    }
    if cli.geocode_queue.is_some() {
        config.geocode_queue_dir = cli.geocode_queue.clone();
    }
    let output_format = cli.format.unwrap_or(config.output_format);

    if !matches!(cli.command, Commands::Config { .. }) {
        config.validate()?;
    }

    match &cli.command {
        Commands::Backfill {
            begin,
            end,
            weighting,
            fleet,
            seed,
            no_progress,
        } => cmd_backfill(
            &config,
            begin,
            end.as_deref(),
            *weighting,
            fleet.as_deref(),
            *seed,
            *no_progress,
            output_format,
        ),

        Commands::Live {
            at,
            weighting,
            fleet,
        } => cmd_live(&config, at.as_deref(), *weighting, fleet.as_deref(), output_format),

        Commands::QueueGeocodes {
            reference_dir,
            batch_size,
        } => cmd_queue_geocodes(&config, reference_dir.clone(), *batch_size, output_format),

        Commands::WarmCache { file, kind } => {
            cmd_warm_cache(&config, file.as_deref(), *kind, output_format)
        }

        Commands::WriteRaw { batch } => cmd_write_raw(&config, *batch, output_format),

        Commands::Enrich {
            keys,
            prefix,
            policy,
        } => cmd_enrich(&config, keys, prefix.as_deref(), *policy, output_format),

        Commands::Compact { today } => cmd_compact(&config, today.as_deref(), output_format),

        Commands::Resolve {
            lat,
            lon,
            kind,
            max_radius,
            unit,
        } => cmd_resolve(&config, GeoPoint::new(*lat, *lon), *kind, *max_radius, *unit, output_format),

        Commands::Dispatch { event } => cmd_dispatch(&config, event, output_format),

        Commands::Config {
            show,
            set_redis_url,
            set_storage,
            set_reference_dir,
            set_weighting,
            set_fleet_file,
            set_max_radius,
            set_unit,
            set_max_attempts,
            set_enrichment_policy,
            set_require_warm_index,
            set_output,
            reset,
        } => cmd_config(
            cli.config_file.as_deref(),
            *show,
            ConfigUpdate {
                redis_url: set_redis_url.clone(),
                storage: set_storage.clone(),
                reference_dir: set_reference_dir.clone(),
                weighting: *set_weighting,
                fleet_file: set_fleet_file.clone(),
                max_radius: *set_max_radius,
                unit: *set_unit,
                max_attempts: *set_max_attempts,
                enrichment_policy: *set_enrichment_policy,
                require_warm_index: *set_require_warm_index,
                output: *set_output,
            },
            *reset,
        ),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_backfill(
    config: &Config,
    begin: &str,
    end: Option<&str>,
    weighting: Option<f64>,
    fleet: Option<&Path>,
    seed: Option<u64>,
    no_progress: bool,
    output_format: OutputFormat,
) -> Result<()> {
    let begin = parse_time(begin)?;
    let end = match end {
        Some(end) => parse_time(end)?,
        None => now_utc(),
    };
    let fleet = match fleet {
        Some(path) => FleetConfig::load_from_file(path)?,
        None => config.fleet()?,
    };
    let weighting = weighting.unwrap_or(config.weighting);
    let simulation = match seed {
        Some(seed) => TruckSimulation::with_seed(&fleet, weighting, seed)?,
        None => TruckSimulation::new(&fleet, weighting)?,
    };

    let queue = open_telemetry_queue(config)?;
    let span = pipeline_span("backfill", &begin.to_string());
    let _guard = span.enter();

    let pb = if no_progress || begin >= end {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(TimeSlot::count_ticks(begin, end))
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let mut scheduler = BackfillScheduler::new(simulation, &queue, config.retry)?;
    let result = scheduler.run_with_progress(begin, end, |progress| {
        pb.set_position(progress.batch);
        pb.set_message(progress.slot.to_iso());
    });
    pb.finish_and_clear();

    output::output_backfill(output_format, &result?)
}

fn cmd_live(
    config: &Config,
    at: Option<&str>,
    weighting: Option<f64>,
    fleet: Option<&Path>,
    output_format: OutputFormat,
) -> Result<()> {
    let now = match at {
        Some(at) => parse_time(at)?,
        None => now_utc(),
    };
    let fleet = match fleet {
        Some(path) => FleetConfig::load_from_file(path)?,
        None => config.fleet()?,
    };
    let mut simulation = TruckSimulation::new(&fleet, weighting.unwrap_or(config.weighting))?;
    let store = open_object_store(config)?;
    let sink = DeliveryStreamSink::new(&store);

    let span = pipeline_span("live", &now.to_string());
    let _guard = span.enter();
    let events = run_live_tick(&mut simulation, now, &sink)?;
    output::output_live(output_format, &now.format(TIMESLOT_FORMAT).to_string(), events)
}

fn cmd_queue_geocodes(
    config: &Config,
    reference_dir: Option<PathBuf>,
    batch_size: Option<usize>,
    output_format: OutputFormat,
) -> Result<()> {
    let reference_dir = reference_dir.unwrap_or_else(|| config.reference_dir.clone());
    let batch_size = batch_size.unwrap_or(config.geocode_batch_size);
    let queue = open_geocode_queue(config)?;

    let span = pipeline_span("queue-geocodes", &reference_dir.display().to_string());
    let _guard = span.enter();
    let report = queue_geocodes(&queue, &reference_dir, batch_size, &config.retry)?;
    output::output_queue_report(output_format, &report)
}

fn cmd_warm_cache(
    config: &Config,
    file: Option<&Path>,
    kind: Option<CodeKind>,
    output_format: OutputFormat,
) -> Result<()> {
    let index = open_geo_index(config)?;
    let span = pipeline_span("warm-cache", &config.redis_url);
    let _guard = span.enter();

    let report = match file {
        Some(path) => warm_from_csv(&index, path, kind, config.geocode_batch_size)?,
        None => {
            let queue = open_geocode_queue(config)?;
            let requeued = queue.requeue_in_flight()?;
            if requeued > 0 {
                info!(requeued, "retrying geocode batches left unacknowledged");
            }
            warm_from_queue(&index, &queue, GEOCODE_RECEIVE_BATCH)?
        }
    };
    output::output_warm_report(output_format, &report)
}

fn cmd_write_raw(config: &Config, batch: usize, output_format: OutputFormat) -> Result<()> {
    let store = open_object_store(config)?;
    let queue = open_telemetry_queue(config)?;
    let span = pipeline_span("write-raw", &store.root().display().to_string());
    let _guard = span.enter();

    let requeued = queue.requeue_in_flight()?;
    if requeued > 0 {
        info!(requeued, "retrying telemetry batches left unacknowledged");
    }
    let report = drain_to_raw(&store, &queue, batch)?;
    output::output_writer_report(output_format, &report)
}

fn cmd_enrich(
    config: &Config,
    keys: &[String],
    prefix: Option<&str>,
    policy: Option<EnrichmentPolicy>,
    output_format: OutputFormat,
) -> Result<()> {
    if keys.is_empty() && prefix.is_none() {
        return Err(Error::InvalidInput(
            "give raw object keys or --prefix".to_string(),
        ));
    }
    let index = open_geo_index(config)?;
    check_index_ready(&index, config.require_warm_index)?;
    let store = open_object_store(config)?;
    let job = EnrichmentJob::new(
        &store,
        &index,
        config.search,
        policy.unwrap_or(config.enrichment_policy),
    )?;

    let span = pipeline_span("enrich", prefix.unwrap_or("keys"));
    let _guard = span.enter();
    let mut outcomes = Vec::new();
    for key in keys {
        outcomes.push(job.enrich_object(key)?);
    }
    if let Some(prefix) = prefix {
        outcomes.extend(job.enrich_prefix(prefix)?);
    }
    output::output_enrichment(output_format, &outcomes)
}

fn cmd_compact(config: &Config, today: Option<&str>, output_format: OutputFormat) -> Result<()> {
    let today = match today {
        Some(day) => NaiveDate::parse_from_str(day.trim(), "%Y-%m-%d")
            .map_err(|e| Error::InvalidInput(format!("invalid date '{day}': {e}")))?,
        None => Utc::now().date_naive(),
    };
    let store = open_object_store(config)?;
    let span = pipeline_span("compact", &today.to_string());
    let _guard = span.enter();

    let report = Compactor::new(&store, config.lease_ttl()).compact_all(today)?;
    output::output_compaction(output_format, &report)
}

fn cmd_resolve(
    config: &Config,
    point: GeoPoint,
    kind: CodeKind,
    max_radius: Option<f64>,
    unit: Option<DistanceUnit>,
    output_format: OutputFormat,
) -> Result<()> {
    if !point.is_valid() {
        return Err(Error::InvalidInput(format!(
            "coordinate ({}, {}) is out of range",
            point.lat, point.lon
        )));
    }
    let mut policy = config.search;
    if let Some(max_radius) = max_radius {
        policy.max_radius = max_radius;
    }
    if let Some(unit) = unit {
        policy.unit = unit;
    }

    let index = open_geo_index(config)?;
    let resolver = ProximityResolver::new(&index, policy)?;
    let nearest = resolver.resolve_nearest(point, kind)?;
    let position = match &nearest {
        Some(found) => index.lookup(kind, &found.code)?,
        None => None,
    };
    output::output_resolution(output_format, point, kind, &policy, nearest.as_ref(), position)
}

fn cmd_dispatch(config: &Config, event: &Path, output_format: OutputFormat) -> Result<()> {
    let json = if event == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(event)?
    };
    let events = PipelineEvent::parse_all(&json)?;

    let store = open_object_store(config)?;
    let telemetry_queue = open_telemetry_queue(config)?;
    let index = if events.iter().any(PipelineEvent::needs_index) {
        Some(open_geo_index(config)?)
    } else {
        None
    };
    let ctx = PipelineContext {
        config,
        store: &store,
        telemetry_queue: &telemetry_queue,
        index: index.as_ref().map(|i| i as &dyn GeoIndex),
        now: now_utc(),
    };

    let mut outcomes = Vec::new();
    for event in events {
        let span = pipeline_span("dispatch", event.name());
        let _guard = span.enter();
        outcomes.push(dispatch(event, &ctx)?);
    }
    output::output_dispatch(output_format, &outcomes)
}

/// Values given to `config --set-*`
struct ConfigUpdate {
    redis_url: Option<String>,
    storage: Option<PathBuf>,
    reference_dir: Option<PathBuf>,
    weighting: Option<f64>,
    fleet_file: Option<PathBuf>,
    max_radius: Option<f64>,
    unit: Option<DistanceUnit>,
    max_attempts: Option<u32>,
    enrichment_policy: Option<EnrichmentPolicy>,
    require_warm_index: Option<bool>,
    output: Option<OutputFormat>,
}

impl ConfigUpdate {
    /// Apply the update, returning whether anything changed
    fn apply(self, config: &mut Config) -> bool {
        let mut modified = false;

        if let Some(url) = self.redis_url {
            config.redis_url = url;
            modified = true;
        }
        if let Some(dir) = self.storage {
            config.storage_root = Some(dir);
            modified = true;
        }
        if let Some(dir) = self.reference_dir {
            config.reference_dir = dir;
            modified = true;
        }
        if let Some(weighting) = self.weighting {
            config.weighting = weighting;
            modified = true;
        }
        if let Some(path) = self.fleet_file {
            config.fleet_file = Some(path);
            modified = true;
        }
        if let Some(max_radius) = self.max_radius {
            config.search.max_radius = max_radius;
            modified = true;
        }
        if let Some(unit) = self.unit {
            config.search.unit = unit;
            modified = true;
        }
        if let Some(attempts) = self.max_attempts {
            config.retry.max_attempts = attempts;
            modified = true;
        }
        if let Some(policy) = self.enrichment_policy {
            config.enrichment_policy = policy;
            modified = true;
        }
        if let Some(required) = self.require_warm_index {
            config.require_warm_index = required;
            modified = true;
        }
        if let Some(format) = self.output {
            config.output_format = format;
            modified = true;
        }

        modified
    }
}

fn cmd_config(path: Option<&Path>, show: bool, update: ConfigUpdate, reset: bool) -> Result<()> {
    let save = |config: &Config| match path {
        Some(path) => config.save_to(path),
        None => config.save(),
    };

    if reset {
        let config = Config::default();
        save(&config)?;
        println!("Configuration reset to defaults");
        println!("\n{}", config);
        return Ok(());
    }

    let mut config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let modified = update.apply(&mut config);

    if modified {
        config.validate()?;
        save(&config)?;
        println!("Configuration updated");
    }

    if show || !modified {
        println!("{}", config);
    }

    Ok(())
}
