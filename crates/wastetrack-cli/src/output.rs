//! Output formatting module

use serde::Serialize;
use serde_json::json;

use wastetrack_app::backfill::BackfillReport;
use wastetrack_app::cache_loader::{QueueReport, WarmReport};
use wastetrack_app::compaction::CompactionReport;
use wastetrack_app::enrichment_job::EnrichmentOutcome;
use wastetrack_app::events::DispatchOutcome;
use wastetrack_app::historical_writer::WriterReport;
use wastetrack_domain::service::{NearestCode, SearchPolicy};
use wastetrack_types::{CodeKind, GeoPoint, OutputFormat, Result};

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    println!("{}", content);
    Ok(())
}

pub fn output_backfill(output_format: OutputFormat, report: &BackfillReport) -> Result<()> {
    if output_format == OutputFormat::Json {
        return print_json(report);
    }
    println!("\nBackfill");
    println!("========");
    println!("Batches:         {}", report.batches);
    println!("Readings:        {}", report.events);
    println!("Retries:         {}", report.retries);
    if let (Some(first), Some(last)) = (&report.first_slot, &report.last_slot) {
        println!("Slots:           {} .. {}", first, last);
    }
    Ok(())
}

pub fn output_live(output_format: OutputFormat, at: &str, events: usize) -> Result<()> {
    if output_format == OutputFormat::Json {
        return print_json(&json!({ "at": at, "events": events }));
    }
    if events == 0 {
        println!("{} is outside the working day, nothing published", at);
    } else {
        println!("Published {} reading(s) for {}", events, at);
    }
    Ok(())
}

pub fn output_queue_report(output_format: OutputFormat, report: &QueueReport) -> Result<()> {
    if output_format == OutputFormat::Json {
        return print_json(report);
    }
    println!(
        "Queued {} code(s) in {} geocode message(s)",
        report.codes, report.messages
    );
    Ok(())
}

pub fn output_warm_report(output_format: OutputFormat, report: &WarmReport) -> Result<()> {
    if output_format == OutputFormat::Json {
        return print_json(report);
    }
    println!("\nGeospatial Cache");
    println!("================");
    println!("Outcodes loaded: {}", report.outcodes);
    println!("Postcodes loaded: {}", report.postcodes);
    if report.rejected > 0 {
        println!("Rejected:        {} (left on the queue)", report.rejected);
    }
    Ok(())
}

pub fn output_writer_report(output_format: OutputFormat, report: &WriterReport) -> Result<()> {
    if output_format == OutputFormat::Json {
        return print_json(report);
    }
    for key in &report.keys {
        println!("  {}", key);
    }
    println!(
        "Wrote {} raw object(s), {} left for redelivery",
        report.written, report.failed
    );
    Ok(())
}

pub fn output_enrichment(output_format: OutputFormat, outcomes: &[EnrichmentOutcome]) -> Result<()> {
    if output_format == OutputFormat::Json {
        return print_json(outcomes);
    }
    if outcomes.is_empty() {
        println!("No raw objects to enrich.");
        return Ok(());
    }

    println!(
        "{:<72} {:>8} {:>9} {:>6}",
        "Source", "Records", "Sentinel", "Dead"
    );
    println!("{}", "-".repeat(98));
    for outcome in outcomes {
        println!(
            "{:<72} {:>8} {:>9} {:>6}",
            outcome.source_key, outcome.enriched, outcome.sentinel_postcodes, outcome.dead_lettered
        );
        if let Some(ref key) = outcome.output_key {
            println!("  -> {}", key);
        }
        if let Some(ref key) = outcome.dead_letter_key {
            println!("  !! {}", key);
        }
    }

    let records: usize = outcomes.iter().map(|o| o.enriched).sum();
    let dead: usize = outcomes.iter().map(|o| o.dead_lettered).sum();
    println!(
        "\nTotal: {} object(s), {} record(s), {} dead-lettered",
        outcomes.len(),
        records,
        dead
    );
    Ok(())
}

pub fn output_compaction(output_format: OutputFormat, report: &CompactionReport) -> Result<()> {
    if output_format == OutputFormat::Json {
        return print_json(report);
    }
    if report.compacted.is_empty() {
        println!("Nothing to compact.");
    } else {
        println!("{:<16} {:>6} {:>8}  Output", "Partition", "Files", "Rows");
        println!("{}", "-".repeat(80));
        for part in &report.compacted {
            println!(
                "{:<16} {:>6} {:>8}  {}",
                part.partition, part.merged_files, part.rows, part.output_key
            );
        }
    }
    if report.skipped_today > 0 {
        println!("Skipped {} partition(s) of today", report.skipped_today);
    }
    if report.skipped_leased > 0 {
        println!(
            "Skipped {} partition(s) leased by another compactor",
            report.skipped_leased
        );
    }
    if report.skipped_unchanged > 0 {
        println!(
            "Skipped {} partition(s) already compacted by another sweep",
            report.skipped_unchanged
        );
    }
    Ok(())
}

pub fn output_resolution(
    output_format: OutputFormat,
    point: GeoPoint,
    kind: CodeKind,
    policy: &SearchPolicy,
    nearest: Option<&NearestCode>,
    position: Option<GeoPoint>,
) -> Result<()> {
    if output_format == OutputFormat::Json {
        let found = nearest.map(|n| {
            json!({
                "code": n.code,
                "distance": n.distance,
                "radius": n.radius,
                "position": position,
            })
        });
        return print_json(&json!({
            "query": point,
            "kind": kind,
            "unit": policy.unit,
            "nearest": found,
        }));
    }

    match nearest {
        Some(n) => {
            println!("Nearest {}:  {}", kind, n.code);
            println!("Distance:    {:.3} {}", n.distance, policy.unit);
            println!("Radius:      {} {}", n.radius, policy.unit);
            if let Some(p) = position {
                println!("Position:    {:.6}, {:.6}", p.lat, p.lon);
            }
        }
        None => println!(
            "No {} within {} {} of {:.6}, {:.6}",
            kind, policy.max_radius, policy.unit, point.lat, point.lon
        ),
    }
    Ok(())
}

pub fn output_dispatch(output_format: OutputFormat, outcomes: &[DispatchOutcome]) -> Result<()> {
    if output_format == OutputFormat::Json {
        return print_json(outcomes);
    }
    for outcome in outcomes {
        println!("{}", outcome);
    }
    Ok(())
}
