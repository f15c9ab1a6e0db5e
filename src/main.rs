//! # Phylomotif: Parallel Motif Sampling with a Phylo-HMM
//!
//! ## Usage
//! ```bash
//! # Sample, merge own spills, write GFF
//! phylomotif --align aln.json --tree tree.json --motif motif.json \
//!     --emissions emis.json --refidx 1 --out motifs.gff
//!
//! # Merge caches from several independent runs
//! phylomotif --align aln.json --tree tree.json --motif motif.json \
//!     --caches run1.000000.cache,run2.000000.cache --out merged.gff
//!
//! # Resume an interrupted run from its manifest
//! phylomotif ... --recover-caches phylomotif_1700000000.caches
//! ```

use std::time::Instant;

use phylomotif::config::Config;
use phylomotif::pipelines::MotifPipeline;
use phylomotif::utils::telemetry::{HeartbeatConfig, HeartbeatHandle, Stage, TelemetryBlackboard};
use phylomotif::Result;
use tracing::Level;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber; `--profile` adds span close timings
fn init_logging(config: &Config) {
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer};

    let level = if config.quiet { Level::WARN } else { Level::INFO };
    let span_events = if config.profile { FmtSpan::CLOSE } else { FmtSpan::NONE };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_span_events(span_events)
                .with_target(false)
                .with_timer(fmt::time::uptime())
                .with_filter(LevelFilter::from_level(level)),
        )
        .init();
}

fn run() -> Result<()> {
    let start = Instant::now();

    let config = Config::parse_and_validate()?;
    init_logging(&config);
    if config.profile {
        eprintln!("=== Profiling enabled ===\n");
    }

    if !config.quiet {
        eprintln!("Phylomotif v{}", env!("CARGO_PKG_VERSION"));
        eprintln!("Threads: {}", config.nthreads());
        eprintln!("Mode: {:?}", config.run_mode());
    }

    let telemetry = TelemetryBlackboard::new();
    let heartbeat = if config.quiet {
        None
    } else {
        Some(HeartbeatHandle::spawn(telemetry.clone(), HeartbeatConfig::default())?)
    };

    let quiet = config.quiet;
    let mut pipeline = MotifPipeline::new(config, Some(telemetry.clone()));
    let result = pipeline.run();

    telemetry.set_stage(Stage::Complete);
    if let Some(heartbeat) = heartbeat {
        heartbeat.shutdown();
    }
    let report = result?;

    if !quiet {
        let mut notes = Vec::new();
        if report.failed_blocks > 0 {
            notes.push(format!("{} blocks failed", report.failed_blocks));
        }
        if report.n_unmapped > 0 {
            notes.push(format!("{} keys unmapped", report.n_unmapped));
        }
        eprintln!(
            "\n{} features from {} keys over {} samples{}",
            report.n_features,
            report.n_keys,
            report.n_samples,
            if notes.is_empty() {
                String::new()
            } else {
                format!(" ({})", notes.join(", "))
            }
        );
        eprintln!("Completed in {:.2}s", start.elapsed().as_secs_f64());
    }

    Ok(())
}
