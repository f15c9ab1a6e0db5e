//! # Telemetry Blackboard
//!
//! Thread-safe progress tracking for sampling sessions.
//! Uses atomic counters that can be cheaply updated from rayon workers.
//!
//! The blackboard pattern decouples work execution from progress reporting:
//! - Worker threads update atomic counters with minimal overhead
//! - A background heartbeat thread periodically reads and reports progress

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Processing stage for high-level progress tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Stage {
    Initializing = 0,
    LoadingInputs = 1,
    ComputingEmissions = 2,
    Sampling = 3,
    Merging = 4,
    Emitting = 5,
    WritingOutput = 6,
    Complete = 7,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Initializing => "Initializing",
            Stage::LoadingInputs => "Loading Inputs",
            Stage::ComputingEmissions => "Emissions",
            Stage::Sampling => "Sampling",
            Stage::Merging => "Merging Caches",
            Stage::Emitting => "Emitting Features",
            Stage::WritingOutput => "Writing Output",
            Stage::Complete => "Complete",
        }
    }

    fn from_u64(val: u64) -> Self {
        match val {
            0 => Stage::Initializing,
            1 => Stage::LoadingInputs,
            2 => Stage::ComputingEmissions,
            3 => Stage::Sampling,
            4 => Stage::Merging,
            5 => Stage::Emitting,
            6 => Stage::WritingOutput,
            _ => Stage::Complete,
        }
    }
}

/// Session-wide progress counters.
///
/// All fields use relaxed ordering; the heartbeat only needs approximate values.
pub struct TelemetryBlackboard {
    stage: AtomicU64,

    // --- Units of work ---
    units_done: AtomicU64,
    units_failed: AtomicU64,
    total_units: AtomicU64,

    // --- Recorded block-samples ---
    samples_recorded: AtomicU64,
    total_samples: AtomicU64,

    // --- Spills / merges ---
    caches_written: AtomicU64,
    caches_merged: AtomicU64,

    start_time: Instant,
    last_progress_nanos: AtomicU64,
    shutdown: AtomicBool,
}

impl TelemetryBlackboard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[inline]
    pub fn set_stage(&self, stage: Stage) {
        self.stage.store(stage as u64, Ordering::Relaxed);
        self.touch_progress();
    }

    #[inline]
    pub fn stage(&self) -> Stage {
        Stage::from_u64(self.stage.load(Ordering::Relaxed))
    }

    /// Declare the expected amount of work
    pub fn set_totals(&self, units: u64, samples: u64) {
        self.total_units.store(units, Ordering::Relaxed);
        self.total_samples.store(samples, Ordering::Relaxed);
    }

    #[inline]
    pub fn unit_done(&self, failed: bool) {
        self.units_done.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.units_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.touch_progress();
    }

    #[inline]
    pub fn add_samples(&self, n: u64) {
        self.samples_recorded.fetch_add(n, Ordering::Relaxed);
        self.touch_progress();
    }

    #[inline]
    pub fn cache_written(&self) {
        self.caches_written.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn cache_merged(&self) {
        self.caches_merged.fetch_add(1, Ordering::Relaxed);
        self.touch_progress();
    }

    pub fn units_done(&self) -> u64 {
        self.units_done.load(Ordering::Relaxed)
    }

    pub fn samples_recorded(&self) -> u64 {
        self.samples_recorded.load(Ordering::Relaxed)
    }

    pub fn caches_written(&self) -> u64 {
        self.caches_written.load(Ordering::Relaxed)
    }

    #[inline]
    fn touch_progress(&self) {
        let elapsed = self.start_time.elapsed().as_nanos() as u64;
        self.last_progress_nanos.store(elapsed, Ordering::Relaxed);
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            stage: self.stage(),
            units_done: self.units_done.load(Ordering::Relaxed),
            units_failed: self.units_failed.load(Ordering::Relaxed),
            total_units: self.total_units.load(Ordering::Relaxed),
            samples_recorded: self.samples_recorded.load(Ordering::Relaxed),
            total_samples: self.total_samples.load(Ordering::Relaxed),
            caches_written: self.caches_written.load(Ordering::Relaxed),
            caches_merged: self.caches_merged.load(Ordering::Relaxed),
            elapsed_secs: self.elapsed_secs(),
            last_progress_nanos: self.last_progress_nanos.load(Ordering::Relaxed),
            current_nanos: self.start_time.elapsed().as_nanos() as u64,
        }
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

impl Default for TelemetryBlackboard {
    fn default() -> Self {
        Self {
            stage: AtomicU64::new(Stage::Initializing as u64),
            units_done: AtomicU64::new(0),
            units_failed: AtomicU64::new(0),
            total_units: AtomicU64::new(0),
            samples_recorded: AtomicU64::new(0),
            total_samples: AtomicU64::new(0),
            caches_written: AtomicU64::new(0),
            caches_merged: AtomicU64::new(0),
            start_time: Instant::now(),
            last_progress_nanos: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }
    }
}

struct TelemetrySnapshot {
    stage: Stage,
    units_done: u64,
    units_failed: u64,
    total_units: u64,
    samples_recorded: u64,
    total_samples: u64,
    caches_written: u64,
    caches_merged: u64,
    elapsed_secs: f64,
    last_progress_nanos: u64,
    current_nanos: u64,
}

/// Heartbeat output configuration
pub struct HeartbeatConfig {
    /// Interval between heartbeats (seconds)
    pub interval_secs: u64,
    /// Stall warning threshold (seconds with no progress)
    pub stall_threshold_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            stall_threshold_secs: 300,
        }
    }
}

/// Handle to the heartbeat thread
pub struct HeartbeatHandle {
    handle: Option<JoinHandle<()>>,
    blackboard: Arc<TelemetryBlackboard>,
}

impl HeartbeatHandle {
    /// Spawn the heartbeat thread
    pub fn spawn(blackboard: Arc<TelemetryBlackboard>, config: HeartbeatConfig) -> io::Result<Self> {
        let bb = blackboard.clone();
        let is_tty = io::stderr().is_terminal();

        let handle = thread::Builder::new()
            .name("heartbeat".to_string())
            .spawn(move || {
                heartbeat_loop(bb, config, is_tty);
            })?;

        Ok(Self {
            handle: Some(handle),
            blackboard,
        })
    }

    /// Signal shutdown and wait for the thread to finish
    pub fn shutdown(mut self) {
        self.blackboard.signal_shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        // Signal only; joining here could block on a sleeping heartbeat
        self.blackboard.signal_shutdown();
    }
}

/// Get RSS memory usage in MB (Linux only)
fn get_rss_mb() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/self/statm")
            .ok()
            .and_then(|s| {
                let parts: Vec<&str> = s.split_whitespace().collect();
                // Second field is RSS in pages
                parts.get(1)?.parse::<u64>().ok()
            })
            .map(|pages| pages * 4096 / (1024 * 1024))
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Format duration in human-readable form
pub(crate) fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.0}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor();
        let remaining_secs = secs % 60.0;
        format!("{:.0}m{:.0}s", mins, remaining_secs)
    } else {
        format!("{:.1}h", secs / 3600.0)
    }
}

fn heartbeat_loop(bb: Arc<TelemetryBlackboard>, config: HeartbeatConfig, is_tty: bool) {
    let tick = Duration::from_millis(200);
    let interval = Duration::from_secs(config.interval_secs);
    let mut last_samples = 0u64;
    let mut last_time = Instant::now();

    'outer: loop {
        // Short ticks so shutdown is observed promptly
        let wake = Instant::now() + interval;
        while Instant::now() < wake {
            if bb.is_shutdown() {
                break 'outer;
            }
            thread::sleep(tick);
        }

        let snap = bb.snapshot();

        let now = Instant::now();
        let dt = now.duration_since(last_time).as_secs_f64();
        let velocity = if dt > 0.1 {
            snap.samples_recorded.saturating_sub(last_samples) as f64 / dt
        } else {
            0.0
        };
        last_samples = snap.samples_recorded;
        last_time = now;

        let eta_str = if velocity > 0.0 && snap.total_samples > snap.samples_recorded {
            let remaining = snap.total_samples - snap.samples_recorded;
            format_duration(remaining as f64 / velocity)
        } else {
            "unknown".to_string()
        };

        let stall_secs = snap.current_nanos.saturating_sub(snap.last_progress_nanos) / 1_000_000_000;
        let is_stalled = stall_secs > config.stall_threshold_secs;
        let rss_mb = get_rss_mb();

        if is_tty {
            print_tty_progress(&snap, &eta_str, rss_mb, velocity, is_stalled);
        } else {
            print_log_progress(&snap, &eta_str, rss_mb, velocity, is_stalled);
        }
    }

    if is_tty {
        eprint!("\r\x1b[K");
        let _ = io::stderr().flush();
    }
}

/// Print progress for TTY (rewriting single line)
fn print_tty_progress(snap: &TelemetrySnapshot, eta: &str, rss_mb: Option<u64>, velocity: f64, is_stalled: bool) {
    let progress_pct = if snap.total_samples > 0 {
        (snap.samples_recorded as f64 / snap.total_samples as f64 * 100.0).min(100.0)
    } else if snap.total_units > 0 {
        (snap.units_done as f64 / snap.total_units as f64 * 100.0).min(100.0)
    } else {
        0.0
    };

    let bar_width = 20;
    let filled = ((progress_pct / 100.0) * bar_width as f64) as usize;
    let bar: String = "=".repeat(filled.min(bar_width)) + &" ".repeat(bar_width.saturating_sub(filled));

    let failed_str = if snap.units_failed > 0 {
        format!(" ({} failed)", snap.units_failed)
    } else {
        String::new()
    };
    let mem_str = rss_mb.map(|mb| format!(" {}MB", mb)).unwrap_or_default();
    let stall_str = if is_stalled { " [STALLED]" } else { "" };

    eprint!(
        "\r[{}] {:>5.1}% | {} U{}/{}{} C{} | {:.0} smp/s | {} | ETA: {}{}{}    \x1b[K",
        bar,
        progress_pct,
        snap.stage.as_str(),
        snap.units_done,
        snap.total_units,
        failed_str,
        snap.caches_written,
        velocity,
        format_duration(snap.elapsed_secs),
        eta,
        mem_str,
        stall_str
    );
    let _ = io::stderr().flush();
}

/// Print progress for non-TTY (structured log line)
fn print_log_progress(snap: &TelemetrySnapshot, eta: &str, rss_mb: Option<u64>, velocity: f64, is_stalled: bool) {
    eprintln!(
        "[HEARTBEAT] stage=\"{}\" units={}/{} failed={} samples={}/{} caches_written={} \
         caches_merged={} velocity={:.0}/s elapsed={:.0}s eta={} rss_mb={} stalled={}",
        snap.stage.as_str(),
        snap.units_done,
        snap.total_units,
        snap.units_failed,
        snap.samples_recorded,
        snap.total_samples,
        snap.caches_written,
        snap.caches_merged,
        velocity,
        snap.elapsed_secs,
        eta,
        rss_mb.map(|m| m.to_string()).unwrap_or_else(|| "?".to_string()),
        is_stalled
    );
}
