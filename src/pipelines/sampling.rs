//! # Sampling Session
//!
//! ## Role
//! Drives stochastic path sampling across alignment blocks on a rayon pool.
//!
//! ## Structure
//! - `SampleSchedule`: burn-in, thinning and spill cadence for one block
//! - `WorkUnit`: a contiguous range of blocks run by one worker
//! - `SamplingChain`: one worker's local count table and spill writer
//! - `SamplingSession`: shared read-only inputs plus the scheduler entry point
//!
//! ## Determinism
//! Each block gets its own `SmallRng`, seeded from the session seed and the
//! block index. Sampled paths therefore depend neither on how blocks are
//! grouped into units nor on the pool size, and the merged table is identical
//! across partitionings.
//!
//! ## Failure Policy
//! A `SamplingError` ends its block only. Samples the block recorded before
//! failing stay in the worker's table, the worker moves on to the next block
//! of its unit, and the failure is listed in the unit's `BlockFailure`s. The
//! set of failed blocks is therefore the same for every partitioning. Cache
//! write errors are fatal for the whole session.

use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info, info_span, instrument, warn};

use crate::data::{AlignmentBundle, CountTable};
use crate::error::{MotifError, Result};
use crate::io::cache::{CacheNamer, SpillWriter};
use crate::model::{EmissionTable, PathSampler, SampledMotif, SamplingError};
use crate::utils::telemetry::TelemetryBlackboard;

/// Distinguishes block streams from other uses of the session seed
const BLOCK_SEED_SALT: u64 = 0xA5A5_5A5A_D00D;

/// SplitMix64 finalizer
#[inline]
fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed for one block's RNG stream.
///
/// The session seed is mixed before the block index is added, so adjacent
/// session seeds do not share streams at shifted block indices.
#[inline]
pub fn block_seed(seed: u64, block_idx: usize) -> u64 {
    splitmix64(splitmix64(seed.wrapping_add(BLOCK_SEED_SALT)).wrapping_add(block_idx as u64))
}

/// Per-block iteration schedule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleSchedule {
    pub burn_in: usize,
    pub n_samples: usize,
    pub sample_interval: usize,
    /// Recorded block-samples between spills
    pub cache_interval: usize,
}

impl SampleSchedule {
    #[inline]
    pub fn total_iterations(&self) -> usize {
        self.burn_in + self.n_samples
    }

    /// Whether iteration `iter` (0-based) is kept
    #[inline]
    pub fn is_recorded(&self, iter: usize) -> bool {
        iter >= self.burn_in && (iter - self.burn_in + 1) % self.sample_interval == 0
    }

    /// Recorded iterations per block
    #[inline]
    pub fn recorded_per_block(&self) -> usize {
        self.n_samples / self.sample_interval
    }
}

/// A contiguous run of blocks executed by one worker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkUnit {
    pub index: usize,
    pub blocks: Range<usize>,
}

/// Split `n_blocks` into units of `blocks_per_unit` (0 picks about four units per thread)
pub fn partition_units(n_blocks: usize, blocks_per_unit: usize, n_threads: usize) -> Vec<WorkUnit> {
    let per_unit = if blocks_per_unit > 0 {
        blocks_per_unit
    } else {
        n_blocks.div_ceil(n_threads.max(1) * 4).max(1)
    };
    (0..n_blocks)
        .step_by(per_unit)
        .enumerate()
        .map(|(index, start)| WorkUnit {
            index,
            blocks: start..(start + per_unit).min(n_blocks),
        })
        .collect()
}

/// One block whose sampling stopped early
#[derive(Clone, Debug, PartialEq)]
pub struct BlockFailure {
    pub unit: usize,
    pub block: String,
    pub message: String,
    /// Samples the block recorded before failing
    pub recorded: u64,
}

/// Result of one unit
#[derive(Clone, Debug, PartialEq)]
pub struct UnitOutcome {
    pub unit: usize,
    pub blocks: usize,
    pub recorded: u64,
    pub caches: Vec<PathBuf>,
    pub failures: Vec<BlockFailure>,
}

impl UnitOutcome {
    /// Whether any block of the unit failed
    pub fn is_failed(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Per-unit outcomes of one session, in unit order
#[derive(Clone, Debug, Default)]
pub struct SessionSummary {
    pub outcomes: Vec<UnitOutcome>,
}

impl SessionSummary {
    pub fn n_units(&self) -> usize {
        self.outcomes.len()
    }

    pub fn n_blocks(&self) -> usize {
        self.outcomes.iter().map(|o| o.blocks).sum()
    }

    /// Failed blocks across all units
    pub fn n_failed(&self) -> usize {
        self.outcomes.iter().map(|o| o.failures.len()).sum()
    }

    pub fn all_failed(&self) -> bool {
        let n_blocks = self.n_blocks();
        n_blocks > 0 && self.n_failed() == n_blocks
    }

    /// Recorded block-samples across all units, failed blocks included
    pub fn recorded_samples(&self) -> u64 {
        self.outcomes.iter().map(|o| o.recorded).sum()
    }

    /// Every cache written by the session
    pub fn caches(&self) -> Vec<PathBuf> {
        self.outcomes.iter().flat_map(|o| o.caches.iter().cloned()).collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &BlockFailure> {
        self.outcomes.iter().flat_map(|o| o.failures.iter())
    }

    /// Log one warning per failed block and a closing summary line
    pub fn log(&self) {
        for failure in self.failures() {
            warn!(
                unit = failure.unit,
                block = %failure.block,
                recorded = failure.recorded,
                "sampling failed: {}",
                failure.message
            );
        }
        info!(
            units = self.n_units(),
            blocks = self.n_blocks(),
            failed = self.n_failed(),
            recorded = self.recorded_samples(),
            caches = self.outcomes.iter().map(|o| o.caches.len()).sum::<usize>(),
            "sampling session finished"
        );
    }
}

enum ChainError {
    Sampling { block: String, error: SamplingError },
    Fatal(MotifError),
}

impl From<MotifError> for ChainError {
    fn from(e: MotifError) -> Self {
        ChainError::Fatal(e)
    }
}

/// One worker's accumulation state
pub struct SamplingChain<'s, S: PathSampler> {
    session: &'s SamplingSession<'s, S>,
    table: CountTable,
    spill: SpillWriter,
    since_spill: usize,
    recorded: u64,
    scratch: Vec<SampledMotif>,
}

impl<'s, S: PathSampler> SamplingChain<'s, S> {
    pub fn new(session: &'s SamplingSession<'s, S>) -> Self {
        Self {
            session,
            table: CountTable::new(session.sampler.key_len(), session.sampler.count_len()),
            spill: SpillWriter::new(session.namer.clone()),
            since_spill: 0,
            recorded: 0,
            scratch: Vec::new(),
        }
    }

    /// Recorded block-samples so far, flushed or not
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    fn run_block(&mut self, block_idx: usize) -> std::result::Result<(), ChainError> {
        let session = self.session;
        let block = &session.bundle.blocks[block_idx];
        let fail = |error: SamplingError| ChainError::Sampling {
            block: block.name.clone(),
            error,
        };

        let lattice = session
            .sampler
            .prepare(block_idx, block, &session.emissions)
            .map_err(fail)?;
        let mut rng = SmallRng::seed_from_u64(block_seed(session.seed, block_idx));
        let schedule = session.schedule;

        for iter in 0..schedule.total_iterations() {
            self.scratch.clear();
            session
                .sampler
                .sample(&lattice, &mut rng, &mut self.scratch)
                .map_err(fail)?;
            if !schedule.is_recorded(iter) {
                continue;
            }

            for motif in self.scratch.drain(..) {
                self.table.record(motif.key, motif.slot)?;
            }
            self.table.record_sample(1);
            self.recorded += 1;
            self.since_spill += 1;
            if let Some(t) = &session.telemetry {
                t.add_samples(1);
            }
            if self.since_spill >= schedule.cache_interval {
                self.flush()?;
            }
        }
        Ok(())
    }

    /// Spill whatever is held locally
    pub fn flush(&mut self) -> Result<()> {
        if self.spill.spill(&mut self.table)?.is_some() {
            if let Some(t) = &self.session.telemetry {
                t.cache_written();
            }
        }
        self.since_spill = 0;
        Ok(())
    }

    /// Run every block of `unit`, then flush. A failed block is recorded and
    /// the remaining blocks still run.
    pub fn run_unit(mut self, unit: &WorkUnit) -> Result<UnitOutcome> {
        let mut failures = Vec::new();
        for block_idx in unit.blocks.clone() {
            let before = self.recorded;
            match self.run_block(block_idx) {
                Ok(()) => {}
                Err(ChainError::Fatal(e)) => return Err(e),
                Err(ChainError::Sampling { block, error }) => {
                    debug!(unit = unit.index, block = %block, "block stopped early");
                    failures.push(BlockFailure {
                        unit: unit.index,
                        block,
                        message: error.to_string(),
                        recorded: self.recorded - before,
                    });
                }
            }
        }
        self.flush()?;
        Ok(UnitOutcome {
            unit: unit.index,
            blocks: unit.blocks.len(),
            recorded: self.recorded,
            caches: self.spill.into_written(),
            failures,
        })
    }
}

/// Immutable inputs shared by every worker of one run
pub struct SamplingSession<'a, S: PathSampler> {
    sampler: &'a S,
    bundle: &'a AlignmentBundle,
    emissions: Arc<EmissionTable>,
    schedule: SampleSchedule,
    seed: u64,
    namer: Arc<CacheNamer>,
    telemetry: Option<Arc<TelemetryBlackboard>>,
}

impl<'a, S: PathSampler> SamplingSession<'a, S> {
    pub fn new(
        sampler: &'a S,
        bundle: &'a AlignmentBundle,
        emissions: Arc<EmissionTable>,
        schedule: SampleSchedule,
        seed: u64,
        namer: Arc<CacheNamer>,
    ) -> Result<Self> {
        if schedule.sample_interval == 0 || schedule.cache_interval == 0 {
            return Err(MotifError::config("sample and cache intervals must be at least 1"));
        }
        Ok(Self {
            sampler,
            bundle,
            emissions,
            schedule,
            seed,
            namer,
            telemetry: None,
        })
    }

    pub fn with_telemetry(mut self, telemetry: Option<Arc<TelemetryBlackboard>>) -> Self {
        self.telemetry = telemetry;
        self
    }

    #[inline]
    pub fn schedule(&self) -> SampleSchedule {
        self.schedule
    }

    /// Run one unit on the calling thread
    pub fn run_unit(&self, unit: &WorkUnit) -> Result<UnitOutcome> {
        let outcome = info_span!("unit", index = unit.index, blocks = unit.blocks.len())
            .in_scope(|| SamplingChain::new(self).run_unit(unit))?;
        if let Some(t) = &self.telemetry {
            t.unit_done(outcome.is_failed());
        }
        Ok(outcome)
    }

    /// Run all units on `pool`; fails only on fatal errors or if every block failed
    #[instrument(skip_all, fields(n_units = units.len()))]
    pub fn run(&self, pool: &ThreadPool, units: &[WorkUnit]) -> Result<SessionSummary> {
        if let Some(t) = &self.telemetry {
            let blocks: usize = units.iter().map(|u| u.blocks.len()).sum();
            t.set_totals(
                units.len() as u64,
                (blocks * self.schedule.recorded_per_block()) as u64,
            );
        }

        let outcomes = pool.install(|| {
            units
                .par_iter()
                .map(|unit| self.run_unit(unit))
                .collect::<Result<Vec<UnitOutcome>>>()
        })?;
        let summary = SessionSummary { outcomes };

        if summary.all_failed() {
            let (block, message) = summary
                .failures()
                .next()
                .map(|f| (f.block.clone(), f.message.clone()))
                .unwrap_or_default();
            return Err(MotifError::sampling(
                block,
                format!("all {} blocks failed; first failure: {}", summary.n_blocks(), message),
            ));
        }
        Ok(summary)
    }
}
