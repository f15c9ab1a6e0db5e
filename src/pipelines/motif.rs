//! # Motif Pipeline
//!
//! Top-level orchestration of one invocation:
//!
//! ```text
//! CONFIGURED -> SAMPLING -> MERGING -> EMITTING -> DONE
//! ```
//!
//! Merge-only runs (`--caches`, `--recover-caches`) start at MERGING; hash-read
//! runs (`--precomputed-hash`) go straight to EMITTING. Nothing returns to
//! SAMPLING once merging has begun.
//!
//! All configuration and model checks happen before any sampling, and a
//! fatal error anywhere means no feature output is written.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, info_span, warn};

use crate::config::{Config, RunMode};
use crate::data::{AlignmentBundle, CountTable};
use crate::error::{MotifError, Result};
use crate::io::cache::{read_cache_list, read_hash_dump_file, write_hash_dump_file, CacheNamer};
use crate::io::{load_bundle, GffWriter};
use crate::model::{
    EmissionProvider, MotifPhyloHmm, MotifSpec, PathSampler, PrecomputedEmissions, ReferenceFrame, TreeModel,
    CATEGORY_LABELS,
};
use crate::pipelines::emit::{scorer_for, Emission, FeatureEmitter};
use crate::pipelines::merge::{remove_caches, CacheMerger};
use crate::pipelines::sampling::{partition_units, SampleSchedule, SamplingSession, SessionSummary};
use crate::utils::telemetry::{Stage, TelemetryBlackboard};
use crate::utils::threading::build_thread_pool;

/// What a finished run produced
#[derive(Clone, Debug, Default)]
pub struct PipelineReport {
    pub n_keys: usize,
    pub n_samples: u64,
    pub n_features: usize,
    /// Keys left out because the reference row is all gaps under them
    pub n_unmapped: usize,
    /// Blocks whose sampling stopped early
    pub failed_blocks: usize,
    /// Caches left on disk (kept session caches, or none)
    pub kept_caches: Vec<PathBuf>,
}

/// Validated inputs shared by every run mode
struct Inputs {
    bundle: AlignmentBundle,
    hmm: MotifPhyloHmm,
}

/// Merged table plus the bookkeeping needed after output is written
struct Merged {
    table: CountTable,
    session_caches: Vec<PathBuf>,
    manifest: Option<PathBuf>,
    failed_blocks: usize,
}

pub struct MotifPipeline {
    config: Config,
    telemetry: Option<Arc<TelemetryBlackboard>>,
}

impl MotifPipeline {
    pub fn new(config: Config, telemetry: Option<Arc<TelemetryBlackboard>>) -> Self {
        Self { config, telemetry }
    }

    fn set_stage(&self, stage: Stage) {
        if let Some(t) = &self.telemetry {
            t.set_stage(stage);
        }
    }

    pub fn run(&mut self) -> Result<PipelineReport> {
        self.set_stage(Stage::LoadingInputs);
        let inputs = info_span!("load_inputs").in_scope(|| self.load_inputs())?;

        let merged = match self.config.run_mode() {
            RunMode::Sample => self.sample_and_merge(&inputs)?,
            RunMode::MergeCaches => self.merge_existing(&inputs)?,
            RunMode::ReadHash(path) => self.read_hash(&inputs, &path)?,
        };

        let mut report = PipelineReport {
            n_keys: merged.table.len(),
            n_samples: merged.table.n_samples(),
            failed_blocks: merged.failed_blocks,
            ..PipelineReport::default()
        };
        if merged.table.n_samples() == 0 {
            warn!("no recorded samples; output will be empty");
        }

        if let Some(dump) = &self.config.dump_hash {
            self.set_stage(Stage::WritingOutput);
            write_hash_dump_file(dump, &merged.table)?;
            info!(path = %dump.display(), n_keys = merged.table.len(), "wrote hash dump");
        } else {
            self.set_stage(Stage::Emitting);
            let emission = self.emit(&inputs, &merged.table)?;
            report.n_features = emission.set.len();
            report.n_unmapped = emission.n_unmapped;
        }

        if self.config.keep_caches {
            report.kept_caches = merged.session_caches;
        } else if !merged.session_caches.is_empty() || merged.manifest.is_some() {
            remove_caches(&merged.session_caches, merged.manifest.as_deref());
        }

        self.set_stage(Stage::Complete);
        Ok(report)
    }

    /// Load inputs and run every check that must pass before sampling
    fn load_inputs(&self) -> Result<Inputs> {
        let bundle = load_bundle(&self.config.align)?;
        let mut tree = TreeModel::from_path(&self.config.tree)?;
        let motif = MotifSpec::from_path(&self.config.motif)?;

        tree.validate()?;
        let pruned = tree.prune(&bundle.seqnames)?;
        if !pruned.is_empty() {
            warn!(
                n_pruned = pruned.len(),
                "pruned tree leaves missing from alignment: {}",
                pruned.join(", ")
            );
        }

        let refidx = self.config.refidx;
        if refidx > bundle.n_rows() {
            return Err(MotifError::config(format!(
                "--refidx {} out of range; alignment has {} sequences",
                refidx,
                bundle.n_rows()
            )));
        }
        if refidx > 0 {
            let name = &bundle.seqnames[refidx - 1];
            if !tree.has_node(name) {
                return Err(MotifError::model(format!(
                    "reference sequence {} not found in tree",
                    name
                )));
            }
        }

        let hmm = MotifPhyloHmm::new(motif, self.config.model_params())?;
        info!(
            motif = %hmm.motif().name,
            width = hmm.width(),
            n_states = hmm.n_states(),
            n_blocks = bundle.n_blocks(),
            "inputs ready"
        );
        Ok(Inputs { bundle, hmm })
    }

    fn sample_and_merge(&self, inputs: &Inputs) -> Result<Merged> {
        let config = &self.config;
        let emissions_path = config
            .emissions
            .as_ref()
            .ok_or_else(|| MotifError::config("--emissions is required when sampling"))?;

        self.set_stage(Stage::ComputingEmissions);
        let emissions = Arc::new(PrecomputedEmissions::new(emissions_path).emissions(&inputs.hmm, &inputs.bundle)?);

        let schedule = SampleSchedule {
            burn_in: config.burnin,
            n_samples: config.samples,
            sample_interval: config.sample_interval,
            cache_interval: config.cache_interval,
        };
        if schedule.recorded_per_block() == 0 {
            warn!(
                samples = config.samples,
                sample_interval = config.sample_interval,
                "sample interval exceeds sample count; nothing will be recorded"
            );
        }

        let prefix = config.cache_prefix();
        let namer = Arc::new(CacheNamer::with_manifest(&prefix)?);
        let manifest = namer.manifest_path().map(Path::to_path_buf);
        let n_threads = config.nthreads();
        let pool = build_thread_pool(n_threads)?;
        let units = partition_units(inputs.bundle.n_blocks(), config.blocks_per_unit, n_threads);

        self.set_stage(Stage::Sampling);
        info!(
            n_units = units.len(),
            n_threads,
            burn_in = schedule.burn_in,
            samples = schedule.n_samples,
            interval = schedule.sample_interval,
            prefix = %prefix.display(),
            "sampling"
        );
        let session = SamplingSession::new(&inputs.hmm, &inputs.bundle, emissions, schedule, config.seed, namer)?
            .with_telemetry(self.telemetry.clone());
        let summary: SessionSummary = session.run(&pool, &units)?;
        summary.log();

        self.set_stage(Stage::Merging);
        let caches = summary.caches();
        let table = self.merger(&inputs.hmm).merge(&caches)?;

        Ok(Merged {
            table,
            session_caches: caches,
            manifest,
            failed_blocks: summary.n_failed(),
        })
    }

    fn merge_existing(&self, inputs: &Inputs) -> Result<Merged> {
        let mut paths = self.config.caches.clone();
        if let Some(list) = &self.config.recover_caches {
            paths.extend(read_cache_list(list)?);
        }
        if paths.is_empty() {
            return Err(MotifError::config("no cache files to merge"));
        }

        self.set_stage(Stage::Merging);
        let table = self.merger(&inputs.hmm).merge(&paths)?;
        Ok(Merged {
            table,
            session_caches: Vec::new(),
            manifest: None,
            failed_blocks: 0,
        })
    }

    fn read_hash(&self, inputs: &Inputs, path: &Path) -> Result<Merged> {
        let table = read_hash_dump_file(path)?;
        if table.key_len() != inputs.hmm.key_len() {
            return Err(MotifError::cache(
                path,
                format!(
                    "key length {} does not match motif width {} (expected {})",
                    table.key_len(),
                    inputs.hmm.width(),
                    inputs.hmm.key_len()
                ),
            ));
        }
        if table.count_len() != inputs.hmm.count_len() {
            return Err(MotifError::cache(
                path,
                format!(
                    "count vectors have {} slots, model expects {}",
                    table.count_len(),
                    inputs.hmm.count_len()
                ),
            ));
        }
        Ok(Merged {
            table,
            session_caches: Vec::new(),
            manifest: None,
            failed_blocks: 0,
        })
    }

    fn merger(&self, hmm: &MotifPhyloHmm) -> CacheMerger {
        CacheMerger::new(hmm.key_len(), hmm.count_len()).with_telemetry(self.telemetry.clone())
    }

    fn emit(&self, inputs: &Inputs, table: &CountTable) -> Result<Emission> {
        let config = &self.config;
        let frame = ReferenceFrame::new(&inputs.bundle, config.refidx, config.seqname.clone())?;
        let emitter = FeatureEmitter::new(
            &inputs.hmm,
            frame,
            scorer_for(config.score, inputs.bundle.n_blocks()),
            &CATEGORY_LABELS,
            inputs.hmm.motif().name.clone(),
        )
        .with_idpref(config.idpref.clone());
        let emission = emitter.emit(table)?;

        self.set_stage(Stage::WritingOutput);
        let mut writer = match &config.out {
            Some(path) => GffWriter::create(path)?,
            None => GffWriter::stdout(),
        };
        writer.write_set(&emission.set)?;
        Ok(emission)
    }
}
