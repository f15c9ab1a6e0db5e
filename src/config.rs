//! # Configuration
//!
//! ## Role
//! CLI argument parsing and validation, plus resolution of which entry point
//! of the pipeline a run uses.
//!
//! ## Run Modes
//! - sampling (default): sample, spill, merge own caches, emit
//! - merge-only: `--caches` / `--recover-caches` merge existing caches, emit
//! - hash-read: `--precomputed-hash` reads one merged hash dump, emit
//!
//! ## Example CLI
//! ```bash
//! phylomotif --align aln.json.gz --tree tree.json --motif m.json \
//!     --emissions emis.json --refidx 1 --nthreads 8 --out motifs.gff
//! ```

use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};

use crate::error::{MotifError, Result};
use crate::model::{ModelParams, N_CATEGORIES};
use crate::utils::threading::resolve_threads;

/// How a feature's score is derived from its counts
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ScoreMode {
    /// occurrences * n_blocks / total samples
    Posterior,
    /// occurrences / total samples
    Frequency,
    /// raw occurrence count
    Count,
}

/// Pipeline entry point selected by the options
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunMode {
    Sample,
    MergeCaches,
    ReadHash(PathBuf),
}

#[derive(Parser, Debug, Clone)]
#[command(name = "phylomotif", version, about = "Motif sampling over multi-species alignments with a phylo-HMM")]
pub struct Config {
    /// Alignment bundle (JSON, optionally .gz)
    #[arg(long)]
    pub align: PathBuf,

    /// Tree model (JSON)
    #[arg(long)]
    pub tree: PathBuf,

    /// Motif definition (JSON)
    #[arg(long)]
    pub motif: PathBuf,

    /// Precomputed emission scores (JSON); required when sampling
    #[arg(long)]
    pub emissions: Option<PathBuf>,

    /// Output file (GFF; stdout when absent)
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Reference row for coordinates, 1-based; 0 uses alignment columns
    #[arg(long, default_value_t = 0)]
    pub refidx: usize,

    /// Sequence name for features in reference frame
    #[arg(long)]
    pub seqname: Option<String>,

    /// Prefix for feature ids
    #[arg(long)]
    pub idpref: Option<String>,

    /// Burn-in iterations discarded per block
    #[arg(long, default_value_t = 200)]
    pub burnin: usize,

    /// Post-burn-in iterations per block
    #[arg(long, default_value_t = 9000)]
    pub samples: usize,

    /// Keep every Nth post-burn-in iteration
    #[arg(long, default_value_t = 1)]
    pub sample_interval: usize,

    /// Recorded samples between spills to disk
    #[arg(long, default_value_t = 200)]
    pub cache_interval: usize,

    /// Prefix for spill cache files [default: phylomotif_<unix-seconds>]
    #[arg(long)]
    pub cache_prefix: Option<PathBuf>,

    /// Keep spill caches after merging
    #[arg(long, default_value_t = false)]
    pub keep_caches: bool,

    /// Worker threads (0 = all cores)
    #[arg(long, default_value_t = 0)]
    pub nthreads: usize,

    /// Session seed
    #[arg(long, default_value_t = 12345)]
    pub seed: u64,

    /// Blocks per work unit (0 = auto)
    #[arg(long, default_value_t = 0)]
    pub blocks_per_unit: usize,

    /// Motif entry rate
    #[arg(long, default_value_t = 0.01)]
    pub mu: f64,

    /// Relative weights of neutral,conserved,gain,loss motifs
    #[arg(long, value_delimiter = ',')]
    pub category_weights: Vec<f64>,

    /// Feature score formula
    #[arg(long, value_enum, default_value_t = ScoreMode::Posterior)]
    pub score: ScoreMode,

    /// Write the merged table as a text hash dump instead of GFF
    #[arg(long)]
    pub dump_hash: Option<PathBuf>,

    /// Read one merged hash dump and emit features directly
    #[arg(long, conflicts_with_all = ["caches", "recover_caches", "dump_hash"])]
    pub precomputed_hash: Option<PathBuf>,

    /// Existing cache files to merge (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub caches: Vec<PathBuf>,

    /// File listing cache paths to merge, one per line
    #[arg(long)]
    pub recover_caches: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(long, default_value_t = false)]
    pub quiet: bool,

    /// Emit span timing events
    #[arg(long, default_value_t = false)]
    pub profile: bool,
}

impl Config {
    /// Parse process arguments and validate them
    pub fn parse_and_validate() -> Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_interval == 0 {
            return Err(MotifError::config("--sample-interval must be at least 1"));
        }
        if self.cache_interval == 0 {
            return Err(MotifError::config("--cache-interval must be at least 1"));
        }
        if !(self.mu > 0.0 && self.mu < 1.0) {
            return Err(MotifError::config(format!("--mu must be in (0, 1), got {}", self.mu)));
        }
        if !self.category_weights.is_empty() {
            if self.category_weights.len() != N_CATEGORIES {
                return Err(MotifError::config(format!(
                    "--category-weights needs {} values, got {}",
                    N_CATEGORIES,
                    self.category_weights.len()
                )));
            }
            if self.category_weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
                return Err(MotifError::config("--category-weights must all be positive"));
            }
        }

        for path in [&self.align, &self.tree, &self.motif] {
            require_file(path)?;
        }
        match self.run_mode() {
            RunMode::Sample => {
                let emissions = self
                    .emissions
                    .as_ref()
                    .ok_or_else(|| MotifError::config("--emissions is required when sampling"))?;
                require_file(emissions)?;
            }
            RunMode::MergeCaches => {
                for path in &self.caches {
                    require_file(path)?;
                }
                if let Some(list) = &self.recover_caches {
                    require_file(list)?;
                }
            }
            RunMode::ReadHash(path) => require_file(&path)?,
        }
        Ok(())
    }

    pub fn run_mode(&self) -> RunMode {
        if let Some(path) = &self.precomputed_hash {
            RunMode::ReadHash(path.clone())
        } else if !self.caches.is_empty() || self.recover_caches.is_some() {
            RunMode::MergeCaches
        } else {
            RunMode::Sample
        }
    }

    /// Resolved worker count
    pub fn nthreads(&self) -> usize {
        resolve_threads(self.nthreads)
    }

    /// Spill cache prefix, defaulting to `phylomotif_<unix-seconds>`
    pub fn cache_prefix(&self) -> PathBuf {
        self.cache_prefix
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("phylomotif_{}", chrono::Utc::now().timestamp())))
    }

    pub fn model_params(&self) -> ModelParams {
        let mut params = ModelParams {
            mu: self.mu,
            ..ModelParams::default()
        };
        if self.category_weights.len() == N_CATEGORIES {
            params.category_weights.copy_from_slice(&self.category_weights);
        }
        params
    }

    /// Recorded block-samples per block
    pub fn recorded_per_block(&self) -> usize {
        self.samples / self.sample_interval.max(1)
    }
}

fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(MotifError::FileNotFound {
            path: path.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Inputs {
        _dir: tempfile::TempDir,
        align: String,
        tree: String,
        motif: String,
        emissions: String,
    }

    fn inputs() -> Inputs {
        let dir = tempfile::tempdir().expect("Create temp dir");
        let touch = |name: &str| {
            let p = dir.path().join(name);
            std::fs::write(&p, "{}").unwrap();
            p.to_string_lossy().into_owned()
        };
        let align = touch("a.json");
        let tree = touch("t.json");
        let motif = touch("m.json");
        let emissions = touch("e.json");
        Inputs {
            _dir: dir,
            align,
            tree,
            motif,
            emissions,
        }
    }

    fn base_args(i: &Inputs) -> Vec<String> {
        vec![
            "phylomotif".into(),
            "--align".into(),
            i.align.clone(),
            "--tree".into(),
            i.tree.clone(),
            "--motif".into(),
            i.motif.clone(),
        ]
    }

    #[test]
    fn test_defaults() {
        let i = inputs();
        let mut args = base_args(&i);
        args.extend(["--emissions".into(), i.emissions.clone()]);
        let config = Config::try_parse_from(args).unwrap();
        config.validate().unwrap();

        assert_eq!(config.burnin, 200);
        assert_eq!(config.samples, 9000);
        assert_eq!(config.sample_interval, 1);
        assert_eq!(config.cache_interval, 200);
        assert_eq!(config.seed, 12345);
        assert_eq!(config.score, ScoreMode::Posterior);
        assert_eq!(config.run_mode(), RunMode::Sample);
        assert_eq!(config.model_params(), ModelParams::default());
        assert!(config.cache_prefix().to_string_lossy().starts_with("phylomotif_"));
    }

    #[test]
    fn test_sampling_requires_emissions() {
        let i = inputs();
        let config = Config::try_parse_from(base_args(&i)).unwrap();
        assert!(matches!(config.validate(), Err(MotifError::Config { .. })));
    }

    #[test]
    fn test_run_modes() {
        let i = inputs();
        let mut args = base_args(&i);
        args.extend(["--caches".into(), format!("{},{}", i.emissions, i.align)]);
        let config = Config::try_parse_from(args).unwrap();
        assert_eq!(config.run_mode(), RunMode::MergeCaches);
        assert_eq!(config.caches.len(), 2);
        config.validate().unwrap();

        let mut args = base_args(&i);
        args.extend(["--precomputed-hash".into(), i.emissions.clone()]);
        let config = Config::try_parse_from(args).unwrap();
        assert_eq!(config.run_mode(), RunMode::ReadHash(PathBuf::from(&i.emissions)));

        let mut args = base_args(&i);
        args.extend([
            "--precomputed-hash".into(),
            i.emissions.clone(),
            "--dump-hash".into(),
            "x".into(),
        ]);
        assert!(Config::try_parse_from(args).is_err());
    }

    #[test]
    fn test_bad_values() {
        let i = inputs();
        let check = |extra: &[&str]| {
            let mut args = base_args(&i);
            args.extend(["--emissions".into(), i.emissions.clone()]);
            args.extend(extra.iter().map(|s| s.to_string()));
            Config::try_parse_from(args).unwrap().validate()
        };
        assert!(check(&["--sample-interval", "0"]).is_err());
        assert!(check(&["--cache-interval", "0"]).is_err());
        assert!(check(&["--mu", "1.5"]).is_err());
        assert!(check(&["--category-weights", "1,2,3"]).is_err());
        assert!(check(&["--category-weights", "1,0,1,1"]).is_err());
        assert!(check(&["--category-weights", "1,2,3,4"]).is_ok());
    }

    #[test]
    fn test_missing_input_file() {
        let i = inputs();
        let mut args = base_args(&i);
        args[4] = "/nonexistent/tree.json".into();
        args.extend(["--emissions".into(), i.emissions.clone()]);
        let config = Config::try_parse_from(args).unwrap();
        assert!(matches!(config.validate(), Err(MotifError::FileNotFound { .. })));
    }

    #[test]
    fn test_recorded_per_block() {
        let i = inputs();
        let mut args = base_args(&i);
        args.extend(["--samples", "100", "--sample-interval", "5"].map(String::from));
        let config = Config::try_parse_from(args).unwrap();
        assert_eq!(config.recorded_per_block(), 20);
    }
}
