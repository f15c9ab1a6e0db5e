//! # Feature Emitter
//!
//! Converts a merged `CountTable` into one GFF feature per distinct key.
//! Coordinates and strand come from the path decoder; the score comes from a
//! pluggable `Scorer`. Every feature also carries its raw occurrence count and
//! the session sample total, so any other score can be recomputed later.
//!
//! Keys are visited in ascending order, so output does not depend on how the
//! table was assembled.

use tracing::{info, instrument, warn};

use crate::config::ScoreMode;
use crate::data::{CountTable, CountVector, Feature, FeatureSet, OCCURRENCE_SLOT};
use crate::error::Result;
use crate::model::{PathDecoder, ReferenceFrame};

/// Source column value and metadata generator name
pub const SOURCE: &str = "phylomotif";

/// Label used when no category sub-count dominates
const GENERIC_LABEL: &str = "motif";

/// Deterministic score from a count vector and the sample total
pub trait Scorer: Send + Sync {
    /// None is a null score
    fn score(&self, counts: &CountVector, total: u64) -> Option<f64>;
}

/// Per-block posterior frequency: `occurrences * n_blocks / total`
pub struct PosteriorScorer {
    pub n_blocks: usize,
}

impl Scorer for PosteriorScorer {
    fn score(&self, counts: &CountVector, total: u64) -> Option<f64> {
        (total > 0).then(|| counts.occurrences() as f64 * self.n_blocks as f64 / total as f64)
    }
}

/// `occurrences / total`
pub struct FrequencyScorer;

impl Scorer for FrequencyScorer {
    fn score(&self, counts: &CountVector, total: u64) -> Option<f64> {
        (total > 0).then(|| counts.occurrences() as f64 / total as f64)
    }
}

/// Raw occurrence count
pub struct CountScorer;

impl Scorer for CountScorer {
    fn score(&self, counts: &CountVector, total: u64) -> Option<f64> {
        (total > 0).then(|| counts.occurrences() as f64)
    }
}

pub fn scorer_for(mode: ScoreMode, n_blocks: usize) -> Box<dyn Scorer> {
    match mode {
        ScoreMode::Posterior => Box::new(PosteriorScorer { n_blocks }),
        ScoreMode::Frequency => Box::new(FrequencyScorer),
        ScoreMode::Count => Box::new(CountScorer),
    }
}

/// Slot with the largest sub-count, ties to the lowest; None if all are zero
fn dominant_slot(counts: &CountVector) -> Option<usize> {
    let mut best: Option<(usize, u64)> = None;
    for slot in (OCCURRENCE_SLOT + 1)..counts.len() {
        let c = counts.get(slot);
        if c > 0 && best.map_or(true, |(_, b)| c > b) {
            best = Some((slot, c));
        }
    }
    best.map(|(slot, _)| slot)
}

pub struct FeatureEmitter<'a, D: PathDecoder> {
    decoder: &'a D,
    frame: ReferenceFrame<'a>,
    scorer: Box<dyn Scorer>,
    /// Names of sub-count slots 1.., in order
    labels: &'a [&'a str],
    motif_name: String,
    idpref: String,
}

impl<'a, D: PathDecoder> FeatureEmitter<'a, D> {
    pub fn new(
        decoder: &'a D,
        frame: ReferenceFrame<'a>,
        scorer: Box<dyn Scorer>,
        labels: &'a [&'a str],
        motif_name: impl Into<String>,
    ) -> Self {
        Self {
            decoder,
            frame,
            scorer,
            labels,
            motif_name: motif_name.into(),
            idpref: String::new(),
        }
    }

    pub fn with_idpref(mut self, idpref: Option<String>) -> Self {
        self.idpref = idpref.unwrap_or_default();
        self
    }

    fn label(&self, counts: &CountVector) -> &str {
        dominant_slot(counts)
            .and_then(|slot| self.labels.get(slot - 1).copied())
            .unwrap_or(GENERIC_LABEL)
    }

    fn attribute(&self, n: usize, counts: &CountVector, total: u64) -> String {
        let mut attr = format!(
            "id \"{}{}\"; motif \"{}\"; count \"{}\"; samples \"{}\";",
            self.idpref,
            n,
            self.motif_name,
            counts.occurrences(),
            total
        );
        for (i, label) in self.labels.iter().enumerate() {
            attr.push_str(&format!(" {} \"{}\";", label, counts.get(i + 1)));
        }
        attr
    }

    /// Build the feature set for `table`. Keys with no base in the reference
    /// row are left out and counted.
    #[instrument(skip_all, fields(n_keys = table.len()))]
    pub fn emit(&self, table: &CountTable) -> Result<Emission> {
        let total = table.n_samples();
        let mut set = FeatureSet::with_source(SOURCE, env!("CARGO_PKG_VERSION"));
        set.date = Some(chrono::Local::now().format("%Y-%m-%d").to_string());
        let mut n_unmapped = 0;

        for (key, counts) in table.sorted_entries() {
            let Some(decoded) = self.decoder.decode(key, &self.frame)? else {
                n_unmapped += 1;
                warn!(key = %key, refidx = self.frame.refidx(), "motif is all gaps in the reference row; skipped");
                continue;
            };
            let mut feat = Feature::new(decoded.seqname, SOURCE, self.label(counts), decoded.start, decoded.end);
            feat.strand = decoded.strand;
            feat.score = self.scorer.score(counts, total);
            feat.attribute = self.attribute(set.len() + 1, counts, total);
            set.push(feat);
        }

        if n_unmapped > 0 {
            warn!(n_unmapped, "keys without reference coordinates were not emitted");
        }
        info!(n_features = set.len(), total_samples = total, "emitted features");
        Ok(Emission { set, n_unmapped })
    }
}

/// Emitted features plus the keys left out for lack of reference coordinates
#[derive(Clone, Debug, Default)]
pub struct Emission {
    pub set: FeatureSet,
    pub n_unmapped: usize,
}
