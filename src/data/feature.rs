//! # Feature Records
//!
//! In-memory GFF features. A score of `None` is the null score (`.` on disk),
//! distinct from a real score of `0.0`.

use std::fmt;
use std::str::FromStr;

use crate::error::MotifError;

/// Feature strand
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Strand {
    Plus,
    Minus,
    #[default]
    Unknown,
}

impl Strand {
    pub fn as_char(self) -> char {
        match self {
            Strand::Plus => '+',
            Strand::Minus => '-',
            Strand::Unknown => '.',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Strand::Plus),
            '-' => Some(Strand::Minus),
            '.' => Some(Strand::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl FromStr for Strand {
    type Err = MotifError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Strand::from_char(c)
                .ok_or_else(|| MotifError::parse(0, format!("invalid strand '{}'", s))),
            _ => Err(MotifError::parse(0, format!("invalid strand '{}'", s))),
        }
    }
}

/// One feature line
#[derive(Clone, Debug)]
pub struct Feature {
    pub seqname: String,
    pub source: String,
    pub feature: String,
    /// 1-based inclusive start
    pub start: u64,
    /// 1-based inclusive end
    pub end: u64,
    pub score: Option<f64>,
    /// Score column as read from disk; written back while it still parses to `score`
    pub score_text: Option<String>,
    pub strand: Strand,
    /// Reading frame 0-2, None when not applicable
    pub frame: Option<u8>,
    pub attribute: String,
}

impl Feature {
    pub fn new(
        seqname: impl Into<String>,
        source: impl Into<String>,
        feature: impl Into<String>,
        start: u64,
        end: u64,
    ) -> Self {
        Self {
            seqname: seqname.into(),
            source: source.into(),
            feature: feature.into(),
            start,
            end,
            score: None,
            score_text: None,
            strand: Strand::Unknown,
            frame: None,
            attribute: String::new(),
        }
    }

    #[inline]
    pub fn score_is_null(&self) -> bool {
        self.score.is_none()
    }

    /// Value of a `tag "value"` or `tag value` pair in the attribute column
    pub fn attribute_value(&self, tag: &str) -> Option<&str> {
        self.attribute.split(';').find_map(|pair| {
            let pair = pair.trim();
            let (name, value) = pair.split_once(|c: char| c.is_whitespace() || c == '=')?;
            if name != tag {
                return None;
            }
            Some(value.trim().trim_matches('"'))
        })
    }
}

/// Field-wise equality; `score_text` is formatting only and is ignored
impl PartialEq for Feature {
    fn eq(&self, other: &Self) -> bool {
        self.seqname == other.seqname
            && self.source == other.source
            && self.feature == other.feature
            && self.start == other.start
            && self.end == other.end
            && self.score == other.score
            && self.strand == other.strand
            && self.frame == other.frame
            && self.attribute == other.attribute
    }
}

/// Named group of features, as indices into the owning set
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeatureGroup {
    pub name: String,
    pub features: Vec<usize>,
}

/// Ordered features plus file metadata
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureSet {
    pub features: Vec<Feature>,
    pub gff_version: Option<String>,
    pub source: Option<String>,
    pub source_version: Option<String>,
    pub date: Option<String>,
    pub groups: Vec<FeatureGroup>,
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// New set stamped with generator name and version
    pub fn with_source(source: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            gff_version: Some("2".to_string()),
            source: Some(source.into()),
            source_version: Some(version.into()),
            ..Self::default()
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    /// Sort by seqname, start, end. Clears any grouping.
    pub fn sort(&mut self) {
        self.ungroup();
        self.features.sort_by(|a, b| {
            a.seqname
                .cmp(&b.seqname)
                .then(a.start.cmp(&b.start))
                .then(a.end.cmp(&b.end))
        });
    }

    /// Group features by the value of attribute `tag`.
    ///
    /// Groups appear in order of first occurrence; features without the tag
    /// share a group with an empty name.
    pub fn group_by(&mut self, tag: &str) {
        let mut groups: Vec<FeatureGroup> = Vec::new();
        let mut index: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for (i, feat) in self.features.iter().enumerate() {
            let name = feat.attribute_value(tag).unwrap_or("").to_string();
            let slot = *index.entry(name.clone()).or_insert_with(|| {
                groups.push(FeatureGroup {
                    name,
                    features: Vec::new(),
                });
                groups.len() - 1
            });
            groups[slot].features.push(i);
        }
        self.groups = groups;
    }

    pub fn ungroup(&mut self) {
        self.groups.clear();
    }

    pub fn group_features<'a>(&'a self, group: &'a FeatureGroup) -> impl Iterator<Item = &'a Feature> + 'a {
        group.features.iter().filter_map(move |&i| self.features.get(i))
    }
}
