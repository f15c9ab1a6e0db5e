//! # GFF Reader/Writer
//!
//! Nine tab-separated columns:
//! `seqname source feature start end score strand frame attribute`.
//!
//! Null score and null frame are written as `.`; an empty attribute is
//! written as `.` and `.` reads back as empty. Scores keep the text they were
//! read with, so a set read from disk writes back identically.
//!
//! Comment lines carrying `gff-version`, `source-version` or `date` tags fill
//! the set's metadata. All other comments are skipped.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::info_span;

use crate::data::{Feature, FeatureSet, Strand};
use crate::error::{MotifError, Result};

const MIN_COLUMNS: usize = 5;

/// Streaming GFF writer
pub struct GffWriter {
    writer: Box<dyn Write + Send>,
}

impl GffWriter {
    /// Create a writer on `path`, gzip-compressed when it ends in `.gz`
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        let is_gzipped = path.extension().map(|e| e == "gz").unwrap_or(false);

        let writer: Box<dyn Write + Send> = if is_gzipped {
            Box::new(BufWriter::new(GzEncoder::new(file, Compression::default())))
        } else {
            Box::new(BufWriter::new(file))
        };
        Ok(Self { writer })
    }

    /// Writer on standard output
    pub fn stdout() -> Self {
        Self {
            writer: Box::new(BufWriter::new(io::stdout())),
        }
    }

    /// Writer over any sink
    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self { writer }
    }

    /// Write the metadata comment lines present in `set`
    pub fn write_header(&mut self, set: &FeatureSet) -> Result<()> {
        if let Some(version) = &set.gff_version {
            writeln!(self.writer, "##gff-version {}", version)?;
        }
        match (&set.source, &set.source_version) {
            (Some(src), Some(ver)) => writeln!(self.writer, "##source-version {} {}", src, ver)?,
            (Some(src), None) => writeln!(self.writer, "##source-version {}", src)?,
            _ => {}
        }
        if let Some(date) = &set.date {
            writeln!(self.writer, "##date {}", date)?;
        }
        Ok(())
    }

    pub fn write_feature(&mut self, feat: &Feature) -> Result<()> {
        write!(
            self.writer,
            "{}\t{}\t{}\t{}\t{}\t",
            feat.seqname, feat.source, feat.feature, feat.start, feat.end
        )?;
        match (feat.score, feat.score_text.as_deref()) {
            (Some(score), Some(text)) if text.parse::<f64>().ok() == Some(score) => {
                self.writer.write_all(text.as_bytes())?
            }
            (Some(score), _) => write!(self.writer, "{}", score)?,
            (None, _) => self.writer.write_all(b".")?,
        }
        write!(self.writer, "\t{}\t", feat.strand)?;
        match feat.frame {
            Some(frame) => write!(self.writer, "{}", frame)?,
            None => self.writer.write_all(b".")?,
        }
        if feat.attribute.is_empty() {
            self.writer.write_all(b"\t.\n")?;
        } else {
            writeln!(self.writer, "\t{}", feat.attribute)?;
        }
        Ok(())
    }

    /// Write header and every feature
    pub fn write_set(&mut self, set: &FeatureSet) -> Result<()> {
        info_span!("gff_write", n_features = set.len()).in_scope(|| {
            self.write_header(set)?;
            for feat in &set.features {
                self.write_feature(feat)?;
            }
            self.flush()
        })
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for GffWriter {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Read a feature set from a file (gzip by `.gz` extension)
pub fn read_gff_file(path: &Path) -> Result<FeatureSet> {
    let file = File::open(path).map_err(|_| MotifError::FileNotFound {
        path: path.to_path_buf(),
    })?;
    let is_gzipped = path.extension().map(|e| e == "gz").unwrap_or(false);
    if is_gzipped {
        read_gff(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        read_gff(BufReader::new(file))
    }
}

/// Parse a feature set from any buffered reader
pub fn read_gff<R: BufRead>(reader: R) -> Result<FeatureSet> {
    let mut set = FeatureSet::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        let line = line.trim_end_matches(['\r', '\n']);

        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with('#') {
            parse_meta(line, &mut set);
            continue;
        }
        set.push(parse_feature(line, line_no)?);
    }

    Ok(set)
}

fn parse_meta(line: &str, set: &mut FeatureSet) {
    let body = line.trim_start_matches('#').trim();
    let (tag, value) = match body.split_once(char::is_whitespace) {
        Some((tag, value)) => (tag, value.trim()),
        None => (body, ""),
    };
    match tag {
        "gff-version" => set.gff_version = Some(value.to_string()),
        "source-version" => {
            let (src, ver) = match value.split_once(char::is_whitespace) {
                Some((src, ver)) => (src, Some(ver.trim().to_string())),
                None => (value, None),
            };
            set.source = Some(src.to_string());
            set.source_version = ver;
        }
        "date" => set.date = Some(value.to_string()),
        _ => {}
    }
}

fn parse_feature(line: &str, line_no: usize) -> Result<Feature> {
    let fields: Vec<&str> = line.splitn(9, '\t').collect();
    if fields.len() < MIN_COLUMNS {
        return Err(MotifError::parse(
            line_no,
            format!("expected at least {} columns, found {}", MIN_COLUMNS, fields.len()),
        ));
    }

    let start = parse_coord(fields[3], "start", line_no)?;
    let end = parse_coord(fields[4], "end", line_no)?;
    let mut feat = Feature::new(fields[0], fields[1], fields[2], start, end);

    if let Some(&score) = fields.get(5) {
        if score != "." {
            feat.score = Some(score.parse().map_err(|_| {
                MotifError::parse(line_no, format!("invalid score '{}'", score))
            })?);
            feat.score_text = Some(score.to_string());
        }
    }
    if let Some(&strand) = fields.get(6) {
        feat.strand = strand
            .parse()
            .map_err(|_| MotifError::parse(line_no, format!("invalid strand '{}'", strand)))?;
    }
    if let Some(&frame) = fields.get(7) {
        if frame != "." {
            let value: u8 = frame
                .parse()
                .ok()
                .filter(|f| *f <= 2)
                .ok_or_else(|| MotifError::parse(line_no, format!("invalid frame '{}'", frame)))?;
            feat.frame = Some(value);
        }
    }
    if let Some(&attribute) = fields.get(8) {
        if attribute != "." {
            feat.attribute = attribute.to_string();
        }
    }

    Ok(feat)
}

fn parse_coord(field: &str, what: &str, line_no: usize) -> Result<u64> {
    field
        .trim()
        .parse()
        .map_err(|_| MotifError::parse(line_no, format!("invalid {} '{}'", what, field)))
}
