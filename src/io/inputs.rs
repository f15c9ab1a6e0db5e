//! # Input Loaders
//!
//! JSON inputs (alignment bundle, tree model, motif, emissions), optionally
//! gzip-compressed when the path ends in `.gz`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use serde::de::DeserializeOwned;
use tracing::{debug, info_span};

use crate::data::AlignmentBundle;
use crate::error::{MotifError, Result};

/// Open a possibly-gzipped text input
pub fn open_input(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    if !path.exists() {
        return Err(MotifError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let file = File::open(path)?;
    let is_gzipped = path.extension().map(|e| e == "gz").unwrap_or(false);

    let reader: Box<dyn BufRead + Send> = if is_gzipped {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(reader)
}

/// Deserialize a JSON document from `path`
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let reader = open_input(path)?;
    let value = serde_json::from_reader(reader).map_err(|e| {
        MotifError::config(format!("cannot parse {}: {}", path.display(), e))
    })?;
    Ok(value)
}

/// Load and validate an alignment bundle
pub fn load_bundle(path: &Path) -> Result<AlignmentBundle> {
    info_span!("load_bundle", path = %path.display()).in_scope(|| {
        let bundle: AlignmentBundle = load_json(path)?;
        bundle.validate()?;
        debug!(
            n_rows = bundle.n_rows(),
            n_tuples = bundle.n_tuples(),
            n_blocks = bundle.n_blocks(),
            "loaded alignment bundle"
        );
        Ok(bundle)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const BUNDLE: &str = r#"{
        "seqnames": ["hg", "mm"],
        "tuples": ["AA", "C-"],
        "blocks": [{"name": "b0", "starts": [1, 1], "columns": [0, 1, 0]}]
    }"#;

    #[test]
    fn test_load_plain_and_gz() {
        let dir = tempfile::tempdir().expect("Create temp dir");
        let plain = dir.path().join("align.json");
        std::fs::write(&plain, BUNDLE).unwrap();
        let bundle = load_bundle(&plain).unwrap();
        assert_eq!(bundle.n_blocks(), 1);
        assert!(bundle.blocks[0].seqname.is_none());

        let gz = dir.path().join("align.json.gz");
        let mut enc = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        enc.write_all(BUNDLE.as_bytes()).unwrap();
        enc.finish().unwrap();
        assert_eq!(load_bundle(&gz).unwrap().n_tuples(), 2);
    }

    #[test]
    fn test_missing_and_malformed() {
        let dir = tempfile::tempdir().expect("Create temp dir");
        let missing = dir.path().join("nope.json");
        assert!(matches!(
            load_bundle(&missing),
            Err(MotifError::FileNotFound { .. })
        ));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(load_bundle(&bad), Err(MotifError::Config { .. })));
    }
}
