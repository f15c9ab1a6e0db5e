//! # Count-Table Caches
//!
//! Two serializations of a `CountTable`:
//!
//! Binary spill cache (written by workers, read back by the merger):
//! - [Magic 8 bytes] "PMCACHE1"
//! - [Header] version u32, key_len u32, count_len u32, n_keys u64, n_samples u64
//! - [Entries] n_keys x (key_len u32 + count_len u64), little-endian
//!
//! Text hash dump (debugging, and the direct hash-read entry point):
//! ```text
//! #key_len 4
//! #count_len 1
//! #n_keys 2
//! #n_samples 9
//! 1,2,1,2<TAB>8
//! 2,2,1,1<TAB>1
//! ```
//!
//! Both formats are self-describing: a reader needs no outside context to
//! know the key length or how many samples the table represents.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use memmap2::Mmap;
use tracing::debug;

use crate::data::{CountTable, CountVector, PathKey};
use crate::error::{MotifError, Result};

const MAGIC: &[u8; 8] = b"PMCACHE1";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 8 + 4 + 4 + 4 + 8 + 8;

/// Decoded cache header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheHeader {
    pub key_len: usize,
    pub count_len: usize,
    pub n_keys: u64,
    pub n_samples: u64,
}

impl CacheHeader {
    fn entry_bytes(&self) -> usize {
        self.key_len * 4 + self.count_len * 8
    }
}

/// Serialize `table` to a binary cache at `path`
pub fn write_cache(path: &Path, table: &CountTable) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writer.write_all(MAGIC)?;
    writer.write_all(&VERSION.to_le_bytes())?;
    writer.write_all(&(table.key_len() as u32).to_le_bytes())?;
    writer.write_all(&(table.count_len() as u32).to_le_bytes())?;
    writer.write_all(&(table.len() as u64).to_le_bytes())?;
    writer.write_all(&table.n_samples().to_le_bytes())?;

    for (key, counts) in table.iter() {
        for v in key.as_slice() {
            writer.write_all(&v.to_le_bytes())?;
        }
        for c in counts.as_slice() {
            writer.write_all(&c.to_le_bytes())?;
        }
    }

    writer.flush()?;
    Ok(())
}

/// Memory-mapped reader over one binary cache
pub struct CacheReader {
    path: PathBuf,
    mmap: Mmap,
    header: CacheHeader,
}

impl CacheReader {
    /// Open a cache and validate its header and size
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| MotifError::cache(path, e.to_string()))?;
        let file_len = file
            .metadata()
            .map_err(|e| MotifError::cache(path, e.to_string()))?
            .len() as usize;
        if file_len < HEADER_LEN {
            return Err(MotifError::cache(path, "file too short for cache header"));
        }
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| MotifError::cache(path, e.to_string()))?;

        if &mmap[0..8] != MAGIC {
            return Err(MotifError::cache(path, "invalid magic; not a spill cache"));
        }
        let version = read_u32(&mmap, 8);
        if version != VERSION {
            return Err(MotifError::cache(path, format!("unsupported version: {}", version)));
        }

        let header = CacheHeader {
            key_len: read_u32(&mmap, 12) as usize,
            count_len: read_u32(&mmap, 16) as usize,
            n_keys: read_u64(&mmap, 20),
            n_samples: read_u64(&mmap, 28),
        };
        if header.count_len == 0 {
            return Err(MotifError::cache(path, "count vectors have zero length"));
        }

        let expected = (header.n_keys as usize)
            .checked_mul(header.entry_bytes())
            .and_then(|body| body.checked_add(HEADER_LEN))
            .ok_or_else(|| MotifError::cache(path, "header sizes overflow"))?;
        if expected != mmap.len() {
            return Err(MotifError::cache(
                path,
                format!(
                    "expected {} bytes for {} entries, found {}",
                    expected,
                    header.n_keys,
                    mmap.len()
                ),
            ));
        }

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            header,
        })
    }

    #[inline]
    pub fn header(&self) -> CacheHeader {
        self.header
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add every entry and the sample tally into `table`
    pub fn fold_into(&self, table: &mut CountTable) -> Result<()> {
        let CacheHeader {
            key_len,
            count_len,
            n_keys,
            n_samples,
        } = self.header;
        if key_len != table.key_len() || count_len != table.count_len() {
            return Err(MotifError::cache(
                &self.path,
                format!(
                    "shape {}x{} does not match expected {}x{}",
                    key_len,
                    count_len,
                    table.key_len(),
                    table.count_len()
                ),
            ));
        }

        let mut cursor = HEADER_LEN;
        let mut key_buf = Vec::with_capacity(key_len);
        for _ in 0..n_keys {
            key_buf.clear();
            for _ in 0..key_len {
                key_buf.push(read_u32(&self.mmap, cursor));
                cursor += 4;
            }
            let mut counts = Vec::with_capacity(count_len);
            for _ in 0..count_len {
                counts.push(read_u64(&self.mmap, cursor));
                cursor += 8;
            }
            table.add(PathKey::from_slice(&key_buf), CountVector::from_vec(counts))?;
        }
        table.record_sample(n_samples);
        Ok(())
    }

    /// Materialize the cache as a table
    pub fn into_table(self) -> Result<CountTable> {
        let mut table = CountTable::with_capacity(
            self.header.key_len,
            self.header.count_len,
            self.header.n_keys as usize,
        );
        self.fold_into(&mut table)?;
        Ok(table)
    }
}

#[inline]
fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

#[inline]
fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

/// Read a whole binary cache into a table
pub fn read_cache(path: &Path) -> Result<CountTable> {
    CacheReader::open(path)?.into_table()
}

// ============================================================================
// Text hash dump
// ============================================================================

/// Write `table` as a text hash dump, keys in ascending order
pub fn write_hash_dump<W: Write>(writer: &mut W, table: &CountTable) -> Result<()> {
    writeln!(writer, "#key_len {}", table.key_len())?;
    writeln!(writer, "#count_len {}", table.count_len())?;
    writeln!(writer, "#n_keys {}", table.len())?;
    writeln!(writer, "#n_samples {}", table.n_samples())?;
    for (key, counts) in table.sorted_entries() {
        write!(writer, "{}\t", key)?;
        for (i, c) in counts.as_slice().iter().enumerate() {
            if i > 0 {
                writer.write_all(b",")?;
            }
            write!(writer, "{}", c)?;
        }
        writeln!(writer)?;
    }
    Ok(())
}

/// Write a hash dump to a file
pub fn write_hash_dump_file(path: &Path, table: &CountTable) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_hash_dump(&mut writer, table)?;
    writer.flush()?;
    Ok(())
}

/// Parse a text hash dump; `origin` names the source in error messages
pub fn read_hash_dump<R: BufRead>(reader: R, origin: &Path) -> Result<CountTable> {
    let mut key_len = None;
    let mut count_len = None;
    let mut n_keys = None;
    let mut n_samples = None;
    let mut table: Option<CountTable> = None;
    let mut seen = 0u64;

    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| MotifError::cache(origin, e.to_string()))?;
        let line_no = idx + 1;
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        if let Some(meta) = line.strip_prefix('#') {
            let (tag, value) = meta
                .split_once(char::is_whitespace)
                .ok_or_else(|| dump_error(origin, line_no, "header line without value"))?;
            let value: u64 = value
                .trim()
                .parse()
                .map_err(|_| dump_error(origin, line_no, "header value is not an integer"))?;
            match tag {
                "key_len" => key_len = Some(value as usize),
                "count_len" => count_len = Some(value as usize),
                "n_keys" => n_keys = Some(value),
                "n_samples" => n_samples = Some(value),
                _ => debug!(tag, "ignoring unknown hash dump header"),
            }
            continue;
        }

        let table = match &mut table {
            Some(t) => t,
            empty @ None => {
                let (kl, cl) = match (key_len, count_len) {
                    (Some(kl), Some(cl)) => (kl, cl),
                    _ => return Err(dump_error(origin, line_no, "entries before #key_len/#count_len header")),
                };
                let capacity = n_keys.unwrap_or(0) as usize;
                empty.insert(CountTable::with_capacity(kl, cl, capacity))
            }
        };

        let (key_str, counts_str) = line
            .split_once('\t')
            .ok_or_else(|| dump_error(origin, line_no, "expected <key>TAB<counts>"))?;
        let key: PathKey = key_str
            .parse()
            .map_err(|e: MotifError| dump_error(origin, line_no, &e.to_string()))?;
        let counts = counts_str
            .split(',')
            .map(|c| c.trim().parse::<u64>())
            .collect::<std::result::Result<Vec<u64>, _>>()
            .map_err(|e| dump_error(origin, line_no, &format!("bad count: {}", e)))?;
        table
            .add(key, CountVector::from_vec(counts))
            .map_err(|e| dump_error(origin, line_no, &e.to_string()))?;
        seen += 1;
    }

    let (kl, cl) = match (key_len, count_len) {
        (Some(kl), Some(cl)) => (kl, cl),
        _ => return Err(MotifError::cache(origin, "missing #key_len/#count_len header")),
    };
    let mut table = table.unwrap_or_else(|| CountTable::new(kl, cl));
    if let Some(declared) = n_keys {
        if declared != seen {
            return Err(MotifError::cache(
                origin,
                format!("header declares {} keys but {} were read", declared, seen),
            ));
        }
    }
    let n_samples = n_samples.ok_or_else(|| MotifError::cache(origin, "missing #n_samples header"))?;
    table.record_sample(n_samples);
    Ok(table)
}

/// Read a hash dump from a file
pub fn read_hash_dump_file(path: &Path) -> Result<CountTable> {
    let file = File::open(path).map_err(|e| MotifError::cache(path, e.to_string()))?;
    read_hash_dump(BufReader::new(file), path)
}

fn dump_error(origin: &Path, line: usize, message: &str) -> MotifError {
    MotifError::cache(origin, format!("line {}: {}", line, message))
}

// ============================================================================
// Naming, manifests, and per-worker spilling
// ============================================================================

/// Session-wide cache file naming: `<prefix>.<seq>.cache`.
///
/// The sequence number comes from one atomic counter, so concurrent workers
/// never receive the same name. When a manifest is enabled, every written
/// cache is appended to `<prefix>.caches` so an interrupted run can be
/// resumed from its spills.
pub struct CacheNamer {
    prefix: PathBuf,
    next_seq: AtomicU64,
    manifest: Option<(PathBuf, Mutex<BufWriter<File>>)>,
}

impl CacheNamer {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            next_seq: AtomicU64::new(0),
            manifest: None,
        }
    }

    /// Naming plus a manifest file listing each registered cache
    pub fn with_manifest(prefix: impl Into<PathBuf>) -> Result<Self> {
        let prefix = prefix.into();
        let manifest_path = with_suffix(&prefix, ".caches");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&manifest_path)?;
        Ok(Self {
            prefix,
            next_seq: AtomicU64::new(0),
            manifest: Some((manifest_path, Mutex::new(BufWriter::new(file)))),
        })
    }

    /// Reserve the next unique cache path
    pub fn next_path(&self) -> PathBuf {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        with_suffix(&self.prefix, &format!(".{:06}.cache", seq))
    }

    pub fn manifest_path(&self) -> Option<&Path> {
        self.manifest.as_ref().map(|(p, _)| p.as_path())
    }

    /// Record a finished cache in the manifest, if any
    pub fn register(&self, path: &Path) -> Result<()> {
        if let Some((_, writer)) = &self.manifest {
            let mut writer = writer
                .lock()
                .map_err(|_| MotifError::config("cache manifest lock poisoned"))?;
            writeln!(writer, "{}", path.display())?;
            writer.flush()?;
        }
        Ok(())
    }
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = prefix.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Per-worker spill writer. Each call writes to a fresh file, so workers
/// never contend on a file handle.
pub struct SpillWriter {
    namer: Arc<CacheNamer>,
    written: Vec<PathBuf>,
}

impl SpillWriter {
    pub fn new(namer: Arc<CacheNamer>) -> Self {
        Self {
            namer,
            written: Vec::new(),
        }
    }

    /// Move the table's contents into a new cache file and reset it.
    ///
    /// A table with recorded samples but no keys is still written, since its
    /// sample tally is part of the session total.
    pub fn spill(&mut self, table: &mut CountTable) -> Result<Option<PathBuf>> {
        if table.is_empty() && table.n_samples() == 0 {
            return Ok(None);
        }
        let snapshot = table.take();
        let path = self.namer.next_path();
        write_cache(&path, &snapshot)?;
        self.namer.register(&path)?;
        debug!(
            path = %path.display(),
            n_keys = snapshot.len(),
            n_samples = snapshot.n_samples(),
            "spilled count table"
        );
        self.written.push(path.clone());
        Ok(Some(path))
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    pub fn into_written(self) -> Vec<PathBuf> {
        self.written
    }
}

/// Read a cache list: one path per line, `#` comments and blanks ignored
pub fn read_cache_list(path: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(path).map_err(|e| {
        MotifError::config(format!("cannot read cache list {}: {}", path.display(), e))
    })?;
    let mut out = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        out.push(PathBuf::from(line));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_table() -> CountTable {
        let mut table = CountTable::new(4, 2);
        table
            .add(PathKey::new(vec![1, 2, 1, 2]), CountVector::from_vec(vec![3, 1]))
            .unwrap();
        table
            .add(PathKey::new(vec![2, 2, 1, 1]), CountVector::from_vec(vec![1, 0]))
            .unwrap();
        table.record_sample(4);
        table
    }

    #[test]
    fn test_binary_cache_preserves_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.cache");
        let table = sample_table();
        write_cache(&path, &table).unwrap();

        let reader = CacheReader::open(&path).unwrap();
        assert_eq!(
            reader.header(),
            CacheHeader {
                key_len: 4,
                count_len: 2,
                n_keys: 2,
                n_samples: 4
            }
        );
        assert_eq!(reader.into_table().unwrap(), table);
    }

    #[test]
    fn test_truncated_cache_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.cache");
        write_cache(&path, &sample_table()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        let err = CacheReader::open(&path).err().unwrap();
        assert!(err.is_cache_error());

        std::fs::write(&path, b"PMCACHE").unwrap();
        assert!(CacheReader::open(&path).is_err());
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.cache");
        std::fs::write(&path, vec![0u8; HEADER_LEN]).unwrap();
        assert!(CacheReader::open(&path).is_err());
    }

    #[test]
    fn test_fold_rejects_shape_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.cache");
        write_cache(&path, &sample_table()).unwrap();

        let mut wrong = CountTable::new(6, 2);
        let reader = CacheReader::open(&path).unwrap();
        assert!(reader.fold_into(&mut wrong).is_err());
    }

    #[test]
    fn test_hash_dump_text() {
        let table = sample_table();
        let mut buf = Vec::new();
        write_hash_dump(&mut buf, &table).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert_eq!(
            text,
            "#key_len 4\n#count_len 2\n#n_keys 2\n#n_samples 4\n1,2,1,2\t3,1\n2,2,1,1\t1,0\n"
        );

        let back = read_hash_dump(Cursor::new(buf), Path::new("mem")).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn test_hash_dump_key_count_mismatch() {
        let text = "#key_len 2\n#count_len 1\n#n_keys 3\n#n_samples 1\n0,1\t1\n";
        let err = read_hash_dump(Cursor::new(text), Path::new("mem")).err().unwrap();
        assert!(err.to_string().contains("declares 3 keys"));
    }

    #[test]
    fn test_hash_dump_empty_table() {
        let text = "#key_len 2\n#count_len 1\n#n_keys 0\n#n_samples 12\n";
        let table = read_hash_dump(Cursor::new(text), Path::new("mem")).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.n_samples(), 12);
    }

    #[test]
    fn test_namer_unique_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("run");
        let namer = Arc::new(CacheNamer::with_manifest(&prefix).unwrap());
        let a = namer.next_path();
        let b = namer.next_path();
        assert_ne!(a, b);
        assert!(a.to_string_lossy().ends_with("run.000000.cache"));

        let mut spill = SpillWriter::new(namer.clone());
        let mut table = sample_table();
        let written = spill.spill(&mut table).unwrap().unwrap();
        assert!(table.is_empty());
        assert!(spill.spill(&mut table).unwrap().is_none());

        let listed = read_cache_list(namer.manifest_path().unwrap()).unwrap();
        assert_eq!(listed, vec![written]);
    }

    #[test]
    fn test_spill_keeps_sample_only_tables() {
        let dir = tempfile::tempdir().unwrap();
        let namer = Arc::new(CacheNamer::new(dir.path().join("run")));
        let mut spill = SpillWriter::new(namer);
        let mut table = CountTable::new(4, 1);
        table.record_sample(5);
        let path = spill.spill(&mut table).unwrap().unwrap();
        assert_eq!(read_cache(&path).unwrap().n_samples(), 5);
    }
}
