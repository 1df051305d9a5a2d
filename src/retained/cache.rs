//! On-disk cache for retained-heap results.
//!
//! The cache lives next to the snapshot (or in an overridden directory) as
//! `<snapshot-name>.<fingerprint>.retained_heap`, where the fingerprint is
//! the hex SHA-1 of the snapshot file's bytes. The file carries its own
//! magic, version, and fingerprint so stale or foreign caches are detected
//! and recomputed rather than trusted. Writes go through a `.tmp` rename,
//! so readers never observe a torn file.

use crate::codec::{ValueReader, ValueWriter};
use crate::error::{HeapError, Result};
use crate::retained::RetainedHeap;
use rustc_hash::FxHashMap;
use sha1::{Digest, Sha1};
use std::ffi::OsString;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const CACHE_MAGIC: [u8; 4] = *b"HPRH";
const CACHE_VERSION: u64 = 1;

pub struct RetainedHeapCache {
    snapshot_path: PathBuf,
    cache_dir: Option<PathBuf>,
    fingerprint: Option<String>,
}

impl RetainedHeapCache {
    pub fn new(snapshot_path: &Path, cache_dir: Option<&Path>) -> Self {
        Self {
            snapshot_path: snapshot_path.to_path_buf(),
            cache_dir: cache_dir.map(Path::to_path_buf),
            fingerprint: None,
        }
    }

    /// Hex SHA-1 of the snapshot file's bytes, computed once on first use.
    pub fn fingerprint(&mut self) -> Result<&str> {
        if self.fingerprint.is_none() {
            let mut file = std::fs::File::open(&self.snapshot_path)?;
            let mut hasher = Sha1::new();
            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            let digest = hasher.finalize();
            let mut hex = String::with_capacity(40);
            for byte in digest {
                hex.push_str(&format!("{byte:02x}"));
            }
            self.fingerprint = Some(hex);
        }
        Ok(self.fingerprint.as_deref().unwrap_or_default())
    }

    /// `<snapshot-path>.<fingerprint>.retained_heap`, relocated into the
    /// cache directory when one is configured.
    pub fn cache_path(&mut self) -> Result<PathBuf> {
        let fingerprint = self.fingerprint()?.to_string();
        let suffix = format!(".{fingerprint}.retained_heap");
        match &self.cache_dir {
            Some(dir) => {
                let file_name = self
                    .snapshot_path
                    .file_name()
                    .map(|n| n.to_os_string())
                    .unwrap_or_else(|| OsString::from("snapshot"));
                let mut name = file_name;
                name.push(suffix);
                Ok(dir.join(name))
            }
            None => {
                let mut name = self.snapshot_path.as_os_str().to_os_string();
                name.push(suffix);
                Ok(PathBuf::from(name))
            }
        }
    }

    /// Adopt a cache with the matching fingerprint. Any read problem —
    /// missing file, bad magic, version or fingerprint mismatch,
    /// truncation — discards the cache and returns `None`.
    pub fn load_if_exists(&mut self) -> Result<Option<RetainedHeap>> {
        let path = self.cache_path()?;
        let expected = self.fingerprint()?.to_string();
        match read_cache_file(&path, &expected) {
            Ok(retained) => {
                tracing::info!(path = %path.display(), "loaded retained-heap cache");
                Ok(Some(retained))
            }
            Err(HeapError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no retained-heap cache");
                Ok(None)
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "discarding unusable retained-heap cache");
                Ok(None)
            }
        }
    }

    /// Serialize to `<name>.tmp`, then rename into place.
    pub fn store(&mut self, retained: &RetainedHeap) -> Result<()> {
        let path = self.cache_path()?;
        let fingerprint = self.fingerprint()?.to_string();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut tmp = path.as_os_str().to_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let file = std::fs::File::create(&tmp)?;
        let mut w = ValueWriter::new(BufWriter::new(file));
        write_cache_body(&mut w, &fingerprint, retained)?;
        w.into_inner().flush()?;

        std::fs::rename(&tmp, &path)?;
        tracing::info!(path = %path.display(), "saved retained-heap cache");
        Ok(())
    }
}

fn write_cache_body<W: std::io::Write>(
    w: &mut ValueWriter<W>,
    fingerprint: &str,
    retained: &RetainedHeap,
) -> Result<()> {
    w.write_bytes(&CACHE_MAGIC)?;
    w.write_uint_body(CACHE_VERSION)?;
    w.write_raw_short_string(fingerprint)?;

    let mut objects: Vec<(u64, u64)> = retained.objects().collect();
    objects.sort_unstable_by_key(|&(addr, _)| addr);
    w.write_uint_body(objects.len() as u64)?;
    for (addr, value) in objects {
        w.write_raw_addr(addr)?;
        w.write_uint_body(value)?;
    }

    let mut threads: Vec<(&str, u64)> = retained.threads().collect();
    threads.sort_unstable_by_key(|&(name, _)| name);
    w.write_uint_body(threads.len() as u64)?;
    for (name, value) in threads {
        w.write_raw_short_string(name)?;
        w.write_uint_body(value)?;
    }

    Ok(())
}

fn read_cache_file(path: &Path, expected_fingerprint: &str) -> Result<RetainedHeap> {
    let file = std::fs::File::open(path)?;
    let mut r = ValueReader::new(BufReader::new(file));

    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != CACHE_MAGIC {
        return Err(HeapError::malformed("cache: bad magic"));
    }
    let version = r.read_uint_body()?;
    if version != CACHE_VERSION {
        return Err(HeapError::malformed(format!("cache: version {version} not supported")));
    }
    let fingerprint = r.read_raw_short_string()?;
    if fingerprint != expected_fingerprint {
        return Err(HeapError::malformed("cache: fingerprint mismatch"));
    }

    let n_objects = r.read_uint_body()?;
    let mut objects =
        FxHashMap::with_capacity_and_hasher(n_objects.min(1 << 24) as usize, Default::default());
    for _ in 0..n_objects {
        let addr = r.read_raw_addr()?;
        let value = r.read_uint_body()?;
        objects.insert(addr, value);
    }

    let n_threads = r.read_uint_body()?;
    let mut threads =
        FxHashMap::with_capacity_and_hasher(n_threads.min(1 << 16) as usize, Default::default());
    for _ in 0..n_threads {
        let name = r.read_raw_short_string()?;
        let value = r.read_uint_body()?;
        threads.insert(name, value);
    }

    Ok(RetainedHeap::from_parts(objects, threads))
}
