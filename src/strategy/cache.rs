//! On-disk memoization of solved size vectors.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info};
use tempfile::NamedTempFile;

use crate::error::Result;

/// Cache key of a sizing method for one array geometry.
pub fn cache_key(method: &str, num_rows: usize, num_cols: usize) -> String {
    format!("{method}_{num_rows}_{num_cols}")
}

/// A JSON map from cache key to size vector.
///
/// Mutation goes through `&mut self`, so a process has one writer per cache.
/// Each store re-reads the file, merges, and replaces it atomically; two
/// processes racing on the same file can lose an update but never see a
/// partially written file.
#[derive(Debug, Clone, PartialEq)]
pub struct SizingCache {
    path: PathBuf,
    entries: BTreeMap<String, Vec<f64>>,
}

impl SizingCache {
    /// Opens the cache at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = read_entries(&path)?;
        debug!("opened sizing cache {:?} with {} entries", path, entries.len());
        Ok(Self { path, entries })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&[f64]> {
        self.entries.get(key).map(|v| v.as_slice())
    }

    /// Records `sizes` under `key` and writes the cache file.
    pub fn store(&mut self, key: &str, sizes: Vec<f64>) -> Result<()> {
        let mut merged = read_entries(&self.path)?;
        merged.insert(key.to_string(), sizes);
        write_atomic(&self.path, &merged)?;
        self.entries = merged;
        info!("cached sizes for {key} in {:?}", self.path);
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<BTreeMap<String, Vec<f64>>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    Ok(serde_json::from_str(&contents)?)
}

fn write_atomic(path: &Path, entries: &BTreeMap<String, Vec<f64>>) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut file = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut file, entries)?;
    file.write_all(b"\n")?;
    file.persist(path)?;
    Ok(())
}
