//! JSON dataset files, one per Source.
//!
//! A Source file is the unit of write. It is either replaced as a whole through
//! a temp file and an atomic rename, or left untouched when the merged content
//! equals what is already on disk.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::CatalogError;
use crate::models::Category;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Unchanged,
}

/// Counts from one merge, for the run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: usize,
    pub updated: usize,
    pub total: usize,
}

impl MergeStats {
    pub fn touched(&self) -> usize {
        self.inserted + self.updated
    }
}

#[derive(Debug, Clone)]
pub struct DatasetStore {
    dir: PathBuf,
}

impl DatasetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    /// Source files in the data directory, sorted by name.
    ///
    /// # Errors
    /// [`CatalogError::Persistence`] when the directory cannot be read.
    pub fn list_files(&self) -> Result<Vec<String>, CatalogError> {
        let entries =
            std::fs::read_dir(&self.dir).map_err(|e| CatalogError::persistence(&self.dir, e))?;
        let mut files: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
            .filter_map(|entry| entry.file_name().to_str().map(ToString::to_string))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Reads a Source file. A missing file is an empty Source.
    ///
    /// # Errors
    /// * [`CatalogError::Persistence`] when the file exists but cannot be read
    /// * [`CatalogError::Parse`] when it is not a valid dataset
    pub fn load(&self, file: &str) -> Result<Vec<Category>, CatalogError> {
        let path = self.path_for(file);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(CatalogError::persistence(path, err)),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).map_err(|e| CatalogError::parse(path.display(), e))
    }

    /// Merges a fresh crawl into the file and writes it when anything changed.
    ///
    /// # Errors
    /// Any load error, or [`CatalogError::Persistence`] when writing fails.
    pub fn merge_into(
        &self,
        file: &str,
        fresh: Vec<Category>,
    ) -> Result<(WriteOutcome, MergeStats), CatalogError> {
        let mut categories = self.load(file)?;
        let stats = merge(&mut categories, fresh);
        let outcome = self.write_if_changed(file, &categories)?;
        Ok((outcome, stats))
    }

    /// Serializes `categories` and replaces the file unless the bytes are equal.
    ///
    /// # Errors
    /// [`CatalogError::Persistence`] on any I/O failure.
    pub fn write_if_changed(
        &self,
        file: &str,
        categories: &[Category],
    ) -> Result<WriteOutcome, CatalogError> {
        let path = self.path_for(file);
        let mut bytes = serde_json::to_vec_pretty(categories)
            .map_err(|e| CatalogError::persistence(&path, std::io::Error::other(e)))?;
        bytes.push(b'\n');

        if std::fs::read(&path).is_ok_and(|existing| existing == bytes) {
            debug!(file, "dataset unchanged; skipping write");
            return Ok(WriteOutcome::Unchanged);
        }

        std::fs::create_dir_all(&self.dir).map_err(|e| CatalogError::persistence(&self.dir, e))?;
        let mut tmp =
            NamedTempFile::new_in(&self.dir).map_err(|e| CatalogError::persistence(&self.dir, e))?;
        tmp.write_all(&bytes)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| CatalogError::persistence(tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| CatalogError::persistence(&path, e.error))?;

        info!(file, bytes = bytes.len(), "dataset written");
        Ok(WriteOutcome::Written)
    }
}

/// Merges `fresh` categories into `existing` in place.
///
/// Categories match on crawl root URL, then on label. Items match on id. A
/// matched item only takes the fields the fresh crawl actually populated, so
/// known prices and images are never reset to unknown.
pub fn merge(existing: &mut Vec<Category>, fresh: Vec<Category>) -> MergeStats {
    let mut stats = MergeStats::default();

    for incoming in fresh {
        let position = existing
            .iter()
            .position(|c| c.url == incoming.url)
            .or_else(|| existing.iter().position(|c| c.category == incoming.category));
        let target = match position {
            Some(idx) => &mut existing[idx],
            None => {
                existing.push(Category::new(incoming.category.clone(), incoming.url.clone()));
                let last = existing.len() - 1;
                &mut existing[last]
            }
        };
        if target.category != incoming.category {
            target.category.clone_from(&incoming.category);
        }

        let mut index: HashMap<String, usize> = target
            .items
            .iter()
            .enumerate()
            .map(|(idx, item)| (item.id.clone(), idx))
            .collect();

        for item in incoming.items {
            match index.get(&item.id) {
                Some(&idx) => {
                    if target.items[idx].overlay(&item) {
                        stats.updated += 1;
                    }
                }
                None => {
                    index.insert(item.id.clone(), target.items.len());
                    target.items.push(item);
                    stats.inserted += 1;
                }
            }
        }
    }

    stats.total = existing.iter().map(|c| c.items.len()).sum();
    stats
}
