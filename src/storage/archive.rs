//! Shard archive persistence
//!
//! Blocks live in monthly/shard-bucketed zip archives named
//! `{YYYYMM}-{NN}.zip`, one `{uID}.json` entry per block. Archives do
//! not support in-place overwrite, so every update is a filtered
//! rewrite through a temp file. Same-archive writers serialize through
//! an open-marker with a staleness override.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::constants::ARCHIVE_STALE_SECS;
use crate::ident::{self, IdentError};
use crate::pool::PoolError;
use crate::record::BlockRecord;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Record encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Identifier error: {0}")]
    Ident(#[from] IdentError),
    #[error("Write-behind pool error: {0}")]
    Pool(#[from] PoolError),
}

/// The block archive store for one (network, layer)
#[derive(Debug)]
pub struct BlockStore {
    dir: PathBuf,
    open_marks: Mutex<HashMap<String, Instant>>,
}

/// Scoped open-marker; released on every exit path via Drop
pub struct ArchiveMark<'a> {
    store: &'a BlockStore,
    shard: String,
}

impl Drop for ArchiveMark<'_> {
    fn drop(&mut self) {
        let mut marks = self.store.open_marks.lock().expect("open marks poisoned");
        marks.remove(&self.shard);
    }
}

impl BlockStore {
    /// Open (creating if needed) the archive directory
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            open_marks: Mutex::new(HashMap::new()),
        })
    }

    /// Archive path for a shard stem like `202603-17`
    pub fn archive_path(&self, shard: &str) -> PathBuf {
        self.dir.join(format!("{shard}.zip"))
    }

    /// Wait until the shard archive is not held by another writer
    ///
    /// Marks older than [`ARCHIVE_STALE_SECS`] are overridden - a
    /// crashed writer must not wedge the shard forever.
    pub async fn acquire(&self, shard: &str) -> ArchiveMark<'_> {
        loop {
            {
                let mut marks = self.open_marks.lock().expect("open marks poisoned");
                match marks.get(shard) {
                    Some(since) if since.elapsed() < Duration::from_secs(ARCHIVE_STALE_SECS) => {}
                    stale => {
                        if stale.is_some() {
                            tracing::warn!(shard, "overriding stale archive open-marker");
                        }
                        marks.insert(shard.to_string(), Instant::now());
                        return ArchiveMark { store: self, shard: shard.to_string() };
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Persist a record into its shard archive (synchronous path)
    ///
    /// An existing entry with the same uID is dropped first - update
    /// in place is delete-entry-then-append.
    pub async fn write(&self, record: &BlockRecord) -> Result<(), StorageError> {
        let shard = ident::storage_file_name(&record.header.uid)?;
        let _mark = self.acquire(&shard).await;
        let path = self.archive_path(&shard);
        let name = record.entry_name();

        let mut entries = if path.exists() { self.read_entries(&path)? } else { Vec::new() };
        entries.retain(|(existing, _)| *existing != name);
        entries.push((name, serde_json::to_vec(record)?));
        self.write_entries(&path, &entries)
    }

    /// Read a record by uID; absent is `None`, not an error
    pub fn read(&self, uid: &str) -> Result<Option<BlockRecord>, StorageError> {
        let shard = ident::storage_file_name(uid)?;
        let path = self.archive_path(&shard);
        if !path.exists() {
            return Ok(None);
        }
        let mut archive = ZipArchive::new(File::open(&path)?)?;
        let mut entry = match archive.by_name(&format!("{uid}.json")) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// All shard archives, sorted by file name
    pub fn archives(&self) -> Result<Vec<PathBuf>, StorageError> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "zip").unwrap_or(false) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Remove an entire archive file
    pub fn delete_archive(&self, path: &Path) -> Result<(), StorageError> {
        std::fs::remove_file(path)?;
        Ok(())
    }

    /// All entries of an archive, in stored order (duplicates kept)
    pub fn read_entries(&self, path: &Path) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let mut archive = ZipArchive::new(File::open(path)?)?;
        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes)?;
            entries.push((entry.name().to_string(), bytes));
        }
        Ok(entries)
    }

    /// Rewrite an archive with exactly the given entries
    ///
    /// Writes a temp file and renames over the original; an empty entry
    /// list deletes the archive instead.
    pub fn write_entries(&self, path: &Path, entries: &[(String, Vec<u8>)]) -> Result<(), StorageError> {
        if entries.is_empty() {
            if path.exists() {
                self.delete_archive(path)?;
            }
            return Ok(());
        }
        let tmp = path.with_extension("zip.tmp");
        {
            let mut writer = ZipWriter::new(File::create(&tmp)?);
            let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
            for (name, bytes) in entries {
                writer.start_file(name, options)?;
                writer.write_all(bytes)?;
            }
            writer.finish()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Rewrite an archive dropping the named entries and any duplicate
    /// names beyond the first occurrence
    pub fn rewrite_filtered(&self, path: &Path, drop_names: &HashSet<String>) -> Result<(), StorageError> {
        let entries = self.read_entries(path)?;
        let mut seen = HashSet::new();
        let kept: Vec<(String, Vec<u8>)> = entries
            .into_iter()
            .filter(|(name, _)| !drop_names.contains(name) && seen.insert(name.clone()))
            .collect();
        self.write_entries(path, &kept)
    }
}
