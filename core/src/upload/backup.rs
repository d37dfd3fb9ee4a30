use crate::export::documents::backup_collection;
use crate::telemetry::log::LogManager;
use crate::upload::buffer::UploadBatch;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const PREFIX: &str = "backup_";
const SUFFIX: &str = ".geojson";
const STAGING_SUFFIX: &str = ".partial";

#[derive(thiserror::Error, Debug)]
pub enum BackupError {
    #[error("creating backup directory {path}: {source}")]
    Directory { path: PathBuf, source: io::Error },
    #[error("writing backup {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("serializing backup: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Write-once GeoJSON snapshots of failed batches with oldest-first rotation.
pub struct BackupStore {
    dir: PathBuf,
    max_files: usize,
    sequence: u64,
    logger: LogManager,
}

impl BackupStore {
    /// `max_files` is clamped to at least one so a fresh backup is never
    /// rotated away.
    pub fn new(dir: impl Into<PathBuf>, max_files: usize) -> Self {
        Self {
            dir: dir.into(),
            max_files: max_files.max(1),
            sequence: 0,
            logger: LogManager::new("backup"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Serializes the batch into a new file, then rotates.
    pub fn write(&mut self, batch: &UploadBatch) -> Result<PathBuf, BackupError> {
        fs::create_dir_all(&self.dir).map_err(|source| BackupError::Directory {
            path: self.dir.clone(),
            source,
        })?;
        let body = serde_json::to_vec_pretty(&backup_collection(batch.events()))?;

        let path = self.publish(|file| file.write_all(&body))?;
        self.logger.record(&format!(
            "saved {} events to {}",
            batch.len(),
            path.display()
        ));

        if let Err(err) = self.rotate() {
            self.logger.warn(&format!("backup rotation failed: {err}"));
        }
        Ok(path)
    }

    /// Fills a hidden staging file and renames it into place once synced.
    /// A failed fill removes the staging file, so only complete backups
    /// ever carry the backup name.
    fn publish<F>(&mut self, fill: F) -> Result<PathBuf, BackupError>
    where
        F: FnOnce(&mut fs::File) -> io::Result<()>,
    {
        let (staging, path, mut file) = self.create_staging()?;
        let filled = fill(&mut file).and_then(|_| file.sync_all());
        drop(file);
        if let Err(source) = filled.and_then(|_| fs::rename(&staging, &path)) {
            if let Err(err) = fs::remove_file(&staging) {
                self.logger.warn(&format!(
                    "leaving partial backup {}: {err}",
                    staging.display()
                ));
            }
            return Err(BackupError::Write { path, source });
        }
        Ok(path)
    }

    fn create_staging(&mut self) -> Result<(PathBuf, PathBuf, fs::File), BackupError> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        loop {
            self.sequence += 1;
            let name = format!("{PREFIX}{millis:013}_{:06}{SUFFIX}", self.sequence);
            let path = self.dir.join(&name);
            if path.exists() {
                continue;
            }
            let staging = self.dir.join(format!(".{name}{STAGING_SUFFIX}"));
            match OpenOptions::new().write(true).create_new(true).open(&staging) {
                Ok(file) => return Ok((staging, path, file)),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(BackupError::Write { path, source }),
            }
        }
    }

    /// Backup files, oldest first by modification time then name.
    pub fn list(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !(name.starts_with(PREFIX) && name.ends_with(SUFFIX)) {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            files.push((modified, entry.path()));
        }
        files.sort();
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }

    /// Deletes the oldest files until at most `max_files` remain.
    pub fn rotate(&self) -> io::Result<Vec<PathBuf>> {
        let files = self.list()?;
        let excess = files.len().saturating_sub(self.max_files);
        let mut removed = Vec::with_capacity(excess);
        for path in files.into_iter().take(excess) {
            fs::remove_file(&path)?;
            self.logger.record(&format!("deleted old backup {}", path.display()));
            removed.push(path);
        }
        Ok(removed)
    }
}
