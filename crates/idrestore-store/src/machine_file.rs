// ABOUTME: Writer for the monitored application's plain-text machine-id file.
// ABOUTME: Copies any existing file to <name>.restore_bak.<ts>, then replaces it atomically.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use idrestore_core::ErrorKind;
use thiserror::Error;

use crate::atomic::{write_atomic, write_backup};
use crate::snapshot::restore_backup_file_name;

#[derive(Debug, Error)]
pub enum MachineIdFileError {
    #[error("io error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl MachineIdFileError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Io
    }
}

#[derive(Debug, Clone)]
pub struct MachineIdFile {
    path: PathBuf,
}

impl MachineIdFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `device_id` as the whole file content, creating parent directories.
    /// Returns the path of the copy taken of a previous file, if there was one.
    pub fn apply(&self, device_id: &str) -> Result<Option<PathBuf>, MachineIdFileError> {
        self.apply_at(device_id, Utc::now())
    }

    pub fn apply_at(
        &self,
        device_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<PathBuf>, MachineIdFileError> {
        let wrap = |source| MachineIdFileError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(wrap)?;
        }

        let backup = match fs::read(&self.path) {
            Ok(previous) => {
                let base_name = restore_backup_file_name(&self.file_name(), at);
                let backup_path = write_backup(&self.path, &base_name, &previous).map_err(wrap)?;
                tracing::info!("backed up {} to {}", self.path.display(), backup_path.display());
                Some(backup_path)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(wrap(e)),
        };

        write_atomic(&self.path, device_id.as_bytes()).map_err(wrap)?;
        tracing::info!("wrote machine id file {}", self.path.display());
        Ok(backup)
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "machineId".to_string())
    }
}
