// ABOUTME: Discovery and loading of previously captured identifier snapshots.
// ABOUTME: Snapshots are read-only copies of the settings file named <file>.bak.<timestamp>.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use idrestore_core::{ErrorKind, IdentifierSet, ValidationError, json_type_name};
use serde_json::Value;
use thiserror::Error;

/// Separator between the original file name and the capture timestamp.
pub const BACKUP_MARKER: &str = ".bak.";

/// Separator used for the copies a restore takes before mutating a file.
/// Distinct from `BACKUP_MARKER` so those copies are never listed as snapshots.
pub const RESTORE_BACKUP_MARKER: &str = ".restore_bak.";

/// Capture timestamp format embedded in snapshot file names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Errors that can occur while listing or loading snapshots.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("no snapshots matching {pattern} in {dir}")]
    NoSnapshots { dir: PathBuf, pattern: String },

    #[error("snapshot file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("snapshot is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot must contain a json object at the top level, found {0}")]
    NotAnObject(&'static str),

    #[error("invalid snapshot: {0}")]
    Invalid(#[from] ValidationError),
}

impl SnapshotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SnapshotError::DirectoryNotFound(_)
            | SnapshotError::NoSnapshots { .. }
            | SnapshotError::FileNotFound(_) => ErrorKind::NotFound,
            SnapshotError::Io(_) => ErrorKind::Io,
            SnapshotError::Json(_) | SnapshotError::NotAnObject(_) => ErrorKind::Parse,
            SnapshotError::Invalid(_) => ErrorKind::Validation,
        }
    }
}

/// Listing metadata for a snapshot file. Content is not parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

impl SnapshotInfo {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// A loaded snapshot: its metadata plus the validated identifiers it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub info: SnapshotInfo,
    pub identifiers: IdentifierSet,
}

impl Snapshot {
    /// Load and validate the snapshot described by `info`.
    pub fn load(info: SnapshotInfo) -> Result<Self, SnapshotError> {
        let identifiers = load_snapshot(&info.path)?;
        Ok(Self { info, identifiers })
    }

    /// Stat and load a snapshot from a bare path.
    pub fn open(path: &Path) -> Result<Self, SnapshotError> {
        let metadata = fs::metadata(path).map_err(|e| not_found_or_io(e, path))?;
        let info = info_from_metadata(path.to_path_buf(), &metadata);
        Self::load(info)
    }
}

/// Name of the snapshot that a backup of `original_name` taken at `at` receives.
pub fn snapshot_file_name(original_name: &str, at: DateTime<Utc>) -> String {
    format!("{original_name}{BACKUP_MARKER}{}", at.format(TIMESTAMP_FORMAT))
}

/// Name of the pre-restore copy of `original_name` taken at `at`.
pub fn restore_backup_file_name(original_name: &str, at: DateTime<Utc>) -> String {
    format!(
        "{original_name}{RESTORE_BACKUP_MARKER}{}",
        at.format(TIMESTAMP_FORMAT)
    )
}

/// List snapshots of `file_name` in `dir`, newest first.
pub fn list_snapshots(dir: &Path, file_name: &str) -> Result<Vec<SnapshotInfo>, SnapshotError> {
    if !dir.is_dir() {
        return Err(SnapshotError::DirectoryNotFound(dir.to_path_buf()));
    }

    let prefix = format!("{file_name}{BACKUP_MARKER}");
    let mut snapshots = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();

        let Some(suffix) = name_str.strip_prefix(&prefix) else {
            continue;
        };
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }

        let created_at = parse_capture_time(suffix).unwrap_or_else(|| file_time(&metadata));
        snapshots.push(SnapshotInfo {
            path: entry.path(),
            created_at,
            size_bytes: metadata.len(),
        });
    }

    if snapshots.is_empty() {
        return Err(SnapshotError::NoSnapshots {
            dir: dir.to_path_buf(),
            pattern: format!("{prefix}*"),
        });
    }

    snapshots.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.path.cmp(&a.path))
    });

    tracing::debug!("found {} snapshots in {}", snapshots.len(), dir.display());
    Ok(snapshots)
}

/// Parse a snapshot file into an identifier set and check it is usable.
pub fn load_snapshot(path: &Path) -> Result<IdentifierSet, SnapshotError> {
    let contents = fs::read_to_string(path).map_err(|e| not_found_or_io(e, path))?;
    let value: Value = serde_json::from_str(&contents)?;

    let map = match value {
        Value::Object(map) => map,
        other => return Err(SnapshotError::NotAnObject(json_type_name(&other))),
    };

    let identifiers = IdentifierSet::from_storage_map(&map)?;
    identifiers.validate()?;
    Ok(identifiers)
}

/// Accepts `YYYYmmdd_HHMMSS` and the collision form `YYYYmmdd_HHMMSS_<n>`.
fn parse_capture_time(suffix: &str) -> Option<DateTime<Utc>> {
    let parse = |s: &str| {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    };
    parse(suffix).or_else(|| {
        let (stamp, counter) = suffix.rsplit_once('_')?;
        counter.parse::<u32>().ok()?;
        parse(stamp)
    })
}

fn file_time(metadata: &fs::Metadata) -> DateTime<Utc> {
    metadata
        .created()
        .or_else(|_| metadata.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn info_from_metadata(path: PathBuf, metadata: &fs::Metadata) -> SnapshotInfo {
    let created_at = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split_once(BACKUP_MARKER))
        .and_then(|(_, suffix)| parse_capture_time(suffix))
        .unwrap_or_else(|| file_time(metadata));
    SnapshotInfo {
        path,
        created_at,
        size_bytes: metadata.len(),
    }
}

fn not_found_or_io(err: io::Error, path: &Path) -> SnapshotError {
    if err.kind() == io::ErrorKind::NotFound {
        SnapshotError::FileNotFound(path.to_path_buf())
    } else {
        SnapshotError::Io(err)
    }
}
