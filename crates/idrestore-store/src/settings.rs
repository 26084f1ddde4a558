// ABOUTME: Adapter for the monitored application's JSON settings file.
// ABOUTME: Reads the full document, takes verbatim backups, and rewrites only identifier keys atomically.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use idrestore_core::{ErrorKind, IdentifierSet, ValidationError, json_type_name};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::atomic::{write_atomic, write_backup};
use crate::snapshot::restore_backup_file_name;

/// Errors that can occur while reading, backing up, or writing the settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings file not found: {0}")]
    NotFound(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("settings file is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("settings file {path} must contain a json object, found {found}")]
    NotAnObject { path: PathBuf, found: &'static str },

    #[error("settings file holds an unusable identifier: {0}")]
    Identifier(#[from] ValidationError),
}

impl SettingsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SettingsError::NotFound(_) => ErrorKind::NotFound,
            SettingsError::Io(_) => ErrorKind::Io,
            SettingsError::Json(_) | SettingsError::NotAnObject { .. } => ErrorKind::Parse,
            SettingsError::Identifier(_) => ErrorKind::Validation,
        }
    }
}

/// A verbatim copy of the settings file taken before mutation.
/// Never deleted or read back automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub original: PathBuf,
    pub backup_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// The settings file at a fixed path. Holds no state between calls.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name used as the snapshot prefix.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Read the whole document, not just the identifier keys.
    pub fn read_current(&self) -> Result<Map<String, Value>, SettingsError> {
        let contents = fs::read_to_string(&self.path).map_err(|e| self.not_found_or_io(e))?;
        match serde_json::from_str::<Value>(&contents)? {
            Value::Object(map) => Ok(map),
            other => Err(SettingsError::NotAnObject {
                path: self.path.clone(),
                found: json_type_name(&other),
            }),
        }
    }

    /// Identifier values currently held by the settings file.
    pub fn current_identifiers(&self) -> Result<IdentifierSet, SettingsError> {
        let map = self.read_current()?;
        Ok(IdentifierSet::from_storage_map(&map)?)
    }

    /// Copy the file byte-for-byte to `<name>.restore_bak.<timestamp>` next to it.
    pub fn backup(&self) -> Result<BackupRecord, SettingsError> {
        self.backup_at(Utc::now())
    }

    /// Backup with an explicit capture time, named `<file>.restore_bak.<ts>`
    /// so it never shows up as a snapshot. An existing file is never
    /// overwritten; a taken name gets a `_<n>` suffix instead.
    pub fn backup_at(&self, at: DateTime<Utc>) -> Result<BackupRecord, SettingsError> {
        let bytes = fs::read(&self.path).map_err(|e| self.not_found_or_io(e))?;
        let base_name = restore_backup_file_name(&self.file_name(), at);
        let backup_path = write_backup(&self.path, &base_name, &bytes)?;

        tracing::info!("backed up {} to {}", self.path.display(), backup_path.display());
        Ok(BackupRecord {
            original: self.path.clone(),
            backup_path,
            created_at: at,
            size_bytes: bytes.len() as u64,
        })
    }

    /// Overwrite the identifier keys present in `ids` and leave every other key
    /// as it was. Returns the number of keys written.
    pub fn apply(&self, ids: &IdentifierSet) -> Result<usize, SettingsError> {
        let mut map = self.read_current()?;

        let mut written = 0;
        for (key, value) in ids.present() {
            map.insert(key.storage_key().to_string(), Value::String(value.to_string()));
            written += 1;
        }

        let bytes = to_pretty_json(&Value::Object(map))?;
        write_atomic(&self.path, &bytes)?;

        tracing::info!("wrote {} identifier keys to {}", written, self.path.display());
        Ok(written)
    }

    fn not_found_or_io(&self, err: io::Error) -> SettingsError {
        if err.kind() == io::ErrorKind::NotFound {
            SettingsError::NotFound(self.path.clone())
        } else {
            SettingsError::Io(err)
        }
    }
}

fn to_pretty_json(value: &Value) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use idrestore_core::IdentifierKey;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_settings(dir: &TempDir, doc: &Value) -> SettingsStore {
        let path = dir.path().join("storage.json");
        fs::write(&path, serde_json::to_string(doc).unwrap()).unwrap();
        SettingsStore::new(path)
    }

    fn sample_doc() -> Value {
        json!({
            "a": {"nested": [1, 2, 3], "flag": true},
            "b": "keep me",
            "telemetry.devDeviceId": "old-device",
            "telemetry.machineId": "old-machine"
        })
    }

    #[test]
    fn read_current_returns_full_document() {
        let dir = TempDir::new().unwrap();
        let store = write_settings(&dir, &sample_doc());

        let map = store.read_current().unwrap();

        assert_eq!(map.len(), 4);
        assert_eq!(map["b"], json!("keep me"));
    }

    #[test]
    fn read_current_reports_missing_and_malformed() {
        let dir = TempDir::new().unwrap();
        let missing = SettingsStore::new(dir.path().join("absent.json"));
        assert_eq!(missing.read_current().unwrap_err().kind(), ErrorKind::NotFound);

        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let broken = SettingsStore::new(&path);
        assert_eq!(broken.read_current().unwrap_err().kind(), ErrorKind::Parse);

        fs::write(&path, "\"just a string\"").unwrap();
        assert!(matches!(
            broken.read_current().unwrap_err(),
            SettingsError::NotAnObject { found: "string", .. }
        ));
    }

    #[test]
    fn apply_preserves_untouched_keys() {
        let dir = TempDir::new().unwrap();
        let store = write_settings(&dir, &sample_doc());
        let ids = IdentifierSet::new()
            .with(IdentifierKey::DeviceId, "new-device")
            .with(IdentifierKey::MachineId, "new-machine")
            .with(IdentifierKey::SqmId, "");

        let written = store.apply(&ids).unwrap();

        assert_eq!(written, 3);
        let map = store.read_current().unwrap();
        assert_eq!(map["a"], sample_doc()["a"]);
        assert_eq!(map["b"], json!("keep me"));
        assert_eq!(map["telemetry.devDeviceId"], json!("new-device"));
        assert_eq!(map["telemetry.machineId"], json!("new-machine"));
        assert_eq!(map["telemetry.sqmId"], json!(""));
        assert!(!map.contains_key("telemetry.macMachineId"));
    }

    #[test]
    fn apply_keeps_key_order_and_indents_four_spaces() {
        let dir = TempDir::new().unwrap();
        let store = write_settings(&dir, &sample_doc());
        let ids = IdentifierSet::new().with(IdentifierKey::DeviceId, "x");

        store.apply(&ids).unwrap();

        let text = fs::read_to_string(store.path()).unwrap();
        let keys: Vec<String> = store.read_current().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["a", "b", "telemetry.devDeviceId", "telemetry.machineId"]);
        assert!(text.contains("\n    \"b\": \"keep me\""));
        assert!(!dir.path().join("storage.json.tmp").exists());
    }

    #[test]
    fn apply_on_missing_file_does_not_create_it() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::new(dir.path().join("storage.json"));
        let ids = IdentifierSet::new().with(IdentifierKey::DeviceId, "x");

        let err = store.apply(&ids).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!store.path().exists());
    }

    #[test]
    fn backup_copies_bytes_verbatim() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.json");
        let original = "{\n  \"b\":   \"odd   spacing\",\r\n\"telemetry.machineId\":\"m\"}";
        fs::write(&path, original).unwrap();
        let store = SettingsStore::new(&path);
        let at = Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap();

        let record = store.backup_at(at).unwrap();

        assert_eq!(
            record.backup_path,
            dir.path().join("storage.json.restore_bak.20240203_040506")
        );
        assert_eq!(fs::read_to_string(&record.backup_path).unwrap(), original);
        assert_eq!(record.size_bytes, original.len() as u64);
        assert_eq!(record.created_at, at);
    }

    #[test]
    fn backup_never_overwrites_an_existing_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = write_settings(&dir, &sample_doc());
        let at = Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap();

        let first = store.backup_at(at).unwrap();
        let second = store.backup_at(at).unwrap();

        assert_ne!(first.backup_path, second.backup_path);
        assert!(second.backup_path.to_string_lossy().ends_with("_1"));
        assert!(first.backup_path.exists());
    }

    #[test]
    fn backup_of_missing_file_fails_without_writing() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::new(dir.path().join("storage.json"));

        let err = store.backup().unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn current_identifiers_reads_live_values() {
        let dir = TempDir::new().unwrap();
        let store = write_settings(&dir, &sample_doc());

        let ids = store.current_identifiers().unwrap();

        assert_eq!(ids.get(IdentifierKey::DeviceId), Some("old-device"));
        assert_eq!(ids.get(IdentifierKey::MachineId), Some("old-machine"));
        assert_eq!(ids.len(), 2);
    }
}
