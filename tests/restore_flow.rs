// ABOUTME: End-to-end restore scenarios against real files and a real SQLite database.
// ABOUTME: Covers success, repeated restores, backup abort, a locked database, validation abort, and credentials.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use idrestore_core::{ErrorKind, IdentifierKey, IdentifierSet};
use idrestore_engine::{
    JsonStore, OverallStatus, Proceed, RestoreAbort, RestoreConfig, RestoreState, RestoreStep,
    Restorer, StepOutcome,
};
use idrestore_store::{
    BackupRecord, CredentialRecord, ItemDatabase, SettingsError, SettingsStore, Snapshot,
    SnapshotInfo, list_snapshots,
};
use idrestore_system::{IdentityStore, Platform};
use rusqlite::Connection;
use serde_json::{Value, json};
use tempfile::TempDir;

const SNAPSHOT_NAME: &str = "storage.json.bak.20240101_120000";

/// A settings directory holding storage.json, state.vscdb, and one snapshot.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let ws = Self { dir };

        fs::write(
            ws.settings_path(),
            serde_json::to_string_pretty(&json!({
                "a": {"window": {"width": 1200}},
                "b": "keep me",
                "telemetry.devDeviceId": "old-device",
                "telemetry.machineId": "old-machine"
            }))
            .unwrap(),
        )
        .unwrap();

        let conn = Connection::open(ws.database_path()).unwrap();
        conn.execute_batch(
            "CREATE TABLE ItemTable (key TEXT UNIQUE ON CONFLICT REPLACE, value BLOB);
             INSERT INTO ItemTable VALUES ('telemetry.devDeviceId', 'old-device');
             INSERT INTO ItemTable VALUES ('telemetry.machineId', 'old-machine');
             INSERT INTO ItemTable VALUES ('unrelated', 'untouched');",
        )
        .unwrap();

        fs::write(
            ws.snapshot_path(),
            serde_json::to_string(&json!({
                "telemetry.devDeviceId": "D1",
                "telemetry.machineId": "M1",
                "telemetry.sqmId": "",
                "storage.serviceMachineId": "S1",
                "some.future.key": 42
            }))
            .unwrap(),
        )
        .unwrap();

        ws
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn settings_path(&self) -> PathBuf {
        self.path().join("storage.json")
    }

    fn database_path(&self) -> PathBuf {
        self.path().join("state.vscdb")
    }

    fn snapshot_path(&self) -> PathBuf {
        self.path().join(SNAPSHOT_NAME)
    }

    fn config(&self, machine_id_path: &str) -> RestoreConfig {
        let vars: HashMap<&str, String> = HashMap::from([
            ("IDRESTORE_SETTINGS_PATH", self.settings_path().display().to_string()),
            ("IDRESTORE_MACHINE_ID_PATH", machine_id_path.to_string()),
        ]);
        RestoreConfig::from_vars(Platform::Linux, |name| vars.get(name).cloned()).unwrap()
    }

    fn settings(&self) -> Value {
        serde_json::from_str(&fs::read_to_string(self.settings_path()).unwrap()).unwrap()
    }

    fn db_value(&self, key: &str) -> Option<String> {
        let conn = Connection::open(self.database_path()).unwrap();
        conn.query_row("SELECT value FROM ItemTable WHERE key = ?1", [key], |row| {
            row.get::<_, String>(0)
        })
        .ok()
    }

    fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

#[test]
fn restore_on_linux_updates_every_store() {
    // 1. Set up live stores and pick the snapshot the way the CLI does
    let ws = Workspace::new();
    let config = ws.config("");
    let original_bytes = fs::read(ws.settings_path()).unwrap();

    let listed = list_snapshots(&config.snapshot_dir, "storage.json").unwrap();
    assert_eq!(listed.len(), 1);
    let snapshot = Snapshot::load(listed.into_iter().next().unwrap()).unwrap();

    // 2. Restore
    let mut restorer = Restorer::from_config(&config);
    let report = restorer.restore(&snapshot, Proceed::confirmed()).unwrap();

    // 3. Overall status and ledger
    assert_eq!(report.status, OverallStatus::Success);
    assert_eq!(restorer.state(), RestoreState::OsApplied);
    let steps: Vec<RestoreStep> = report.steps.iter().map(|s| s.step).collect();
    assert_eq!(
        steps,
        vec![RestoreStep::JsonApplied, RestoreStep::DbApplied, RestoreStep::OsApplied]
    );
    match &report.steps[2].outcome {
        StepOutcome::Succeeded { detail } => {
            assert!(detail.contains("no system identity store"), "{detail}")
        }
        other => panic!("os step should succeed, got {other:?}"),
    }

    // 4. JSON store: identifiers replaced, everything else intact
    let settings = ws.settings();
    assert_eq!(settings["telemetry.devDeviceId"], "D1");
    assert_eq!(settings["telemetry.machineId"], "M1");
    assert_eq!(settings["telemetry.sqmId"], "");
    assert_eq!(settings["storage.serviceMachineId"], "S1");
    assert_eq!(settings["a"], json!({"window": {"width": 1200}}));
    assert_eq!(settings["b"], "keep me");
    assert!(settings.get("telemetry.macMachineId").is_none());
    assert!(settings.get("some.future.key").is_none());

    // 5. Database: the four captured keys, nothing else touched
    assert_eq!(ws.db_value("telemetry.devDeviceId").as_deref(), Some("D1"));
    assert_eq!(ws.db_value("telemetry.machineId").as_deref(), Some("M1"));
    assert_eq!(ws.db_value("telemetry.sqmId").as_deref(), Some(""));
    assert_eq!(ws.db_value("storage.serviceMachineId").as_deref(), Some("S1"));
    assert_eq!(ws.db_value("telemetry.macMachineId"), None);
    assert_eq!(ws.db_value("unrelated").as_deref(), Some("untouched"));

    // 6. The backup is a verbatim copy kept out of snapshot discovery
    assert_eq!(fs::read(&report.backup).unwrap(), original_bytes);
    let backup_name = report.backup.file_name().unwrap().to_string_lossy().into_owned();
    assert!(backup_name.starts_with("storage.json.restore_bak."), "{backup_name}");
    let listed = list_snapshots(&config.snapshot_dir, "storage.json").unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].path, ws.snapshot_path());
}

/// Select the newest snapshot and restore it, as `restore --yes` does.
fn restore_newest(config: &RestoreConfig) -> (SnapshotInfo, OverallStatus) {
    let newest = list_snapshots(&config.snapshot_dir, "storage.json")
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    let snapshot = Snapshot::load(newest.clone()).unwrap();
    let report = Restorer::from_config(config)
        .restore(&snapshot, Proceed::confirmed())
        .unwrap();
    (newest, report.status)
}

#[test]
fn repeated_default_restores_keep_applying_the_captured_snapshot() {
    let ws = Workspace::new();
    let machine_id = ws.path().join("app").join("machineid");
    let config = ws.config(&machine_id.display().to_string());

    let (first, status) = restore_newest(&config);
    assert_eq!(status, OverallStatus::Success);
    assert_eq!(first.path, ws.snapshot_path());
    assert_eq!(ws.settings()["telemetry.devDeviceId"], "D1");

    // The application rotates its identifiers between runs.
    let mut rotated = ws.settings();
    rotated["telemetry.devDeviceId"] = json!("rotated-device");
    fs::write(ws.settings_path(), serde_json::to_string_pretty(&rotated).unwrap()).unwrap();
    fs::write(&machine_id, "rotated-device").unwrap();

    let (second, status) = restore_newest(&config);
    assert_eq!(status, OverallStatus::Success);
    assert_eq!(second.path, ws.snapshot_path());
    assert_eq!(ws.settings()["telemetry.devDeviceId"], "D1");
    assert_eq!(ws.db_value("telemetry.devDeviceId").as_deref(), Some("D1"));
    assert_eq!(fs::read_to_string(&machine_id).unwrap(), "D1");

    let pre_restore_copies = ws
        .file_names()
        .into_iter()
        .filter(|n| n.starts_with("storage.json.restore_bak."))
        .count();
    assert_eq!(pre_restore_copies, 2);
}

/// Delegates to the real settings file but refuses to write backups.
struct ReadOnlyBackups(SettingsStore);

impl JsonStore for ReadOnlyBackups {
    fn current_identifiers(&self) -> Result<IdentifierSet, SettingsError> {
        self.0.current_identifiers()
    }

    fn backup(&self) -> Result<BackupRecord, SettingsError> {
        Err(SettingsError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only directory",
        )))
    }

    fn apply(&self, ids: &IdentifierSet) -> Result<usize, SettingsError> {
        self.0.apply(ids)
    }
}

#[test]
fn backup_failure_aborts_with_zero_changes() {
    let ws = Workspace::new();
    let config = ws.config("");
    let settings_before = fs::read(ws.settings_path()).unwrap();
    let files_before = ws.file_names();
    let snapshot = Snapshot::open(&ws.snapshot_path()).unwrap();

    let mut restorer = Restorer::new(
        ReadOnlyBackups(SettingsStore::new(&config.settings_path)),
        ItemDatabase::new(&config.database_path),
        IdentityStore::for_platform(Platform::Linux, &config.identity),
    );
    let abort = restorer.restore(&snapshot, Proceed::confirmed()).unwrap_err();

    assert!(matches!(abort, RestoreAbort::Backup(_)));
    assert_eq!(abort.kind(), ErrorKind::Io);
    assert_eq!(restorer.state(), RestoreState::Aborted);
    assert_eq!(fs::read(ws.settings_path()).unwrap(), settings_before);
    assert_eq!(ws.db_value("telemetry.devDeviceId").as_deref(), Some("old-device"));
    assert_eq!(ws.db_value("storage.serviceMachineId"), None);
    assert_eq!(ws.file_names(), files_before);
}

#[test]
fn locked_database_is_a_partial_failure() {
    // 1. Another process holds the database exclusively
    let ws = Workspace::new();
    let config = ws.config("");
    let holder = Connection::open(ws.database_path()).unwrap();
    holder.execute_batch("BEGIN EXCLUSIVE;").unwrap();

    // 2. Restore
    let snapshot = Snapshot::open(&ws.snapshot_path()).unwrap();
    let mut restorer = Restorer::from_config(&config);
    let report = restorer.restore(&snapshot, Proceed::confirmed()).unwrap();

    // 3. Only the database step failed, with the lock remediation
    assert_eq!(
        report.status,
        OverallStatus::PartialFailure {
            failed: vec![RestoreStep::DbApplied]
        }
    );
    let db_step = &report.steps[1];
    assert!(matches!(
        db_step.outcome,
        StepOutcome::Failed {
            kind: ErrorKind::Locked,
            ..
        }
    ));
    assert!(db_step.remediation().unwrap().contains("close the monitored application"));
    assert_eq!(report.steps[2].step, RestoreStep::OsApplied);
    assert!(report.steps[2].succeeded());

    // 4. JSON already reflects the snapshot; the database kept its old rows
    assert_eq!(ws.settings()["telemetry.devDeviceId"], "D1");
    holder.execute_batch("ROLLBACK;").unwrap();
    drop(holder);
    assert_eq!(ws.db_value("telemetry.devDeviceId").as_deref(), Some("old-device"));
    assert_eq!(ws.db_value("telemetry.sqmId"), None);
}

#[test]
fn invalid_snapshot_never_reaches_backup() {
    let ws = Workspace::new();
    let config = ws.config("");
    let files_before = ws.file_names();

    // Missing machine_id is rejected on load.
    let bad_path = ws.path().join("storage.json.bak.20230101_000000");
    fs::write(&bad_path, r#"{"telemetry.devDeviceId": "D9"}"#).unwrap();
    let load_err = Snapshot::open(&bad_path).unwrap_err();
    assert_eq!(load_err.kind(), ErrorKind::Validation);

    // And again by the orchestrator if handed an unvalidated set.
    let snapshot = Snapshot {
        info: SnapshotInfo {
            path: bad_path.clone(),
            created_at: Utc::now(),
            size_bytes: 0,
        },
        identifiers: IdentifierSet::new()
            .with(IdentifierKey::DeviceId, "D9")
            .with(IdentifierKey::MachineId, ""),
    };
    let mut restorer = Restorer::from_config(&config);
    let abort = restorer.restore(&snapshot, Proceed::confirmed()).unwrap_err();

    assert_eq!(abort.kind(), ErrorKind::Validation);
    assert_eq!(abort.stage(), RestoreState::SnapshotSelected);
    fs::remove_file(&bad_path).unwrap();
    assert_eq!(ws.file_names(), files_before);
    assert_eq!(ws.settings()["telemetry.devDeviceId"], "old-device");
}

#[test]
fn machine_id_file_is_written_when_configured() {
    let ws = Workspace::new();
    let machine_id = ws.path().join("app").join("machineid");
    let config = ws.config(&machine_id.display().to_string());

    let snapshot = Snapshot::open(&ws.snapshot_path()).unwrap();
    let report = Restorer::from_config(&config)
        .restore(&snapshot, Proceed::confirmed())
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.steps[2].step, RestoreStep::MachineIdFileApplied);
    assert_eq!(fs::read_to_string(&machine_id).unwrap(), "D1");
}

#[test]
fn existing_machine_id_file_is_backed_up_before_overwrite() {
    let ws = Workspace::new();
    let app_dir = ws.path().join("app");
    fs::create_dir(&app_dir).unwrap();
    let machine_id = app_dir.join("machineid");
    fs::write(&machine_id, "old-device").unwrap();
    let config = ws.config(&machine_id.display().to_string());

    let snapshot = Snapshot::open(&ws.snapshot_path()).unwrap();
    let report = Restorer::from_config(&config)
        .restore(&snapshot, Proceed::confirmed())
        .unwrap();

    assert!(report.is_success());
    assert_eq!(fs::read_to_string(&machine_id).unwrap(), "D1");
    let backups: Vec<PathBuf> = fs::read_dir(&app_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.to_string_lossy().contains("machineid.restore_bak."))
        .collect();
    assert_eq!(backups.len(), 1);
    assert_eq!(fs::read_to_string(&backups[0]).unwrap(), "old-device");
}

#[test]
fn credential_record_lands_in_item_table() {
    let ws = Workspace::new();
    let db = ItemDatabase::new(ws.database_path());

    let rows = db
        .persist_credential(&CredentialRecord::new("tok-123", "op@example.com"))
        .unwrap();

    assert_eq!(rows, 4);
    assert_eq!(ws.db_value("cursorAuth/accessToken").as_deref(), Some("tok-123"));
    assert_eq!(ws.db_value("cursorAuth/refreshToken").as_deref(), Some("tok-123"));
    assert_eq!(ws.db_value("cursorAuth/cachedEmail").as_deref(), Some("op@example.com"));
    assert_eq!(ws.db_value("cursorAuth/cachedSignUpType").as_deref(), Some("Auth_0"));
    assert_eq!(ws.db_value("telemetry.devDeviceId").as_deref(), Some("old-device"));
}
