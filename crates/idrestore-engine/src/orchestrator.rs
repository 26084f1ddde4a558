// ABOUTME: Restore orchestrator: validate, back up, then apply a snapshot to every identifier store in order.
// ABOUTME: Aborts only before the backup exists; afterwards each step is attempted and recorded in a per-step ledger.

use std::fmt;
use std::path::PathBuf;

use idrestore_core::{ErrorKind, IdentifierKey, IdentifierSet, ValidationError, merge};
use idrestore_store::{BackupRecord, ItemDatabase, MachineIdFile, SettingsError, SettingsStore, Snapshot};
use idrestore_system::IdentityStore;
use serde::Serialize;
use thiserror::Error;

use crate::config::RestoreConfig;
use crate::ports::{IdentifierDatabase, JsonStore, SystemIdentity};

/// Where a restore currently stands. `OsApplied` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RestoreState {
    Idle,
    SnapshotSelected,
    Validated,
    BackedUp,
    JsonApplied,
    DbApplied,
    OsApplied,
    Aborted,
}

impl fmt::Display for RestoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Operator confirmation that live state may be mutated.
/// Obtaining one is the front-end's job; the orchestrator never prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proceed(());

impl Proceed {
    pub fn confirmed() -> Self {
        Proceed(())
    }
}

/// A mutation step, named after the state it leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RestoreStep {
    JsonApplied,
    DbApplied,
    MachineIdFileApplied,
    OsApplied,
}

impl RestoreStep {
    pub fn name(self) -> &'static str {
        match self {
            RestoreStep::JsonApplied => "JsonApplied",
            RestoreStep::DbApplied => "DbApplied",
            RestoreStep::MachineIdFileApplied => "MachineIdFileApplied",
            RestoreStep::OsApplied => "OsApplied",
        }
    }
}

impl fmt::Display for RestoreStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded { detail: String },
    Failed { kind: ErrorKind, detail: String },
}

/// One ledger line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: RestoreStep,
    pub outcome: StepOutcome,
}

impl StepReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, StepOutcome::Succeeded { .. })
    }

    /// Operator hint for a failed step.
    pub fn remediation(&self) -> Option<&'static str> {
        match &self.outcome {
            StepOutcome::Succeeded { .. } => None,
            StepOutcome::Failed { kind, .. } => Some(kind.remediation()),
        }
    }
}

impl fmt::Display for StepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            StepOutcome::Succeeded { detail } => write!(f, "{}: ok ({})", self.step, detail),
            StepOutcome::Failed { kind, detail } => write!(
                f,
                "{}: failed with {}: {} [{}]",
                self.step,
                kind,
                detail,
                kind.remediation()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OverallStatus {
    Success,
    PartialFailure { failed: Vec<RestoreStep> },
}

/// Outcome of a restore that got past the backup.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub snapshot: PathBuf,
    pub backup: PathBuf,
    #[serde(skip)]
    pub applied: IdentifierSet,
    pub steps: Vec<StepReport>,
    pub status: OverallStatus,
}

impl RestoreReport {
    pub fn is_success(&self) -> bool {
        self.status == OverallStatus::Success
    }

    pub fn failed_steps(&self) -> Vec<RestoreStep> {
        self.steps
            .iter()
            .filter(|s| !s.succeeded())
            .map(|s| s.step)
            .collect()
    }
}

/// A restore that stopped before touching live state.
#[derive(Debug, Error)]
pub enum RestoreAbort {
    #[error("snapshot {path} is invalid: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: ValidationError,
    },

    #[error("could not read live identifiers: {0}")]
    LiveState(#[source] SettingsError),

    #[error("backup failed, nothing was changed: {0}")]
    Backup(#[source] SettingsError),
}

impl RestoreAbort {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RestoreAbort::Invalid { .. } => ErrorKind::Validation,
            RestoreAbort::LiveState(e) => e.kind(),
            // Whatever the cause, a failed backup is an IO failure to the operator.
            RestoreAbort::Backup(_) => ErrorKind::Io,
        }
    }

    /// The last state reached before aborting.
    pub fn stage(&self) -> RestoreState {
        match self {
            RestoreAbort::Invalid { .. } => RestoreState::SnapshotSelected,
            RestoreAbort::LiveState(_) | RestoreAbort::Backup(_) => RestoreState::Validated,
        }
    }
}

/// Drives one restore across the settings file, the database, the optional
/// machine-id file, and the OS identity store.
pub struct Restorer<J, D, O> {
    json: J,
    db: D,
    os: O,
    machine_id_file: Option<MachineIdFile>,
    state: RestoreState,
}

impl Restorer<SettingsStore, ItemDatabase, IdentityStore> {
    /// Real adapters at the configured locations.
    pub fn from_config(config: &RestoreConfig) -> Self {
        let restorer = Restorer::new(
            SettingsStore::new(&config.settings_path),
            ItemDatabase::new(&config.database_path),
            IdentityStore::for_platform(config.platform, &config.identity),
        );
        match &config.machine_id_path {
            Some(path) => restorer.with_machine_id_file(MachineIdFile::new(path)),
            None => restorer,
        }
    }
}

impl<J, D, O> Restorer<J, D, O>
where
    J: JsonStore,
    D: IdentifierDatabase,
    O: SystemIdentity,
{
    pub fn new(json: J, db: D, os: O) -> Self {
        Self {
            json,
            db,
            os,
            machine_id_file: None,
            state: RestoreState::Idle,
        }
    }

    pub fn with_machine_id_file(mut self, file: MachineIdFile) -> Self {
        self.machine_id_file = Some(file);
        self
    }

    pub fn state(&self) -> RestoreState {
        self.state
    }

    /// Restore `snapshot`. Returns `Err` only when nothing was mutated; once the
    /// backup exists every step is attempted and failures land in the report.
    pub fn restore(&mut self, snapshot: &Snapshot, _proceed: Proceed) -> Result<RestoreReport, RestoreAbort> {
        self.state = RestoreState::Idle;
        let path = snapshot.info.path.clone();
        self.transition(RestoreState::SnapshotSelected);
        tracing::info!("restoring from snapshot {}", path.display());

        if let Err(source) = snapshot.identifiers.validate() {
            return Err(self.abort(RestoreAbort::Invalid { path, source }));
        }
        self.transition(RestoreState::Validated);

        let live = match self.json.current_identifiers() {
            Ok(live) => live,
            Err(e) => return Err(self.abort(RestoreAbort::LiveState(e))),
        };
        let ids = merge(&live, &snapshot.identifiers);
        for (key, masked) in ids.masked() {
            tracing::debug!("will apply {} = {}", key, masked);
        }

        let backup: BackupRecord = match self.json.backup() {
            Ok(record) => record,
            Err(e) => return Err(self.abort(RestoreAbort::Backup(e))),
        };
        self.transition(RestoreState::BackedUp);

        let mut steps = Vec::with_capacity(4);

        let json = match self.json.apply(&ids) {
            Ok(count) => StepOutcome::Succeeded {
                detail: format!("{count} keys written"),
            },
            Err(e) => failed(e.kind(), &e),
        };
        steps.push(self.record(RestoreStep::JsonApplied, json));
        self.transition(RestoreState::JsonApplied);

        let db = match self.db.update_identifiers(&ids) {
            Ok(rows) => StepOutcome::Succeeded {
                detail: format!("{rows} rows updated"),
            },
            Err(e) => failed(e.kind(), &e),
        };
        steps.push(self.record(RestoreStep::DbApplied, db));
        self.transition(RestoreState::DbApplied);

        if let Some(file) = &self.machine_id_file {
            let outcome = match ids.get(IdentifierKey::DeviceId) {
                Some(device_id) => match file.apply(device_id) {
                    Ok(Some(backup)) => StepOutcome::Succeeded {
                        detail: format!(
                            "wrote {} (previous copy at {})",
                            file.path().display(),
                            backup.display()
                        ),
                    },
                    Ok(None) => StepOutcome::Succeeded {
                        detail: format!("wrote {}", file.path().display()),
                    },
                    Err(e) => failed(e.kind(), &e),
                },
                None => StepOutcome::Succeeded {
                    detail: "device_id not captured, file left as is".to_string(),
                },
            };
            steps.push(self.record(RestoreStep::MachineIdFileApplied, outcome));
        }

        let os = match self.os.apply(&ids) {
            Ok(outcome) => StepOutcome::Succeeded {
                detail: outcome.summary(),
            },
            Err(e) => failed(e.kind(), &e),
        };
        steps.push(self.record(RestoreStep::OsApplied, os));
        self.transition(RestoreState::OsApplied);

        let failed: Vec<RestoreStep> = steps
            .iter()
            .filter(|s| !s.succeeded())
            .map(|s| s.step)
            .collect();
        let status = if failed.is_empty() {
            tracing::info!("restore complete, backup kept at {}", backup.backup_path.display());
            OverallStatus::Success
        } else {
            tracing::error!(
                "restore partially failed ({}), backup kept at {}",
                failed.iter().map(|s| s.name()).collect::<Vec<_>>().join(", "),
                backup.backup_path.display()
            );
            OverallStatus::PartialFailure { failed }
        };

        Ok(RestoreReport {
            snapshot: path,
            backup: backup.backup_path,
            applied: ids,
            steps,
            status,
        })
    }

    fn transition(&mut self, next: RestoreState) {
        tracing::debug!("restore state {} -> {}", self.state, next);
        self.state = next;
    }

    fn abort(&mut self, reason: RestoreAbort) -> RestoreAbort {
        tracing::error!("restore aborted at {}: {}", self.state, reason);
        self.state = RestoreState::Aborted;
        reason
    }

    fn record(&self, step: RestoreStep, outcome: StepOutcome) -> StepReport {
        let report = StepReport { step, outcome };
        match &report.outcome {
            StepOutcome::Succeeded { .. } => tracing::info!("{}", report),
            StepOutcome::Failed { .. } => tracing::warn!("{}", report),
        }
        report
    }
}

fn failed(kind: ErrorKind, err: &dyn std::error::Error) -> StepOutcome {
    StepOutcome::Failed {
        kind,
        detail: err.to_string(),
    }
}
