// ABOUTME: Persistence adapters for idrestore: snapshots, the JSON settings file, and the SQLite item table.
// ABOUTME: Each adapter is stateless between calls and reports failures through its own error enum.

pub mod itemdb;
pub mod machine_file;
pub mod settings;
pub mod snapshot;

mod atomic;

pub use itemdb::{CredentialRecord, ItemDatabase, ItemDbError, ItemDbHandle};
pub use machine_file::{MachineIdFile, MachineIdFileError};
pub use settings::{BackupRecord, SettingsError, SettingsStore};
pub use snapshot::{Snapshot, SnapshotError, SnapshotInfo, list_snapshots, load_snapshot};
