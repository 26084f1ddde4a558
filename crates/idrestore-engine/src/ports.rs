// ABOUTME: Traits the orchestrator drives, one per physical identifier store.
// ABOUTME: Implemented by the real adapters here; tests substitute failing stand-ins.

use idrestore_core::IdentifierSet;
use idrestore_store::{BackupRecord, ItemDatabase, ItemDbError, SettingsError, SettingsStore};
use idrestore_system::{IdentityError, IdentityOutcome, IdentityStore};

/// The JSON settings file.
pub trait JsonStore {
    fn current_identifiers(&self) -> Result<IdentifierSet, SettingsError>;
    fn backup(&self) -> Result<BackupRecord, SettingsError>;
    fn apply(&self, ids: &IdentifierSet) -> Result<usize, SettingsError>;
}

/// The embedded key/value database.
pub trait IdentifierDatabase {
    /// Open, update in one transaction, and close before returning.
    fn update_identifiers(&self, ids: &IdentifierSet) -> Result<usize, ItemDbError>;
}

/// The OS-level identity store.
pub trait SystemIdentity {
    fn apply(&self, ids: &IdentifierSet) -> Result<IdentityOutcome, IdentityError>;
}

impl JsonStore for SettingsStore {
    fn current_identifiers(&self) -> Result<IdentifierSet, SettingsError> {
        SettingsStore::current_identifiers(self)
    }

    fn backup(&self) -> Result<BackupRecord, SettingsError> {
        SettingsStore::backup(self)
    }

    fn apply(&self, ids: &IdentifierSet) -> Result<usize, SettingsError> {
        SettingsStore::apply(self, ids)
    }
}

impl IdentifierDatabase for ItemDatabase {
    fn update_identifiers(&self, ids: &IdentifierSet) -> Result<usize, ItemDbError> {
        ItemDatabase::update_identifiers(self, ids)
    }
}

impl SystemIdentity for IdentityStore {
    fn apply(&self, ids: &IdentifierSet) -> Result<IdentityOutcome, IdentityError> {
        IdentityStore::apply(self, ids)
    }
}
