// ABOUTME: Restore engine for idrestore: configuration, store ports, and the restore orchestrator.
// ABOUTME: The orchestrator is the only component that knows about more than one store.

pub mod config;
pub mod orchestrator;
pub mod ports;

pub use config::{ConfigError, RestoreConfig};
pub use orchestrator::{
    OverallStatus, Proceed, RestoreAbort, RestoreReport, RestoreState, RestoreStep, Restorer,
    StepOutcome, StepReport,
};
pub use ports::{IdentifierDatabase, JsonStore, SystemIdentity};
