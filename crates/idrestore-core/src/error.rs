// ABOUTME: Operator-facing error taxonomy shared across the stores and the orchestrator.
// ABOUTME: Each kind carries a remediation hint that is printed alongside the failing step.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of every failure the restore engine can surface.
/// Module-level error enums map onto one of these through their `kind()` method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    Parse,
    Validation,
    Io,
    Locked,
    Permission,
    Query,
}

impl ErrorKind {
    /// Stable name used in logs and reports.
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Parse => "ParseError",
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Io => "IOError",
            ErrorKind::Locked => "LockedError",
            ErrorKind::Permission => "PermissionError",
            ErrorKind::Query => "QueryError",
        }
    }

    /// What the operator should do before retrying.
    pub fn remediation(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "check the configured paths and that a snapshot exists",
            ErrorKind::Parse => "the file is not a valid JSON object; pick another snapshot or repair the file",
            ErrorKind::Validation => "the snapshot lacks device_id or machine_id; pick another snapshot",
            ErrorKind::Io => "check free disk space and write permissions on the target directory",
            ErrorKind::Locked => "close the monitored application and retry",
            ErrorKind::Permission => "re-run with elevated privileges (administrator or sudo)",
            ErrorKind::Query => "the database transaction was rolled back; close the monitored application and retry",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
