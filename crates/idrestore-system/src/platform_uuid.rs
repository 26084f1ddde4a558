// ABOUTME: macOS identity store: the UUID entry of the system platform-uuid plist.
// ABOUTME: Shells out to plutil; a missing plist or missing mac_machine_id is skipped.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use idrestore_core::{IdentifierKey, IdentifierSet};

use crate::identity::{IdentityError, IdentityOutcome};

const PLUTIL: &str = "plutil";
const UUID_ENTRY: &str = "UUID";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformUuidIdentity {
    plist_path: PathBuf,
    program: String,
}

impl PlatformUuidIdentity {
    pub fn new(plist_path: impl Into<PathBuf>) -> Self {
        Self::with_program(plist_path, PLUTIL)
    }

    /// Use `program` in place of `plutil`. It receives the same arguments.
    pub fn with_program(plist_path: impl Into<PathBuf>, program: impl Into<String>) -> Self {
        Self {
            plist_path: plist_path.into(),
            program: program.into(),
        }
    }

    pub fn plist_path(&self) -> &Path {
        &self.plist_path
    }

    pub fn apply(&self, ids: &IdentifierSet) -> Result<IdentityOutcome, IdentityError> {
        let target = format!("{}:{}", self.plist_path.display(), UUID_ENTRY);

        let Some(mac_id) = ids
            .get(IdentifierKey::MacMachineId)
            .filter(|v| !v.is_empty())
        else {
            tracing::warn!(
                "snapshot has no {}, leaving {} unchanged",
                IdentifierKey::MacMachineId,
                target
            );
            return Ok(IdentityOutcome::untouched(format!(
                "{} not captured, {target} left as is",
                IdentifierKey::MacMachineId
            )));
        };

        if !self.plist_path.exists() {
            tracing::warn!("platform uuid plist {} not found, skipping", self.plist_path.display());
            return Ok(IdentityOutcome::untouched(format!(
                "{} not found",
                self.plist_path.display()
            )));
        }

        // Fail early with a clear permission error instead of parsing tool output.
        if let Err(e) = OpenOptions::new().write(true).open(&self.plist_path) {
            return Err(match e.kind() {
                io::ErrorKind::PermissionDenied => IdentityError::PermissionDenied { target },
                _ => IdentityError::Io(e),
            });
        }

        let output = Command::new(&self.program)
            .arg("-replace")
            .arg(UUID_ENTRY)
            .arg("-string")
            .arg(mac_id)
            .arg(&self.plist_path)
            .output()
            .map_err(|e| IdentityError::WriteFailed {
                target: target.clone(),
                detail: format!("could not run {}: {e}", self.program),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let lowered = stderr.to_lowercase();
            if lowered.contains("permission") || lowered.contains("not permitted") {
                return Err(IdentityError::PermissionDenied { target });
            }
            return Err(IdentityError::WriteFailed {
                target,
                detail: format!("{} exited with {}: {stderr}", self.program, output.status),
            });
        }

        tracing::info!("updated {}", target);
        Ok(IdentityOutcome {
            written: vec![target],
            skipped: Vec::new(),
        })
    }
}
