// ABOUTME: Closed set of OS identity store variants sharing one apply contract.
// ABOUTME: Confines platform branching to this module; Linux is an explicit no-op.

use std::fmt;
use std::io;
use std::path::PathBuf;

use idrestore_core::{ErrorKind, IdentifierSet};
use thiserror::Error;

use crate::platform_uuid::PlatformUuidIdentity;
use crate::registry::RegistryIdentity;

pub const DEFAULT_PLATFORM_UUID_PLIST: &str =
    "/var/root/Library/Preferences/SystemConfiguration/com.apple.platform.uuid.plist";
pub const DEFAULT_MACHINE_GUID_KEY: &str = r"SOFTWARE\Microsoft\Cryptography";
pub const DEFAULT_SQM_CLIENT_KEY: &str = r"SOFTWARE\Microsoft\SQMClient";

const LINUX_NOTE: &str = "application-level only, no system identity store exists to update";

/// Errors raised only when a privileged write was attempted and failed.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("permission denied writing {target}; re-run with elevated privileges")]
    PermissionDenied { target: String },

    #[error("failed to write {target}: {detail}")]
    WriteFailed { target: String, detail: String },

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A write failed after earlier writes of the same store went through.
    #[error("{source}; already written: {}", .written.join(", "))]
    Partial {
        written: Vec<String>,
        #[source]
        source: Box<IdentityError>,
    },
}

impl IdentityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IdentityError::PermissionDenied { .. } => ErrorKind::Permission,
            IdentityError::Io(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                ErrorKind::Permission
            }
            IdentityError::WriteFailed { .. } | IdentityError::Io(_) => ErrorKind::Io,
            IdentityError::Partial { source, .. } => source.kind(),
        }
    }

    /// Attach the targets written before this error. No-op when nothing was written.
    pub fn after_writes(self, written: &[String]) -> IdentityError {
        if written.is_empty() {
            return self;
        }
        IdentityError::Partial {
            written: written.to_vec(),
            source: Box::new(self),
        }
    }

    /// Targets that were written before the failure.
    pub fn written(&self) -> &[String] {
        match self {
            IdentityError::Partial { written, .. } => written,
            _ => &[],
        }
    }
}

/// What an identity store did. Skips are informational, not failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityOutcome {
    pub written: Vec<String>,
    pub skipped: Vec<String>,
}

impl IdentityOutcome {
    /// Nothing written, for the given reason.
    pub fn untouched(reason: impl Into<String>) -> Self {
        Self {
            written: Vec::new(),
            skipped: vec![reason.into()],
        }
    }

    pub fn summary(&self) -> String {
        match (self.written.is_empty(), self.skipped.is_empty()) {
            (true, true) => "nothing to do".to_string(),
            (false, true) => format!("wrote {}", self.written.join(", ")),
            (true, false) => format!("skipped: {}", self.skipped.join("; ")),
            (false, false) => format!(
                "wrote {}; skipped: {}",
                self.written.join(", "),
                self.skipped.join("; ")
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    /// The platform this binary was built for. Other Unix targets behave as Linux.
    pub fn detect() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::Windows => "windows",
            Platform::MacOs => "macos",
            Platform::Linux => "linux",
        })
    }
}

/// Locations of the OS-level identity values, supplied by configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityPaths {
    pub platform_uuid_plist: PathBuf,
    pub machine_guid_key: String,
    pub sqm_client_key: String,
}

impl Default for IdentityPaths {
    fn default() -> Self {
        Self {
            platform_uuid_plist: PathBuf::from(DEFAULT_PLATFORM_UUID_PLIST),
            machine_guid_key: DEFAULT_MACHINE_GUID_KEY.to_string(),
            sqm_client_key: DEFAULT_SQM_CLIENT_KEY.to_string(),
        }
    }
}

/// The OS identity store for one platform.
#[derive(Debug, Clone)]
pub enum IdentityStore {
    Windows(RegistryIdentity),
    MacOs(PlatformUuidIdentity),
    Linux,
}

impl IdentityStore {
    pub fn for_platform(platform: Platform, paths: &IdentityPaths) -> Self {
        match platform {
            Platform::Windows => IdentityStore::Windows(RegistryIdentity::new(
                &paths.machine_guid_key,
                &paths.sqm_client_key,
            )),
            Platform::MacOs => {
                IdentityStore::MacOs(PlatformUuidIdentity::new(&paths.platform_uuid_plist))
            }
            Platform::Linux => IdentityStore::Linux,
        }
    }

    pub fn detect(paths: &IdentityPaths) -> Self {
        Self::for_platform(Platform::detect(), paths)
    }

    pub fn platform(&self) -> Platform {
        match self {
            IdentityStore::Windows(_) => Platform::Windows,
            IdentityStore::MacOs(_) => Platform::MacOs,
            IdentityStore::Linux => Platform::Linux,
        }
    }

    /// Write the platform's identity values from `ids`. Never fails for a value
    /// or store that does not apply; only for an attempted write that failed.
    pub fn apply(&self, ids: &IdentifierSet) -> Result<IdentityOutcome, IdentityError> {
        match self {
            IdentityStore::Windows(registry) => registry.apply(ids),
            IdentityStore::MacOs(plist) => plist.apply(ids),
            IdentityStore::Linux => {
                tracing::debug!("{}", LINUX_NOTE);
                Ok(IdentityOutcome::untouched(LINUX_NOTE))
            }
        }
    }
}
