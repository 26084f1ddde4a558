// ABOUTME: Restore configuration loaded from IDRESTORE_* environment variables.
// ABOUTME: Derives per-platform default locations of the monitored application's stores from HOME or APPDATA.

use std::path::{Path, PathBuf};

use idrestore_core::ErrorKind;
use idrestore_system::identity::{
    DEFAULT_MACHINE_GUID_KEY, DEFAULT_PLATFORM_UUID_PLIST, DEFAULT_SQM_CLIENT_KEY,
};
use idrestore_system::{IdentityPaths, Platform};
use thiserror::Error;

pub const DEFAULT_APP_DIR_NAME: &str = "Cursor";
const SETTINGS_FILE_NAME: &str = "storage.json";
const DATABASE_FILE_NAME: &str = "state.vscdb";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set; set it or provide explicit IDRESTORE_* paths")]
    MissingHome(&'static str),
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::MissingHome(_) => ErrorKind::NotFound,
        }
    }
}

/// Locations of every store a restore touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreConfig {
    pub platform: Platform,
    pub settings_path: PathBuf,
    pub database_path: PathBuf,
    pub snapshot_dir: PathBuf,
    /// `None` disables the machine-id file step.
    pub machine_id_path: Option<PathBuf>,
    pub identity: IdentityPaths,
}

impl RestoreConfig {
    /// Load configuration from the process environment for the running platform.
    ///
    /// Environment variables:
    /// - IDRESTORE_APP_DIR_NAME: application data directory name (default: Cursor)
    /// - IDRESTORE_SETTINGS_PATH: JSON settings file
    /// - IDRESTORE_DATABASE_PATH: SQLite database (default: next to the settings file)
    /// - IDRESTORE_SNAPSHOT_DIR: snapshot directory (default: the settings file's directory)
    /// - IDRESTORE_MACHINE_ID_PATH: application machine-id file, empty to disable
    /// - IDRESTORE_PLATFORM_UUID_PATH: macOS platform uuid plist
    /// - IDRESTORE_MACHINE_GUID_KEY, IDRESTORE_SQM_CLIENT_KEY: HKLM subkeys on Windows
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(Platform::detect(), |name| std::env::var(name).ok())
    }

    /// Same as `from_env` with an explicit platform and variable lookup.
    pub fn from_vars<F>(platform: Platform, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let app_dir_name = var("IDRESTORE_APP_DIR_NAME").unwrap_or_else(|| DEFAULT_APP_DIR_NAME.to_string());
        let app_data = || app_data_dir(platform, &app_dir_name, &lookup);

        let settings_path = match var("IDRESTORE_SETTINGS_PATH") {
            Some(path) => PathBuf::from(path),
            None => app_data()?
                .join("User")
                .join("globalStorage")
                .join(SETTINGS_FILE_NAME),
        };
        let settings_dir = settings_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let database_path = var("IDRESTORE_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| settings_dir.join(DATABASE_FILE_NAME));

        let snapshot_dir = var("IDRESTORE_SNAPSHOT_DIR")
            .map(PathBuf::from)
            .unwrap_or(settings_dir);

        // Set but empty disables the step.
        let machine_id_path = match lookup("IDRESTORE_MACHINE_ID_PATH") {
            Some(path) if path.trim().is_empty() => None,
            Some(path) => Some(PathBuf::from(path)),
            None => Some(default_machine_id_path(platform, &app_dir_name, &lookup)?),
        };

        let identity = IdentityPaths {
            platform_uuid_plist: var("IDRESTORE_PLATFORM_UUID_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PLATFORM_UUID_PLIST)),
            machine_guid_key: var("IDRESTORE_MACHINE_GUID_KEY")
                .unwrap_or_else(|| DEFAULT_MACHINE_GUID_KEY.to_string()),
            sqm_client_key: var("IDRESTORE_SQM_CLIENT_KEY")
                .unwrap_or_else(|| DEFAULT_SQM_CLIENT_KEY.to_string()),
        };

        Ok(Self {
            platform,
            settings_path,
            database_path,
            snapshot_dir,
            machine_id_path,
            identity,
        })
    }
}

fn home_var<F>(platform: Platform, lookup: &F) -> Result<PathBuf, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let name = match platform {
        Platform::Windows => "APPDATA",
        Platform::MacOs | Platform::Linux => "HOME",
    };
    lookup(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .ok_or(ConfigError::MissingHome(name))
}

/// Per-platform application data directory of the monitored application.
fn app_data_dir<F>(platform: Platform, app_dir_name: &str, lookup: &F) -> Result<PathBuf, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let base = home_var(platform, lookup)?;
    Ok(match platform {
        Platform::Windows => base.join(app_dir_name),
        Platform::MacOs => base
            .join("Library")
            .join("Application Support")
            .join(app_dir_name),
        Platform::Linux => base.join(".config").join(app_dir_name.to_lowercase()),
    })
}

fn default_machine_id_path<F>(
    platform: Platform,
    app_dir_name: &str,
    lookup: &F,
) -> Result<PathBuf, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let base = home_var(platform, lookup)?;
    Ok(match platform {
        Platform::Windows => base.join(app_dir_name).join("machineId"),
        Platform::MacOs => base
            .join("Library")
            .join("Application Support")
            .join(app_dir_name)
            .join("machineId"),
        Platform::Linux => base
            .join(".config")
            .join(app_dir_name.to_lowercase())
            .join("machineid"),
    })
}
