// ABOUTME: Windows identity store: MachineGuid and the SQM client MachineId under HKLM.
// ABOUTME: Access denied maps to a permission error; a missing SQM client key is skipped.

use idrestore_core::{IdentifierKey, IdentifierSet};

use crate::identity::{IdentityError, IdentityOutcome};

pub const MACHINE_GUID_VALUE: &str = "MachineGuid";
pub const SQM_MACHINE_ID_VALUE: &str = "MachineId";

/// Result of a single registry value write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegistryWrite {
    Written,
    KeyMissing,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryIdentity {
    machine_guid_key: String,
    sqm_client_key: String,
}

impl RegistryIdentity {
    pub fn new(machine_guid_key: impl Into<String>, sqm_client_key: impl Into<String>) -> Self {
        Self {
            machine_guid_key: machine_guid_key.into(),
            sqm_client_key: sqm_client_key.into(),
        }
    }

    /// `device_id` goes to MachineGuid, `sqm_id` to the SQM client MachineId.
    /// Empty or absent values are skipped. A failure after a successful write
    /// carries the written targets.
    pub fn apply(&self, ids: &IdentifierSet) -> Result<IdentityOutcome, IdentityError> {
        self.apply_with(ids, set_hklm_string)
    }

    fn apply_with<F>(&self, ids: &IdentifierSet, mut set_value: F) -> Result<IdentityOutcome, IdentityError>
    where
        F: FnMut(&str, &str, &str) -> Result<RegistryWrite, IdentityError>,
    {
        let writes = [
            (IdentifierKey::DeviceId, &self.machine_guid_key, MACHINE_GUID_VALUE),
            (IdentifierKey::SqmId, &self.sqm_client_key, SQM_MACHINE_ID_VALUE),
        ];

        let mut outcome = IdentityOutcome::default();
        for (key, subkey, value_name) in writes {
            let target = format!(r"HKLM\{subkey}\{value_name}");
            let Some(value) = ids.get(key).filter(|v| !v.is_empty()) else {
                outcome.skipped.push(format!("{key} not captured, {target} left as is"));
                continue;
            };

            let write = set_value(subkey, value_name, value)
                .map_err(|e| e.after_writes(&outcome.written))?;
            match write {
                RegistryWrite::Written => {
                    tracing::info!("updated {}", target);
                    outcome.written.push(target);
                }
                RegistryWrite::KeyMissing => {
                    tracing::warn!("registry key for {} not found, skipping", target);
                    outcome.skipped.push(format!("{target} key not found"));
                }
                RegistryWrite::Unavailable => {
                    outcome.skipped.push(format!("{target} unavailable on this host"));
                }
            }
        }
        Ok(outcome)
    }
}

#[cfg(windows)]
fn set_hklm_string(subkey: &str, value_name: &str, data: &str) -> Result<RegistryWrite, IdentityError> {
    use windows::Win32::Foundation::{
        ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND, ERROR_PATH_NOT_FOUND, ERROR_SUCCESS,
    };
    use windows::Win32::System::Registry::{
        HKEY, HKEY_LOCAL_MACHINE, KEY_SET_VALUE, KEY_WOW64_64KEY, REG_SZ, RegCloseKey,
        RegOpenKeyExW, RegSetValueExW,
    };
    use windows::core::PCWSTR;

    struct KeyGuard(HKEY);
    impl Drop for KeyGuard {
        fn drop(&mut self) {
            unsafe {
                let _ = RegCloseKey(self.0);
            }
        }
    }

    fn to_wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    let target = format!(r"HKLM\{subkey}\{value_name}");
    let wide_subkey = to_wide(subkey);
    let mut key = HKEY::default();
    let status = unsafe {
        RegOpenKeyExW(
            HKEY_LOCAL_MACHINE,
            PCWSTR(wide_subkey.as_ptr()),
            Some(0),
            KEY_SET_VALUE | KEY_WOW64_64KEY,
            &mut key,
        )
    };
    if status == ERROR_FILE_NOT_FOUND || status == ERROR_PATH_NOT_FOUND {
        return Ok(RegistryWrite::KeyMissing);
    }
    if status == ERROR_ACCESS_DENIED {
        return Err(IdentityError::PermissionDenied { target });
    }
    if status != ERROR_SUCCESS {
        return Err(IdentityError::WriteFailed {
            target,
            detail: format!("RegOpenKeyExW status={}", status.0),
        });
    }
    let _guard = KeyGuard(key);

    let name = to_wide(value_name);
    let wide_data = to_wide(data);
    // REG_SZ data is the UTF-16 string including its terminating null.
    let bytes = unsafe {
        std::slice::from_raw_parts(wide_data.as_ptr() as *const u8, wide_data.len() * 2)
    };
    let status = unsafe { RegSetValueExW(key, PCWSTR(name.as_ptr()), Some(0), REG_SZ, Some(bytes)) };
    if status == ERROR_ACCESS_DENIED {
        return Err(IdentityError::PermissionDenied { target });
    }
    if status != ERROR_SUCCESS {
        return Err(IdentityError::WriteFailed {
            target,
            detail: format!("RegSetValueExW status={}", status.0),
        });
    }
    Ok(RegistryWrite::Written)
}

#[cfg(not(windows))]
fn set_hklm_string(_subkey: &str, _value_name: &str, _data: &str) -> Result<RegistryWrite, IdentityError> {
    Ok(RegistryWrite::Unavailable)
}
