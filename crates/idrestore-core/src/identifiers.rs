// ABOUTME: Canonical in-memory representation of the five restorable identifier fields.
// ABOUTME: Provides the storage key table, snapshot validation, display masking, and merge.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Shown instead of values too short to partially reveal.
pub const MASK_PLACEHOLDER: &str = "********";

/// Replaces the hidden middle of a masked value.
pub const MASK_ELLIPSIS: &str = "...";

const MASK_HEAD: usize = 8;
const MASK_TAIL: usize = 4;

/// One of the five reserved identifier keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKey {
    DeviceId,
    MacMachineId,
    MachineId,
    SqmId,
    ServiceMachineId,
}

impl IdentifierKey {
    /// Every key, in the order stores are written.
    pub const ALL: [IdentifierKey; 5] = [
        IdentifierKey::DeviceId,
        IdentifierKey::MacMachineId,
        IdentifierKey::MachineId,
        IdentifierKey::SqmId,
        IdentifierKey::ServiceMachineId,
    ];

    /// Logical name used in reports and logs.
    pub fn name(self) -> &'static str {
        match self {
            IdentifierKey::DeviceId => "device_id",
            IdentifierKey::MacMachineId => "mac_machine_id",
            IdentifierKey::MachineId => "machine_id",
            IdentifierKey::SqmId => "sqm_id",
            IdentifierKey::ServiceMachineId => "service_machine_id",
        }
    }

    /// Key as it appears in the settings file, snapshots, and the database table.
    pub fn storage_key(self) -> &'static str {
        match self {
            IdentifierKey::DeviceId => "telemetry.devDeviceId",
            IdentifierKey::MacMachineId => "telemetry.macMachineId",
            IdentifierKey::MachineId => "telemetry.machineId",
            IdentifierKey::SqmId => "telemetry.sqmId",
            IdentifierKey::ServiceMachineId => "storage.serviceMachineId",
        }
    }

    pub fn from_storage_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.storage_key() == key)
    }

    /// Keys that must be present and non-empty for a snapshot to be usable.
    pub fn is_required(self) -> bool {
        matches!(self, IdentifierKey::DeviceId | IdentifierKey::MachineId)
    }
}

impl fmt::Display for IdentifierKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Reasons an identifier set is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("required identifier {0} is missing")]
    Missing(IdentifierKey),

    #[error("required identifier {0} is empty")]
    Empty(IdentifierKey),

    #[error("identifier {key} must be a string, found {found}")]
    NotAString { key: IdentifierKey, found: &'static str },
}

/// The five identifier values. `None` means "not captured" and is never
/// written to any store; `Some("")` is a captured empty value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_machine_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqm_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_machine_id: Option<String>,
}

impl IdentifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: IdentifierKey) -> Option<&str> {
        self.slot(key).as_deref()
    }

    pub fn set(&mut self, key: IdentifierKey, value: impl Into<String>) {
        *self.slot_mut(key) = Some(value.into());
    }

    /// Builder-style variant of `set`.
    pub fn with(mut self, key: IdentifierKey, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Captured values in write order, including empty ones.
    pub fn present(&self) -> impl Iterator<Item = (IdentifierKey, &str)> + '_ {
        IdentifierKey::ALL
            .into_iter()
            .filter_map(move |key| self.get(key).map(|value| (key, value)))
    }

    pub fn len(&self) -> usize {
        self.present().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Extract identifiers from a settings-shaped JSON object keyed by storage keys.
    /// Unknown keys are ignored and `null` counts as absent.
    pub fn from_storage_map(map: &Map<String, Value>) -> Result<Self, ValidationError> {
        let mut set = Self::new();
        for key in IdentifierKey::ALL {
            match map.get(key.storage_key()) {
                None | Some(Value::Null) => {}
                Some(Value::String(value)) => set.set(key, value.clone()),
                Some(other) => {
                    return Err(ValidationError::NotAString {
                        key,
                        found: json_type_name(other),
                    });
                }
            }
        }
        Ok(set)
    }

    /// Check that `device_id` and `machine_id` are present and non-empty.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for key in IdentifierKey::ALL.into_iter().filter(|k| k.is_required()) {
            match self.get(key) {
                None => return Err(ValidationError::Missing(key)),
                Some(value) if value.is_empty() => return Err(ValidationError::Empty(key)),
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Masked copy suitable for printing.
    pub fn masked(&self) -> Vec<(IdentifierKey, String)> {
        self.present().map(|(key, value)| (key, mask(value))).collect()
    }

    fn slot(&self, key: IdentifierKey) -> &Option<String> {
        match key {
            IdentifierKey::DeviceId => &self.device_id,
            IdentifierKey::MacMachineId => &self.mac_machine_id,
            IdentifierKey::MachineId => &self.machine_id,
            IdentifierKey::SqmId => &self.sqm_id,
            IdentifierKey::ServiceMachineId => &self.service_machine_id,
        }
    }

    fn slot_mut(&mut self, key: IdentifierKey) -> &mut Option<String> {
        match key {
            IdentifierKey::DeviceId => &mut self.device_id,
            IdentifierKey::MacMachineId => &mut self.mac_machine_id,
            IdentifierKey::MachineId => &mut self.machine_id,
            IdentifierKey::SqmId => &mut self.sqm_id,
            IdentifierKey::ServiceMachineId => &mut self.service_machine_id,
        }
    }
}

/// Display-safe rendering of an identifier: the first 8 and last 4 characters
/// around a fixed ellipsis, or a fixed placeholder for values under 12 characters.
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() < MASK_HEAD + MASK_TAIL {
        return MASK_PLACEHOLDER.to_string();
    }
    let head: String = chars[..MASK_HEAD].iter().collect();
    let tail: String = chars[chars.len() - MASK_TAIL..].iter().collect();
    format!("{head}{MASK_ELLIPSIS}{tail}")
}

/// Overlay `overrides` onto `base`. A non-empty override replaces the base value;
/// an empty or absent override keeps it. An empty override only fills a key the
/// base never captured.
pub fn merge(base: &IdentifierSet, overrides: &IdentifierSet) -> IdentifierSet {
    let mut merged = base.clone();
    for key in IdentifierKey::ALL {
        match overrides.get(key) {
            Some(value) if !value.is_empty() => merged.set(key, value),
            Some(_) if base.get(key).is_none() => merged.set(key, ""),
            _ => {}
        }
    }
    merged
}

/// JSON type name used in error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
