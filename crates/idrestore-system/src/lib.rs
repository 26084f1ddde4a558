// ABOUTME: Platform-level machine identity adapters for idrestore.
// ABOUTME: One variant per supported OS, selected by runtime platform detection.

pub mod identity;
pub mod platform_uuid;
pub mod registry;

pub use identity::{IdentityError, IdentityOutcome, IdentityPaths, IdentityStore, Platform};
pub use platform_uuid::PlatformUuidIdentity;
pub use registry::RegistryIdentity;
