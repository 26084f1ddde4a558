// ABOUTME: Domain types shared by every idrestore crate.
// ABOUTME: Exposes the identifier set, its key table, masking and merge helpers, and the error taxonomy.

pub mod error;
pub mod identifiers;

pub use error::ErrorKind;
pub use identifiers::{IdentifierKey, IdentifierSet, ValidationError, json_type_name, mask, merge};
