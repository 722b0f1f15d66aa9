//! Import functionality
//!
//! Provides the parser for the server's dynamic field schema metadata:
//! - Field descriptors (aggregated and adapter specific namespaces)
//! - Normalized type tags

pub mod fields;
pub mod type_norm;

pub use fields::{FieldSchemaImporter, RawField, RawItems, is_root};
