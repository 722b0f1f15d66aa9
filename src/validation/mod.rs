//! Validation functionality
//!
//! Provides validation logic for:
//! - Field requests (resolution against the field catalog)
//! - Field name patterns (exclusions, regex bulk matches)

pub mod patterns;
pub mod resolver;

pub use patterns::{ExcludeSet, compile_pattern, compile_search, glob_to_regex};
pub use resolver::{FieldSpec, MANUAL_PREFIX, QualifiedFieldResolver, REGEX_PREFIX, ResolveMode};
