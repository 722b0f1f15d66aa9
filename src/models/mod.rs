//! Models module for the SDK
//!
//! Defines the field schema tree, the catalog built from it, rows and the
//! tag batches accumulated while processing rows.

pub mod catalog;
pub mod field;
pub mod row;
pub mod tag;

pub use catalog::{AGG_ADAPTER_ALTS, AdapterFields, Catalog};
pub use field::{
    ADAPTER_DATA_PREFIX, AGG_ADAPTER_NAME, AGG_ADAPTER_PREFIX, AGG_ADAPTER_TITLE, AGG_ALL_FIELD,
    ALL_NAME, AdapterMeta, FieldSchema, INSTALLED_SOFTWARE_FIELD, UNKNOWN_TYPE_NORM, adapters_missing_schema,
    software_whitelist_schemas,
};
pub use row::{Row, RowEvent, display_value, listify};
pub use tag::{TagBatch, TagOp};
