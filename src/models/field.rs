//! Field schema model
//!
//! A [`FieldSchema`] describes one field of one adapter, as parsed from the
//! server's dynamic field metadata. Complex fields (array of objects) carry
//! their nested `sub_fields`.

use serde::{Deserialize, Serialize};

/// Short name of the aggregated adapter.
pub const AGG_ADAPTER_NAME: &str = "agg";

/// Title of the aggregated adapter.
pub const AGG_ADAPTER_TITLE: &str = "Aggregated";

/// Field prefix of the aggregated adapter.
pub const AGG_ADAPTER_PREFIX: &str = "specific_data.data";

/// Qualified name of the aggregated adapter's whole document.
pub const AGG_ALL_FIELD: &str = "specific_data";

/// Prefix of adapter specific fields, followed by the raw adapter name.
pub const ADAPTER_DATA_PREFIX: &str = "adapters_data";

/// Name of the synthetic field standing for an adapter's entire document.
pub const ALL_NAME: &str = "all";

/// Type tag used when a wire type has no normalized mapping.
pub const UNKNOWN_TYPE_NORM: &str = "unknown";

/// Aggregated installed software field read by the whitelist report
pub const INSTALLED_SOFTWARE_FIELD: &str = "specific_data.data.installed_software";

/// Adapter metadata shared by every field of one adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterMeta {
    /// Short adapter name (e.g. `aws`, `agg`)
    pub name: String,
    /// Raw adapter name as sent by the server (e.g. `aws_adapter`)
    pub name_raw: String,
    /// Display title (e.g. `Aws`)
    pub title: String,
    /// Dotted prefix of every qualified field name of this adapter
    pub prefix: String,
}

impl AdapterMeta {
    /// Metadata of the aggregated adapter.
    pub fn aggregated() -> Self {
        Self {
            name: AGG_ADAPTER_NAME.to_string(),
            name_raw: format!("{}_adapter", AGG_ADAPTER_NAME),
            title: AGG_ADAPTER_TITLE.to_string(),
            prefix: AGG_ADAPTER_PREFIX.to_string(),
        }
    }

    /// Metadata of an adapter specific namespace from its raw name.
    ///
    /// `active_directory_adapter` becomes name `active_directory`, title
    /// `Active Directory` and prefix `adapters_data.active_directory_adapter`.
    pub fn specific(name_raw: &str) -> Self {
        let name = name_raw.strip_suffix("_adapter").unwrap_or(name_raw);
        let title = name
            .split('_')
            .filter(|w| !w.is_empty())
            .map(title_case)
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            name: name.to_string(),
            name_raw: name_raw.to_string(),
            title,
            prefix: format!("{}.{}", ADAPTER_DATA_PREFIX, name_raw),
        }
    }

    /// Metadata for synthetic report fields.
    pub fn report() -> Self {
        Self {
            name: "report".to_string(),
            name_raw: "report".to_string(),
            title: "Report".to_string(),
            prefix: String::new(),
        }
    }

    pub fn is_aggregated(&self) -> bool {
        self.name == AGG_ADAPTER_NAME
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Schema of a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Leaf name (last component for sub-fields)
    pub name: String,
    /// Adapter-relative dotted path
    pub name_base: String,
    /// Fully-qualified path, unique across the catalog
    pub name_qual: String,
    pub title: String,
    /// `adapter:name_base`
    pub column_name: String,
    /// `Adapter Title: title`, used when renaming keys to titles
    pub column_title: String,
    pub field_type: String,
    pub format: Option<String>,
    pub items_type: Option<String>,
    pub items_format: Option<String>,
    /// Normalized type tag; `unknown` when the wire type is unmapped
    pub type_norm: String,
    pub is_complex: bool,
    pub is_list: bool,
    pub is_root: bool,
    /// Synthetic entry standing for an adapter's whole document
    #[serde(default)]
    pub is_all: bool,
    /// Not part of the server schema (report fields, manual names)
    #[serde(default)]
    pub is_custom: bool,
    /// Qualified name of the parent complex field
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_fields: Vec<FieldSchema>,
    pub adapter: AdapterMeta,
}

impl FieldSchema {
    /// Synthetic "all" entry standing for an adapter's entire document.
    pub fn all_entry(adapter: &AdapterMeta, all_field: &str) -> Self {
        Self {
            name: ALL_NAME.to_string(),
            name_base: ALL_NAME.to_string(),
            name_qual: all_field.to_string(),
            title: "All Adapter Specific Data".to_string(),
            column_name: format!("{}:{}", adapter.name, ALL_NAME),
            column_title: format!("All {} Data", adapter.title),
            field_type: "array".to_string(),
            format: None,
            items_type: None,
            items_format: None,
            type_norm: "complex".to_string(),
            is_complex: true,
            is_list: true,
            is_root: false,
            is_all: true,
            is_custom: false,
            parent: None,
            enum_values: Vec::new(),
            sub_fields: Vec::new(),
            adapter: adapter.clone(),
        }
    }

    /// Simple schema for a field name that is not in the server schema.
    pub fn custom(name_qual: &str) -> Self {
        Self {
            name: name_qual.to_string(),
            name_base: name_qual.to_string(),
            name_qual: name_qual.to_string(),
            title: name_qual.to_string(),
            column_name: name_qual.to_string(),
            column_title: name_qual.to_string(),
            field_type: "string".to_string(),
            format: None,
            items_type: None,
            items_format: None,
            type_norm: "string".to_string(),
            is_complex: false,
            is_list: false,
            is_root: true,
            is_all: false,
            is_custom: true,
            parent: None,
            enum_values: Vec::new(),
            sub_fields: Vec::new(),
            adapter: AdapterMeta::report(),
        }
    }

    /// List-of-strings report field added by a report stage.
    pub fn report(name: &str, title: &str) -> Self {
        let adapter = AdapterMeta::report();
        Self {
            name: name.to_string(),
            name_base: name.to_string(),
            name_qual: name.to_string(),
            title: title.to_string(),
            column_name: format!("{}:{}", adapter.name, name),
            column_title: format!("{}: {}", adapter.title, title),
            field_type: "array".to_string(),
            format: None,
            items_type: Some("string".to_string()),
            items_format: None,
            type_norm: "list_string".to_string(),
            is_complex: false,
            is_list: true,
            is_root: true,
            is_all: false,
            is_custom: true,
            parent: None,
            enum_values: Vec::new(),
            sub_fields: Vec::new(),
            adapter,
        }
    }

    /// Root sub-fields, the only ones exposed when this field is flattened.
    pub fn root_sub_fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.sub_fields.iter().filter(|s| s.is_root)
    }

    /// Names this schema can be referred to by, in match priority order.
    pub fn match_keys(&self) -> [&str; 4] {
        [
            self.name.as_str(),
            self.name_base.as_str(),
            self.name_qual.as_str(),
            self.title.as_str(),
        ]
    }
}

/// Report field listing adapters missing from an asset.
pub fn adapters_missing_schema() -> FieldSchema {
    FieldSchema::report("adapters_missing", "Adapters Missing")
}

/// Report fields produced by the software whitelist report.
pub fn software_whitelist_schemas() -> Vec<FieldSchema> {
    vec![
        FieldSchema::report("software_missing", "Missing Software"),
        FieldSchema::report("software_extra", "Extra Software"),
        FieldSchema::report("software_whitelist", "Software Whitelist"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specific_adapter_meta() {
        let meta = AdapterMeta::specific("active_directory_adapter");
        assert_eq!(meta.name, "active_directory");
        assert_eq!(meta.title, "Active Directory");
        assert_eq!(meta.prefix, "adapters_data.active_directory_adapter");
        assert!(!meta.is_aggregated());
    }

    #[test]
    fn test_report_schema_titles() {
        let schema = adapters_missing_schema();
        assert_eq!(schema.column_title, "Report: Adapters Missing");
        assert_eq!(schema.type_norm, "list_string");
        assert!(schema.is_custom);
    }
}
