//! Field schema parser
//!
//! Turns the server's raw field metadata into a [`Catalog`].
//!
//! The wire format is
//! `{ "generic": [descriptor...], "specific": { "aws_adapter": [descriptor...] } }`
//! where each descriptor is
//! `{ name, title?, type, format?, items?: { type?, format?, items?: [descriptor...] }, enum? }`.
//!
//! # Root fields
//!
//! The server lists some nested paths twice: once inside their parent's
//! `items.items` and once as a dotted top-level field. A field whose first
//! path segment is the base name of a sibling is reachable through that
//! sibling and is therefore not root.

use super::type_norm;
use crate::error::ConfigurationError;
use crate::models::{
    AGG_ALL_FIELD, AdapterFields, AdapterMeta, Catalog, FieldSchema, display_value,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

/// One raw field descriptor as sent by the server.
#[derive(Debug, Clone, Deserialize)]
pub struct RawField {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub items: Option<RawItems>,
    #[serde(default, rename = "enum")]
    pub enum_values: Option<Vec<Value>>,
}

/// The `items` block of a list or complex descriptor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawItems {
    #[serde(default, rename = "type")]
    pub items_type: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub items: Option<Vec<RawField>>,
}

impl RawField {
    fn items_type(&self) -> Option<&str> {
        self.items.as_ref().and_then(|i| i.items_type.as_deref())
    }

    fn items_format(&self) -> Option<&str> {
        self.items.as_ref().and_then(|i| i.format.as_deref())
    }

    fn is_complex(&self) -> bool {
        self.field_type == "array" && self.items_type() == Some("array")
    }

    fn title(&self) -> String {
        self.title.clone().unwrap_or_else(|| self.name.clone())
    }
}

/// Parser for the server's field schema metadata.
pub struct FieldSchemaImporter;

impl Default for FieldSchemaImporter {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldSchemaImporter {
    /// Create a new field schema parser.
    ///
    /// # Example
    ///
    /// ```rust
    /// use asset_pipeline_sdk::import::FieldSchemaImporter;
    /// use serde_json::json;
    ///
    /// let raw = json!({
    ///     "generic": [{"name": "specific_data.data.hostname", "title": "Host Name", "type": "string"}],
    ///     "specific": {}
    /// });
    /// let catalog = FieldSchemaImporter::new().parse(&raw).unwrap();
    /// assert!(catalog.find_qual("specific_data.data.hostname").is_some());
    /// ```
    pub fn new() -> Self {
        Self
    }

    /// Parse field metadata from a JSON string.
    pub fn parse_str(&self, content: &str) -> Result<Catalog, ConfigurationError> {
        let raw: Value = serde_json::from_str(content)
            .map_err(|e| ConfigurationError::MalformedSchema(e.to_string()))?;
        self.parse(&raw)
    }

    /// Parse field metadata into a catalog.
    ///
    /// The aggregated adapter comes first, then adapter specific namespaces
    /// in server order.
    pub fn parse(&self, raw: &Value) -> Result<Catalog, ConfigurationError> {
        let generic = raw
            .get("generic")
            .ok_or_else(|| ConfigurationError::MalformedSchema("missing 'generic'".to_string()))?;
        let generic = decode_fields(generic, "generic")?;

        let mut catalog = Catalog::new();
        let agg = parse_adapter(AdapterMeta::aggregated(), AGG_ALL_FIELD, &generic)?;
        catalog.add_adapter(agg)?;

        if let Some(specific) = raw.get("specific") {
            let specific = specific.as_object().ok_or_else(|| {
                ConfigurationError::MalformedSchema("'specific' is not an object".to_string())
            })?;
            for (name_raw, fields) in specific {
                let fields = decode_fields(fields, name_raw)?;
                let meta = AdapterMeta::specific(name_raw);
                let all_field = meta.prefix.clone();
                catalog.add_adapter(parse_adapter(meta, &all_field, &fields)?)?;
            }
        }

        info!(
            "Parsed {} field schemas across {} adapters",
            catalog.len(),
            catalog.adapters().len()
        );
        Ok(catalog)
    }
}

fn decode_fields(value: &Value, context: &str) -> Result<Vec<RawField>, ConfigurationError> {
    Vec::<RawField>::deserialize(value).map_err(|e| {
        ConfigurationError::MalformedSchema(format!("fields of '{}': {}", context, e))
    })
}

/// Strip the adapter prefix and any leftover separator dots.
fn strip_prefix(name: &str, prefix: &str) -> String {
    name.strip_prefix(prefix)
        .unwrap_or(name)
        .trim_matches('.')
        .to_string()
}

/// A field is not root if its first path segment is a sibling's base name.
pub fn is_root(name: &str, sibling_names: &[String]) -> bool {
    match name.split_once('.') {
        Some((first, _)) => !sibling_names.iter().any(|n| n == first),
        None => true,
    }
}

fn parse_adapter(
    meta: AdapterMeta,
    all_field: &str,
    raw_fields: &[RawField],
) -> Result<AdapterFields, ConfigurationError> {
    let mut adapter = AdapterFields::new(meta.clone());
    adapter.insert(FieldSchema::all_entry(&meta, all_field))?;

    let base_names: Vec<String> = raw_fields
        .iter()
        .map(|f| strip_prefix(&f.name, &meta.prefix))
        .collect();

    for (raw, name_base) in raw_fields.iter().zip(&base_names) {
        let title = raw.title();
        let mut schema = FieldSchema {
            name: raw.name.clone(),
            name_base: name_base.clone(),
            name_qual: raw.name.clone(),
            column_name: format!("{}:{}", meta.name, name_base),
            column_title: format!("{}: {}", meta.title, title),
            title,
            field_type: raw.field_type.clone(),
            format: raw.format.clone(),
            items_type: raw.items_type().map(str::to_string),
            items_format: raw.items_format().map(str::to_string),
            type_norm: type_norm::normalize(
                &raw.field_type,
                raw.format.as_deref(),
                raw.items_type(),
                raw.items_format(),
                &raw.name,
            ),
            is_complex: raw.is_complex(),
            is_list: raw.field_type == "array",
            is_root: is_root(name_base, &base_names),
            is_all: false,
            is_custom: false,
            parent: None,
            enum_values: enum_strings(raw),
            sub_fields: Vec::new(),
            adapter: meta.clone(),
        };
        if schema.is_complex {
            schema.sub_fields = parse_sub_fields(&schema, raw);
        }
        adapter.insert(schema)?;
    }

    debug!(
        "Adapter '{}' has {} fields",
        meta.name,
        adapter.fields().len()
    );
    Ok(adapter)
}

fn parse_sub_fields(parent: &FieldSchema, raw: &RawField) -> Vec<FieldSchema> {
    let items: &[RawField] = raw
        .items
        .as_ref()
        .and_then(|i| i.items.as_deref())
        .unwrap_or(&[]);
    let sibling_names: Vec<String> = items.iter().map(|f| f.name.clone()).collect();

    items
        .iter()
        .map(|sub| {
            let title = sub.title();
            let name_base = format!("{}.{}", parent.name_base, sub.name);
            let name_qual = if parent.adapter.prefix.is_empty() {
                name_base.clone()
            } else {
                format!("{}.{}", parent.adapter.prefix, name_base)
            };
            let mut schema = FieldSchema {
                name: sub.name.clone(),
                column_name: format!("{}.{}", parent.column_name, sub.name),
                column_title: format!("{}: {}", parent.column_title, title),
                title,
                field_type: sub.field_type.clone(),
                format: sub.format.clone(),
                items_type: sub.items_type().map(str::to_string),
                items_format: sub.items_format().map(str::to_string),
                type_norm: type_norm::normalize(
                    &sub.field_type,
                    sub.format.as_deref(),
                    sub.items_type(),
                    sub.items_format(),
                    &name_qual,
                ),
                is_complex: sub.is_complex(),
                is_list: sub.field_type == "array",
                is_root: is_root(&sub.name, &sibling_names),
                is_all: false,
                is_custom: false,
                parent: Some(parent.name_qual.clone()),
                enum_values: enum_strings(sub),
                sub_fields: Vec::new(),
                adapter: parent.adapter.clone(),
                name_base,
                name_qual,
            };
            if schema.is_complex {
                schema.sub_fields = parse_sub_fields(&schema, sub);
            }
            schema
        })
        .collect()
}

fn enum_strings(raw: &RawField) -> Vec<String> {
    raw.enum_values
        .as_ref()
        .map(|values| values.iter().map(display_value).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "generic": [
                {"name": "specific_data.data.hostname", "title": "Host Name", "type": "string"},
                {
                    "name": "specific_data.data.network_interfaces",
                    "title": "Network Interfaces",
                    "type": "array",
                    "items": {"type": "array", "items": [
                        {"name": "ips", "title": "IPs", "type": "array", "items": {"type": "string", "format": "ip"}},
                        {"name": "mac", "title": "MAC", "type": "string"}
                    ]}
                },
                {
                    "name": "specific_data.data.network_interfaces.ips",
                    "title": "Network Interfaces: IPs",
                    "type": "array",
                    "items": {"type": "string", "format": "ip"}
                }
            ],
            "specific": {
                "aws_adapter": [
                    {"name": "adapters_data.aws_adapter.region", "type": "string", "enum": ["us-east-1"]}
                ]
            }
        })
    }

    #[test]
    fn test_parse_aggregated_adapter() {
        let catalog = FieldSchemaImporter::new().parse(&sample()).unwrap();
        assert_eq!(catalog.adapter_names(), vec!["agg", "aws"]);

        let agg = catalog.adapter("agg").unwrap();
        let host = agg.get("hostname").unwrap();
        assert_eq!(host.name_qual, "specific_data.data.hostname");
        assert_eq!(host.column_name, "agg:hostname");
        assert_eq!(host.column_title, "Aggregated: Host Name");
        assert!(host.is_root);
        assert!(!host.is_complex);

        let all = agg.all_field().unwrap();
        assert_eq!(all.name_qual, "specific_data");
        assert!(all.is_complex);
        assert!(all.sub_fields.is_empty());
    }

    #[test]
    fn test_dotted_sibling_is_not_root() {
        let catalog = FieldSchemaImporter::new().parse(&sample()).unwrap();
        let agg = catalog.adapter("agg").unwrap();
        assert!(agg.get("network_interfaces").unwrap().is_root);
        assert!(!agg.get("network_interfaces.ips").unwrap().is_root);
    }

    #[test]
    fn test_complex_sub_fields() {
        let catalog = FieldSchemaImporter::new().parse(&sample()).unwrap();
        let nic = catalog.adapter("agg").unwrap().get("network_interfaces").unwrap();
        assert!(nic.is_complex);
        assert_eq!(nic.type_norm, "complex");
        let names: Vec<&str> = nic.sub_fields.iter().map(|s| s.name_qual.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "specific_data.data.network_interfaces.ips",
                "specific_data.data.network_interfaces.mac"
            ]
        );
        let ips = &nic.sub_fields[0];
        assert_eq!(ips.type_norm, "list_string_ipaddress");
        assert_eq!(ips.column_title, "Aggregated: Network Interfaces: IPs");
        assert_eq!(
            ips.parent.as_deref(),
            Some("specific_data.data.network_interfaces")
        );
        assert!(ips.is_root);
    }

    #[test]
    fn test_specific_adapter_and_default_title() {
        let catalog = FieldSchemaImporter::new().parse(&sample()).unwrap();
        let aws = catalog.find_adapter("AWS_adapter").unwrap();
        assert_eq!(aws.meta.prefix, "adapters_data.aws_adapter");
        assert_eq!(aws.all_field().unwrap().name_qual, "adapters_data.aws_adapter");
        let region = aws.get("region").unwrap();
        assert_eq!(region.title, "adapters_data.aws_adapter.region");
        assert_eq!(region.enum_values, vec!["us-east-1"]);
    }

    #[test]
    fn test_duplicate_base_name_is_fatal() {
        let raw = json!({
            "generic": [
                {"name": "specific_data.data.id", "type": "string"},
                {"name": "specific_data.data.id", "type": "string"}
            ],
            "specific": {}
        });
        let err = FieldSchemaImporter::new().parse(&raw).unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateField { .. }));
    }

    #[test]
    fn test_missing_generic_is_malformed() {
        let err = FieldSchemaImporter::new()
            .parse_str(r#"{"specific": {}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::MalformedSchema(_)));
    }

    #[test]
    fn test_is_root() {
        let names = vec!["a".to_string(), "b.c".to_string()];
        assert!(is_root("a", &names));
        assert!(!is_root("a.x", &names));
        assert!(is_root("b.c", &names));
        assert!(is_root("z.y", &names));
    }
}
