//! Field catalog: every adapter's parsed field schemas
//!
//! The catalog is built in one pass by
//! [`FieldSchemaImporter`](crate::import::FieldSchemaImporter) and is
//! immutable afterwards. A new fetch builds a new catalog.

use super::field::{AGG_ADAPTER_NAME, AdapterMeta, FieldSchema};
use crate::error::ConfigurationError;
use std::collections::HashMap;

/// Alternative names for the aggregated adapter.
pub const AGG_ADAPTER_ALTS: &[&str] = &["generic", "general", "specific", "agg", "aggregated"];

/// Fields of a single adapter, in server order.
#[derive(Debug, Clone)]
pub struct AdapterFields {
    pub meta: AdapterMeta,
    fields: Vec<FieldSchema>,
    by_base: HashMap<String, usize>,
}

impl AdapterFields {
    pub fn new(meta: AdapterMeta) -> Self {
        Self {
            meta,
            fields: Vec::new(),
            by_base: HashMap::new(),
        }
    }

    /// Register a field; a base name may only be registered once.
    pub fn insert(&mut self, field: FieldSchema) -> Result<(), ConfigurationError> {
        if self.by_base.contains_key(&field.name_base) {
            return Err(ConfigurationError::DuplicateField {
                adapter: self.meta.name.clone(),
                name: field.name_base,
            });
        }
        self.by_base
            .insert(field.name_base.clone(), self.fields.len());
        self.fields.push(field);
        Ok(())
    }

    pub fn get(&self, name_base: &str) -> Option<&FieldSchema> {
        self.by_base.get(name_base).map(|idx| &self.fields[*idx])
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    /// The synthetic entry standing for the adapter's whole document.
    pub fn all_field(&self) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.is_all)
    }

    pub fn base_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name_base.clone()).collect()
    }
}

/// Adapter name → field schemas, aggregated adapter first.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    adapters: Vec<AdapterFields>,
    by_name: HashMap<String, usize>,
    by_qual: HashMap<String, (usize, usize)>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fully parsed adapter.
    ///
    /// Fails when any of its qualified names is already registered by
    /// another entry of the catalog.
    pub fn add_adapter(&mut self, adapter: AdapterFields) -> Result<(), ConfigurationError> {
        let adapter_idx = self.adapters.len();
        for (field_idx, field) in adapter.fields.iter().enumerate() {
            if self
                .by_qual
                .insert(field.name_qual.clone(), (adapter_idx, field_idx))
                .is_some()
            {
                return Err(ConfigurationError::DuplicateQualifiedName(
                    field.name_qual.clone(),
                ));
            }
        }
        self.by_name.insert(adapter.meta.name.clone(), adapter_idx);
        self.adapters.push(adapter);
        Ok(())
    }

    pub fn adapters(&self) -> &[AdapterFields] {
        &self.adapters
    }

    pub fn adapter_names(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.meta.name.clone()).collect()
    }

    pub fn adapter(&self, name: &str) -> Option<&AdapterFields> {
        self.by_name.get(name).map(|idx| &self.adapters[*idx])
    }

    /// Normalize a user supplied adapter name: lowercase, strip the
    /// `_adapter` suffix and map aliases onto the aggregated adapter.
    pub fn normalize_adapter_name(value: &str) -> String {
        let search = value.trim().to_lowercase();
        let search = search.strip_suffix("_adapter").unwrap_or(&search);
        if AGG_ADAPTER_ALTS.contains(&search) {
            AGG_ADAPTER_NAME.to_string()
        } else {
            search.to_string()
        }
    }

    /// Look up an adapter by a user supplied (possibly aliased) name.
    pub fn find_adapter(&self, value: &str) -> Option<&AdapterFields> {
        self.adapter(&Self::normalize_adapter_name(value))
    }

    /// Find a schema by fully-qualified name, including nested sub-fields.
    ///
    /// Registered top-level entries take precedence over sub-fields that
    /// describe the same path.
    pub fn find_qual(&self, name_qual: &str) -> Option<&FieldSchema> {
        if let Some((a, f)) = self.by_qual.get(name_qual) {
            return Some(&self.adapters[*a].fields[*f]);
        }
        self.adapters
            .iter()
            .flat_map(|a| a.fields.iter())
            .filter(|f| f.is_complex && name_qual.starts_with(&f.name_qual))
            .find_map(|f| find_sub(f, name_qual))
    }

    /// Every registered top-level schema, adapter by adapter.
    pub fn iter(&self) -> impl Iterator<Item = &FieldSchema> {
        self.adapters.iter().flat_map(|a| a.fields.iter())
    }

    pub fn len(&self) -> usize {
        self.by_qual.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_qual.is_empty()
    }

    /// Raw names of every adapter specific namespace.
    pub fn adapter_raw_names(&self) -> Vec<String> {
        self.adapters
            .iter()
            .filter(|a| !a.meta.is_aggregated())
            .map(|a| a.meta.name_raw.clone())
            .collect()
    }
}

fn find_sub<'a>(schema: &'a FieldSchema, name_qual: &str) -> Option<&'a FieldSchema> {
    for sub in &schema.sub_fields {
        if sub.name_qual == name_qual {
            return Some(sub);
        }
        if sub.is_complex
            && let Some(found) = find_sub(sub, name_qual)
        {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_adapter_name() {
        assert_eq!(Catalog::normalize_adapter_name("Generic"), "agg");
        assert_eq!(Catalog::normalize_adapter_name("aggregated"), "agg");
        assert_eq!(Catalog::normalize_adapter_name("aws_adapter"), "aws");
        assert_eq!(Catalog::normalize_adapter_name(" AWS "), "aws");
    }

    #[test]
    fn test_duplicate_base_name_rejected() {
        let meta = AdapterMeta::aggregated();
        let mut fields = AdapterFields::new(meta.clone());
        fields
            .insert(FieldSchema::all_entry(&meta, "specific_data"))
            .unwrap();
        let err = fields
            .insert(FieldSchema::all_entry(&meta, "specific_data"))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateField { .. }));
    }
}
