//! Qualified field resolution
//!
//! Maps loose field requests onto fully-qualified names from a [`Catalog`].
//!
//! # Field spec syntax
//!
//! | Form | Meaning |
//! |------|---------|
//! | `specific_data.data.hostname` | already qualified, returned unchanged |
//! | `hostname,id` | fields of the aggregated adapter |
//! | `aws:region,id` | fields of one adapter (aliases and `_adapter` suffix allowed) |
//! | `all`, `*`, `aws:all` | the adapter's whole document |
//! | `~raw.name` | manual name, not validated |
//! | `re:aws:^id`, `re:^host` | regex over base names of matching adapters |

use super::patterns::compile_search;
use crate::error::{AssetError, ConfigurationError, NotFoundError};
use crate::models::{
    ADAPTER_DATA_PREFIX, AGG_ADAPTER_NAME, AGG_ALL_FIELD, AdapterFields, Catalog, FieldSchema,
};
use tracing::{Span, debug, info_span, warn};

/// Prefix marking a field name that bypasses validation.
pub const MANUAL_PREFIX: char = '~';

/// Prefix of a regex bulk match spec.
pub const REGEX_PREFIX: &str = "re:";

/// A parsed field request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSpec {
    /// Fully-qualified name
    Qualified(String),
    /// Field names scoped to one adapter; `None` is the aggregated adapter
    Scoped {
        adapter: Option<String>,
        fields: Vec<String>,
    },
    /// The adapter's whole document
    All { adapter: Option<String> },
    /// Name used verbatim
    Manual(String),
    /// Regex over base names within adapters matching `adapter_pattern`
    Regex {
        adapter_pattern: Option<String>,
        field_pattern: String,
    },
}

impl FieldSpec {
    /// Parse the string form of a field spec.
    pub fn parse(value: &str) -> Result<Self, ConfigurationError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ConfigurationError::Invalid("empty field spec".to_string()));
        }

        if let Some(manual) = value.strip_prefix(MANUAL_PREFIX) {
            let manual = manual.trim();
            if manual.is_empty() {
                return Err(ConfigurationError::Invalid(format!(
                    "no field name after '{}'",
                    MANUAL_PREFIX
                )));
            }
            return Ok(FieldSpec::Manual(manual.to_string()));
        }

        if let Some(rest) = value.strip_prefix(REGEX_PREFIX) {
            let (adapter_pattern, field_pattern) = match rest.split_once(':') {
                Some((adapter, field)) => (non_empty(adapter), field.trim()),
                None => (None, rest.trim()),
            };
            if field_pattern.is_empty() {
                return Err(ConfigurationError::Invalid(format!(
                    "no field pattern in '{}'",
                    value
                )));
            }
            return Ok(FieldSpec::Regex {
                adapter_pattern,
                field_pattern: field_pattern.to_string(),
            });
        }

        if is_all(value) {
            return Ok(FieldSpec::All { adapter: None });
        }

        if let Some((adapter, fields)) = value.split_once(':') {
            let adapter = non_empty(adapter);
            if is_all(fields) {
                return Ok(FieldSpec::All { adapter });
            }
            return Self::scoped(adapter, fields, value);
        }

        if is_qualified(value) {
            return Ok(FieldSpec::Qualified(value.to_string()));
        }

        Self::scoped(None, value, value)
    }

    fn scoped(
        adapter: Option<String>,
        fields: &str,
        original: &str,
    ) -> Result<Self, ConfigurationError> {
        let fields: Vec<String> = fields
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
        if fields.is_empty() {
            return Err(ConfigurationError::Invalid(format!(
                "no fields in '{}', format must be 'adapter:field'",
                original
            )));
        }
        Ok(FieldSpec::Scoped { adapter, fields })
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn is_all(value: &str) -> bool {
    let value = value.trim();
    value == "*" || value.eq_ignore_ascii_case("all")
}

fn is_qualified(value: &str) -> bool {
    !value.contains(',')
        && (value == AGG_ALL_FIELD
            || value.starts_with(&format!("{}.", AGG_ALL_FIELD))
            || value.starts_with(&format!("{}.", ADAPTER_DATA_PREFIX)))
}

/// How unknown adapters and fields are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResolveMode {
    /// Fail with a [`NotFoundError`]
    #[default]
    Strict,
    /// Log a warning and leave the item out
    Lenient,
}

/// Resolves [`FieldSpec`]s against a catalog.
pub struct QualifiedFieldResolver<'a> {
    catalog: &'a Catalog,
    mode: ResolveMode,
    regex_root_only: bool,
    span: Span,
}

impl<'a> QualifiedFieldResolver<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            mode: ResolveMode::Strict,
            regex_root_only: true,
            span: info_span!("field_resolver"),
        }
    }

    pub fn with_mode(mut self, mode: ResolveMode) -> Self {
        self.mode = mode;
        self
    }

    /// Let regex matches include non-root fields.
    pub fn with_regex_root_only(mut self, root_only: bool) -> Self {
        self.regex_root_only = root_only;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Parse and resolve string specs.
    pub fn resolve_strs<S: AsRef<str>>(&self, values: &[S]) -> Result<Vec<String>, AssetError> {
        let specs = values
            .iter()
            .map(|v| FieldSpec::parse(v.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        self.resolve(&specs)
    }

    /// Resolve specs into deduplicated qualified names, in request order.
    pub fn resolve(&self, specs: &[FieldSpec]) -> Result<Vec<String>, AssetError> {
        let _enter = self.span.enter();
        let mut selected: Vec<String> = Vec::new();
        for spec in specs {
            for name in self.resolve_one(spec)? {
                if !selected.contains(&name) {
                    selected.push(name);
                }
            }
        }
        debug!("Resolved {} field specs into {} fields", specs.len(), selected.len());
        Ok(selected)
    }

    /// Resolve one spec. May return several names.
    pub fn resolve_one(&self, spec: &FieldSpec) -> Result<Vec<String>, AssetError> {
        match spec {
            FieldSpec::Manual(name) => Ok(vec![name.clone()]),
            FieldSpec::Qualified(name) => self.resolve_qualified(name),
            FieldSpec::All { adapter } => {
                let Some(fields) = self.adapter(adapter.as_deref())? else {
                    return Ok(Vec::new());
                };
                Ok(fields
                    .all_field()
                    .map(|f| vec![f.name_qual.clone()])
                    .unwrap_or_default())
            }
            FieldSpec::Scoped { adapter, fields } => {
                let Some(adapter_fields) = self.adapter(adapter.as_deref())? else {
                    return Ok(Vec::new());
                };
                let mut names = Vec::new();
                for field in fields {
                    match find_field(adapter_fields, field) {
                        Some(schema) => names.push(schema.name_qual.clone()),
                        None => {
                            let err = NotFoundError::field(
                                field.clone(),
                                &adapter_fields.meta.name,
                                adapter_fields.base_names(),
                            );
                            self.not_found(err)?;
                        }
                    }
                }
                Ok(names)
            }
            FieldSpec::Regex {
                adapter_pattern,
                field_pattern,
            } => self.resolve_regex(adapter_pattern.as_deref(), field_pattern),
        }
    }

    fn resolve_qualified(&self, name: &str) -> Result<Vec<String>, AssetError> {
        if self.catalog.find_qual(name).is_some() {
            return Ok(vec![name.to_string()]);
        }
        let owner = self
            .catalog
            .adapters()
            .iter()
            .rev()
            .find(|a| name.starts_with(&a.meta.prefix))
            .or_else(|| self.catalog.adapter(AGG_ADAPTER_NAME));
        let (adapter, valid) = owner
            .map(|a| (a.meta.name.clone(), a.base_names()))
            .unwrap_or_default();
        self.not_found(NotFoundError::field(name, &adapter, valid))?;
        Ok(Vec::new())
    }

    fn resolve_regex(
        &self,
        adapter_pattern: Option<&str>,
        field_pattern: &str,
    ) -> Result<Vec<String>, AssetError> {
        let adapters: Vec<&AdapterFields> = match adapter_pattern {
            None => self.catalog.adapter(AGG_ADAPTER_NAME).into_iter().collect(),
            Some(pattern) => {
                let normalized = Catalog::normalize_adapter_name(pattern);
                let adapter_re = compile_search(&normalized)?;
                self.catalog
                    .adapters()
                    .iter()
                    .filter(|a| adapter_re.is_match(&a.meta.name))
                    .collect()
            }
        };
        if adapters.is_empty() {
            let pattern = adapter_pattern.unwrap_or(AGG_ADAPTER_NAME);
            self.not_found(NotFoundError::adapter(pattern, self.catalog.adapter_names()))?;
            return Ok(Vec::new());
        }

        let field_re = compile_search(field_pattern)?;
        let names: Vec<String> = adapters
            .iter()
            .flat_map(|a| a.fields())
            .filter(|f| !f.is_all)
            .filter(|f| !self.regex_root_only || f.is_root)
            .filter(|f| field_re.is_match(&f.name_base))
            .map(|f| f.name_qual.clone())
            .collect();
        if names.is_empty() {
            warn!("Regex '{}' matched no fields", field_pattern);
        }
        Ok(names)
    }

    fn adapter(&self, value: Option<&str>) -> Result<Option<&'a AdapterFields>, AssetError> {
        let value = value.unwrap_or(AGG_ADAPTER_NAME);
        match self.catalog.find_adapter(value) {
            Some(adapter) => Ok(Some(adapter)),
            None => {
                self.not_found(NotFoundError::adapter(value, self.catalog.adapter_names()))?;
                Ok(None)
            }
        }
    }

    fn not_found(&self, err: NotFoundError) -> Result<(), AssetError> {
        match self.mode {
            ResolveMode::Strict => Err(err.into()),
            ResolveMode::Lenient => {
                warn!("Skipping unknown {} '{}'", err.kind, err.value);
                Ok(())
            }
        }
    }

    /// Schemas for resolved names; names outside the catalog get a simple
    /// custom schema.
    pub fn schemas(&self, names: &[String]) -> Vec<FieldSchema> {
        names
            .iter()
            .map(|name| {
                self.catalog
                    .find_qual(name)
                    .cloned()
                    .unwrap_or_else(|| FieldSchema::custom(name))
            })
            .collect()
    }
}

/// Case-insensitive match on name, base name, qualified name or title.
fn find_field<'c>(adapter: &'c AdapterFields, value: &str) -> Option<&'c FieldSchema> {
    let search = value.trim().to_lowercase();
    adapter.fields().iter().find(|schema| {
        schema
            .match_keys()
            .iter()
            .any(|key| key.to_lowercase() == search)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::FieldSchemaImporter;
    use serde_json::json;

    fn catalog() -> Catalog {
        FieldSchemaImporter::new()
            .parse(&json!({
                "generic": [
                    {"name": "specific_data.data.hostname", "title": "Host Name", "type": "string"},
                    {"name": "specific_data.data.hostname_preferred", "title": "Preferred Host Name", "type": "string"},
                    {"name": "specific_data.data.id", "title": "ID", "type": "string"}
                ],
                "specific": {
                    "aws_adapter": [
                        {"name": "adapters_data.aws_adapter.id", "title": "ID", "type": "string"},
                        {"name": "adapters_data.aws_adapter.region", "title": "Region", "type": "string"}
                    ]
                }
            }))
            .unwrap()
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            FieldSpec::parse("specific_data.data.hostname").unwrap(),
            FieldSpec::Qualified("specific_data.data.hostname".into())
        );
        assert_eq!(
            FieldSpec::parse("aws:id, region").unwrap(),
            FieldSpec::Scoped {
                adapter: Some("aws".into()),
                fields: vec!["id".into(), "region".into()]
            }
        );
        assert_eq!(
            FieldSpec::parse("*").unwrap(),
            FieldSpec::All { adapter: None }
        );
        assert_eq!(
            FieldSpec::parse("aws:ALL").unwrap(),
            FieldSpec::All {
                adapter: Some("aws".into())
            }
        );
        assert_eq!(
            FieldSpec::parse("~raw.name").unwrap(),
            FieldSpec::Manual("raw.name".into())
        );
        assert_eq!(
            FieldSpec::parse("re:aws:^i").unwrap(),
            FieldSpec::Regex {
                adapter_pattern: Some("aws".into()),
                field_pattern: "^i".into()
            }
        );
        assert!(FieldSpec::parse("aws:").is_err());
        assert!(FieldSpec::parse("~").is_err());
    }

    #[test]
    fn test_resolve_dedups_across_forms() {
        let catalog = catalog();
        let resolver = QualifiedFieldResolver::new(&catalog);
        let names = resolver
            .resolve_strs(&[
                "hostname",
                "specific_data.data.hostname",
                "generic:Host Name",
                "aws_adapter:id",
            ])
            .unwrap();
        assert_eq!(
            names,
            vec!["specific_data.data.hostname", "adapters_data.aws_adapter.id"]
        );
    }

    #[test]
    fn test_resolve_all_and_manual() {
        let catalog = catalog();
        let resolver = QualifiedFieldResolver::new(&catalog);
        let names = resolver.resolve_strs(&["all", "aws:*", "~x.y"]).unwrap();
        assert_eq!(
            names,
            vec!["specific_data", "adapters_data.aws_adapter", "x.y"]
        );
    }

    #[test]
    fn test_resolve_regex_skips_all_entry() {
        let catalog = catalog();
        let resolver = QualifiedFieldResolver::new(&catalog);
        let names = resolver.resolve_strs(&["re:^host", "re:.*:^id$"]).unwrap();
        assert_eq!(
            names,
            vec![
                "specific_data.data.hostname",
                "specific_data.data.hostname_preferred",
                "specific_data.data.id",
                "adapters_data.aws_adapter.id"
            ]
        );
        let names = resolver.resolve_strs(&["re:aws:."]).unwrap();
        assert!(!names.contains(&"adapters_data.aws_adapter".to_string()));
    }

    #[test]
    fn test_strict_unknown_field_lists_valid_names() {
        let catalog = catalog();
        let resolver = QualifiedFieldResolver::new(&catalog);
        let err = resolver.resolve_strs(&["aws:nope"]).unwrap_err();
        match err {
            AssetError::NotFound(e) => {
                assert_eq!(e.value, "nope");
                assert!(e.valid.contains(&"region".to_string()));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_strict_unknown_adapter() {
        let catalog = catalog();
        let resolver = QualifiedFieldResolver::new(&catalog);
        let err = resolver.resolve_strs(&["gcp:id"]).unwrap_err();
        assert!(matches!(err, AssetError::NotFound(ref e) if e.valid == vec!["agg", "aws"]));
    }

    #[test]
    fn test_lenient_omits_unknown() {
        let catalog = catalog();
        let resolver = QualifiedFieldResolver::new(&catalog).with_mode(ResolveMode::Lenient);
        let names = resolver
            .resolve_strs(&["nope,hostname", "gcp:id", "specific_data.data.missing"])
            .unwrap();
        assert_eq!(names, vec!["specific_data.data.hostname"]);
    }

    #[test]
    fn test_schemas_fall_back_to_custom() {
        let catalog = catalog();
        let resolver = QualifiedFieldResolver::new(&catalog);
        let schemas = resolver.schemas(&["specific_data.data.id".into(), "x.y".into()]);
        assert_eq!(schemas[0].title, "ID");
        assert!(schemas[1].is_custom);
    }
}
