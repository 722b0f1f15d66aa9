//! Normalized type tags
//!
//! Maps the wire 4-tuple `(type, format, items.type, items.format)` onto a
//! single normalized tag. Missing parts are matched as empty strings.

use crate::models::UNKNOWN_TYPE_NORM;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use tracing::warn;

type TypeKey = (&'static str, &'static str, &'static str, &'static str);

static NORM_TYPE_MAP: Lazy<HashMap<TypeKey, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (("string", "", "", ""), "string"),
        (("string", "date-time", "", ""), "string_datetime"),
        (("string", "image", "", ""), "string_image"),
        (("string", "version", "", ""), "string_version"),
        (("string", "ip", "", ""), "string_ipaddress"),
        (("string", "password", "", ""), "string_password"),
        (("bool", "", "", ""), "bool"),
        (("boolean", "", "", ""), "bool"),
        (("integer", "", "", ""), "integer"),
        (("number", "", "", ""), "number"),
        (("array", "table", "array", ""), "complex_table"),
        (("array", "", "array", ""), "complex"),
        (("array", "", "integer", ""), "list_integer"),
        (("array", "", "number", ""), "list_number"),
        (("array", "", "bool", ""), "list_bool"),
        (("array", "", "string", ""), "list_string"),
        (("array", "", "string", "tag"), "list_string"),
        (("array", "version", "string", "version"), "list_string_version"),
        (("array", "date-time", "string", "date-time"), "list_string_datetime"),
        (("array", "subnet", "string", "subnet"), "list_string_subnet"),
        (("array", "discrete", "string", "logo"), "list_string"),
        (("array", "", "string", "ip"), "list_string_ipaddress"),
    ])
});

/// Look up the normalized type for a wire type tuple.
///
/// Unmapped tuples are legal: they log a warning and yield `unknown`.
pub fn normalize(
    field_type: &str,
    format: Option<&str>,
    items_type: Option<&str>,
    items_format: Option<&str>,
    name_qual: &str,
) -> String {
    let format = format.unwrap_or("");
    let items_type = items_type.unwrap_or("");
    let items_format = items_format.unwrap_or("");
    match NORM_TYPE_MAP.get(&(field_type, format, items_type, items_format)) {
        Some(norm) => norm.to_string(),
        None => {
            warn!(
                "Unmapped field type ({}, {}, {}, {}) for '{}', using '{}'",
                field_type, format, items_type, items_format, name_qual, UNKNOWN_TYPE_NORM
            );
            UNKNOWN_TYPE_NORM.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_types() {
        assert_eq!(normalize("string", None, None, None, "x"), "string");
        assert_eq!(
            normalize("string", Some("date-time"), None, None, "x"),
            "string_datetime"
        );
        assert_eq!(normalize("integer", None, None, None, "x"), "integer");
    }

    #[test]
    fn test_list_and_complex_types() {
        assert_eq!(
            normalize("array", None, Some("string"), None, "x"),
            "list_string"
        );
        assert_eq!(normalize("array", None, Some("array"), None, "x"), "complex");
        assert_eq!(
            normalize("array", Some("table"), Some("array"), None, "x"),
            "complex_table"
        );
        assert_eq!(
            normalize("array", None, Some("string"), Some("ip"), "x"),
            "list_string_ipaddress"
        );
    }

    #[test]
    fn test_unmapped_tuple_is_unknown() {
        assert_eq!(
            normalize("string", Some("weird"), None, None, "x"),
            UNKNOWN_TYPE_NORM
        );
        assert_eq!(normalize("object", None, None, None, "x"), UNKNOWN_TYPE_NORM);
    }
}
