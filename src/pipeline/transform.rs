//! Schema driven row transformations
//!
//! Pure functions shared by the per-row stages and the CSV export stage,
//! which applies them internally.

use crate::models::{FieldSchema, Row, display_value, listify};
use crate::validation::ExcludeSet;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Root, non-excluded sub-fields of a complex schema.
pub fn visible_sub_fields<'a>(
    schema: &'a FieldSchema,
    excludes: &'a ExcludeSet,
) -> impl Iterator<Item = &'a FieldSchema> {
    schema
        .root_sub_fields()
        .filter(move |sub| !excludes.is_excluded(sub))
}

fn empty_value(schema: &FieldSchema, null_value: &Value) -> Value {
    if schema.is_complex {
        Value::Array(Vec::new())
    } else {
        null_value.clone()
    }
}

/// Make sure every selected, non-excluded field has an entry.
///
/// Simple fields get `null_value`; complex fields get an empty list and
/// each of their items is filled recursively. A complex field that has
/// already been flattened (parent key gone, sub-field keys present) has its
/// top-level sub-field keys filled instead.
pub fn null_fill(row: &mut Row, schemas: &[FieldSchema], excludes: &ExcludeSet, null_value: &Value) {
    for schema in schemas {
        if excludes.is_excluded(schema) {
            continue;
        }
        if !schema.is_complex {
            row.entry(schema.name_qual.clone())
                .or_insert_with(|| null_value.clone());
            continue;
        }
        match row.get_mut(&schema.name_qual) {
            Some(value) => {
                let mut items = listify(value.take());
                for item in items.iter_mut() {
                    if let Value::Object(item) = item {
                        null_fill_item(item, schema, excludes, null_value);
                    }
                }
                *value = Value::Array(items);
            }
            None => {
                let flattened = visible_sub_fields(schema, excludes)
                    .any(|sub| row.contains_key(&sub.name_qual));
                if flattened {
                    for sub in visible_sub_fields(schema, excludes) {
                        row.entry(sub.name_qual.clone())
                            .or_insert_with(|| empty_value(sub, null_value));
                    }
                } else {
                    row.insert(schema.name_qual.clone(), Value::Array(Vec::new()));
                }
            }
        }
    }
}

fn null_fill_item(
    item: &mut Map<String, Value>,
    schema: &FieldSchema,
    excludes: &ExcludeSet,
    null_value: &Value,
) {
    for sub in visible_sub_fields(schema, excludes) {
        if !sub.is_complex {
            item.entry(sub.name.clone())
                .or_insert_with(|| null_value.clone());
            continue;
        }
        let value = item
            .entry(sub.name.clone())
            .or_insert_with(|| Value::Array(Vec::new()));
        let mut nested = listify(value.take());
        for entry in nested.iter_mut() {
            if let Value::Object(entry) = entry {
                null_fill_item(entry, sub, excludes, null_value);
            }
        }
        *value = Value::Array(nested);
    }
}

/// Remove excluded keys, and excluded sub-fields from complex items.
///
/// `lookup` maps a row key to its schema; keys without a schema are
/// matched against the patterns directly.
pub fn exclude_fields(
    row: &mut Row,
    lookup: &HashMap<String, FieldSchema>,
    excludes: &ExcludeSet,
) {
    if excludes.is_empty() {
        return;
    }
    row.retain(|key, value| match lookup.get(key) {
        Some(schema) if excludes.is_excluded(schema) => false,
        Some(schema) => {
            if schema.is_complex {
                exclude_sub_fields(value, schema, excludes);
            }
            true
        }
        None => !excludes.matches(key),
    });
}

fn exclude_sub_fields(value: &mut Value, schema: &FieldSchema, excludes: &ExcludeSet) {
    let Value::Array(items) = value else {
        return;
    };
    for item in items.iter_mut() {
        if let Value::Object(item) = item {
            for sub in &schema.sub_fields {
                if excludes.is_excluded(sub) {
                    item.shift_remove(&sub.name);
                } else if sub.is_complex
                    && let Some(nested) = item.get_mut(&sub.name)
                {
                    exclude_sub_fields(nested, sub, excludes);
                }
            }
        }
    }
}

/// Replace a complex field by one key per visible root sub-field.
///
/// Each new value concatenates the sub-field across all items, extending
/// list values and padding missing ones with `null_value` so that every
/// sub-field list has one entry per item. Returns the keys that already
/// existed and were overwritten.
pub fn flatten_field(
    row: &mut Row,
    schema: &FieldSchema,
    excludes: &ExcludeSet,
    null_value: &Value,
) -> Vec<String> {
    let Some(value) = row.shift_remove(&schema.name_qual) else {
        return Vec::new();
    };
    let items = listify(value);
    let mut collisions = Vec::new();
    for sub in visible_sub_fields(schema, excludes) {
        let mut values: Vec<Value> = Vec::with_capacity(items.len());
        for item in &items {
            let found = item
                .as_object()
                .and_then(|o| o.get(&sub.name))
                .cloned()
                .unwrap_or_else(|| null_value.clone());
            match found {
                Value::Array(list) => values.extend(list),
                other => values.push(other),
            }
        }
        if row.insert(sub.name_qual.clone(), Value::Array(values)).is_some() {
            collisions.push(sub.name_qual.clone());
        }
    }
    collisions
}

/// Split a row into one row per item of `schema`'s value.
///
/// With more than one item every output row is a deep copy of the input
/// holding only its own item: complex fields set each visible root
/// sub-field key to the item's value (or `null_value`), simple fields set
/// the field itself to the item. With zero or one item the row is kept
/// whole and a complex field is flattened in place.
pub fn explode(
    mut row: Row,
    schema: &FieldSchema,
    excludes: &ExcludeSet,
    null_value: &Value,
) -> Vec<Row> {
    if excludes.is_excluded(schema) {
        return vec![row];
    }
    let count = match row.get(&schema.name_qual) {
        None => return vec![row],
        Some(Value::Array(items)) => items.len(),
        Some(Value::Null) => 0,
        Some(_) => 1,
    };
    if count <= 1 {
        if schema.is_complex {
            flatten_field(&mut row, schema, excludes, null_value);
        }
        return vec![row];
    }

    let items = listify(row.shift_remove(&schema.name_qual).unwrap_or(Value::Null));
    items
        .into_iter()
        .map(|item| {
            let mut copy = row.clone();
            if schema.is_complex {
                for sub in visible_sub_fields(schema, excludes) {
                    let value = item
                        .as_object()
                        .and_then(|o| o.get(&sub.name))
                        .cloned()
                        .unwrap_or_else(|| null_value.clone());
                    copy.insert(sub.name_qual.clone(), value);
                }
            } else {
                copy.insert(schema.name_qual.clone(), item);
            }
            copy
        })
        .collect()
}

/// Trim marker appended to shortened values.
pub fn trim_marker(elided: usize, trim: usize) -> String {
    format!("...TRIMMED - {} characters over {}", elided, trim)
}

/// Shorten `text` so that kept content, joiner and marker fit in `trim`
/// characters. A `trim` of 0 disables trimming.
pub fn trim_text(text: &str, joiner: &str, trim: usize) -> String {
    let len = text.chars().count();
    if trim == 0 || len <= trim {
        return text.to_string();
    }
    let joiner_len = joiner.chars().count();
    let mut elided = len - trim;
    for _ in 0..4 {
        let overhead = joiner_len + trim_marker(elided, trim).chars().count();
        if overhead > trim {
            return text.chars().take(trim).collect();
        }
        let keep = trim - overhead;
        if len - keep == elided {
            break;
        }
        elided = len - keep;
    }
    let marker = trim_marker(elided, trim);
    let overhead = joiner_len + marker.chars().count();
    if overhead > trim {
        return text.chars().take(trim).collect();
    }
    let keep = trim - overhead;
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(joiner);
    out.push_str(&trim_marker(len - keep, trim));
    if out.chars().count() > trim {
        return text.chars().take(trim).collect();
    }
    out
}

/// Join one value for display.
pub fn join_value(value: Value, joiner: &str, trim: usize) -> Value {
    match value {
        Value::Array(items) => {
            let joined = items.iter().map(display_value).collect::<Vec<_>>().join(joiner);
            Value::String(trim_text(&joined, joiner, trim))
        }
        Value::String(text) => Value::String(trim_text(&text, joiner, trim)),
        other => other,
    }
}

/// Join every list value of the row and trim long strings.
pub fn join_values(row: &mut Row, joiner: &str, trim: usize) {
    for value in row.values_mut() {
        *value = join_value(value.take(), joiner, trim);
    }
}

/// Rename known keys to their column titles.
///
/// Complex fields still holding null become an empty list. When two keys
/// end up under the same title the later value wins; the returned titles
/// are the ones that were overwritten.
pub fn rename_titles(row: Row, lookup: &HashMap<String, FieldSchema>) -> (Row, Vec<String>) {
    let mut renamed = Row::new();
    let mut collisions = Vec::new();
    for (key, value) in row {
        let (key, value) = match lookup.get(&key) {
            Some(schema) => {
                let value = if schema.is_complex && value.is_null() {
                    Value::Array(Vec::new())
                } else {
                    value
                };
                (schema.column_title.clone(), value)
            }
            None => (key, value),
        };
        if renamed.insert(key.clone(), value).is_some() {
            collisions.push(key);
        }
    }
    (renamed, collisions)
}

/// Columns the transformed rows will carry, in order.
///
/// Complex fields are replaced by their visible root sub-fields when
/// flattening or when they are the explode target.
pub fn final_schemas(
    schemas: &[FieldSchema],
    excludes: &ExcludeSet,
    explode: Option<&FieldSchema>,
    flatten: bool,
    reports: &[FieldSchema],
) -> Vec<FieldSchema> {
    let mut out: Vec<FieldSchema> = Vec::new();
    let mut push = |schema: &FieldSchema, replace: bool| {
        match out.iter().position(|s| s.name_qual == schema.name_qual) {
            Some(idx) if replace => out[idx] = schema.clone(),
            Some(_) => {}
            None => out.push(schema.clone()),
        }
    };
    for schema in schemas.iter().filter(|s| !excludes.is_excluded(s)) {
        let is_target = explode.is_some_and(|e| e.name_qual == schema.name_qual);
        if schema.is_complex && (flatten || is_target) {
            for sub in visible_sub_fields(schema, excludes) {
                push(sub, true);
            }
        } else {
            push(schema, false);
        }
    }
    for report in reports {
        push(report, false);
    }
    out
}

/// Schema lookup by row key: every schema, its nested sub-fields and the
/// report schemas.
pub fn schema_lookup(schemas: &[FieldSchema], reports: &[FieldSchema]) -> HashMap<String, FieldSchema> {
    fn add(map: &mut HashMap<String, FieldSchema>, schema: &FieldSchema) {
        map.entry(schema.name_qual.clone())
            .or_insert_with(|| schema.clone());
        for sub in &schema.sub_fields {
            add(map, sub);
        }
    }
    let mut map = HashMap::new();
    for schema in schemas.iter().chain(reports) {
        add(&mut map, schema);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::FieldSchemaImporter;
    use serde_json::json;

    fn nic_schema() -> FieldSchema {
        let catalog = FieldSchemaImporter::new()
            .parse(&json!({
                "generic": [{
                    "name": "specific_data.data.network_interfaces",
                    "title": "Network Interfaces",
                    "type": "array",
                    "items": {"type": "array", "items": [
                        {"name": "ips", "title": "IPs", "type": "array", "items": {"type": "string"}},
                        {"name": "mac", "title": "MAC", "type": "string"}
                    ]}
                }],
                "specific": {}
            }))
            .unwrap();
        catalog
            .find_qual("specific_data.data.network_interfaces")
            .cloned()
            .unwrap()
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    const IPS: &str = "specific_data.data.network_interfaces.ips";
    const MAC: &str = "specific_data.data.network_interfaces.mac";
    const NIC: &str = "specific_data.data.network_interfaces";

    #[test]
    fn test_flatten_pads_missing_values() {
        let schema = nic_schema();
        let mut r = row(json!({NIC: [{"ips": ["1.1.1.1"]}, {"ips": ["2.2.2.2"], "mac": "aa"}]}));
        let collisions = flatten_field(&mut r, &schema, &ExcludeSet::default(), &Value::Null);
        assert!(collisions.is_empty());
        assert!(!r.contains_key(NIC));
        assert_eq!(r[IPS], json!(["1.1.1.1", "2.2.2.2"]));
        assert_eq!(r[MAC], json!([null, "aa"]));
    }

    #[test]
    fn test_flatten_reports_collision_and_overwrites() {
        let schema = nic_schema();
        let mut r = row(json!({MAC: "old", NIC: [{"mac": "new"}]}));
        let collisions = flatten_field(&mut r, &schema, &ExcludeSet::default(), &Value::Null);
        assert_eq!(collisions, vec![MAC.to_string()]);
        assert_eq!(r[MAC], json!(["new"]));
    }

    #[test]
    fn test_explode_complex_fans_out() {
        let schema = nic_schema();
        let r = row(json!({"id": 1, NIC: [{"mac": "a"}, {"mac": "b"}, {}]}));
        let rows = explode(r, &schema, &ExcludeSet::default(), &Value::Null);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][MAC], json!("a"));
        assert_eq!(rows[2][MAC], json!(null));
        assert!(rows.iter().all(|r| r["id"] == json!(1) && !r.contains_key(NIC)));
    }

    #[test]
    fn test_explode_single_item_flattens() {
        let schema = nic_schema();
        let r = row(json!({NIC: [{"mac": "a"}]}));
        let rows = explode(r, &schema, &ExcludeSet::default(), &Value::Null);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][MAC], json!(["a"]));

        let rows = explode(row(json!({NIC: []})), &schema, &ExcludeSet::default(), &Value::Null);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_explode_simple_field() {
        let schema = FieldSchema::custom("tags");
        let rows = explode(
            row(json!({"tags": ["x", "y"]})),
            &schema,
            &ExcludeSet::default(),
            &Value::Null,
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["tags"], json!("y"));
    }

    #[test]
    fn test_null_fill_complex_and_flattened() {
        let schema = nic_schema();
        let host = FieldSchema::custom("host");
        let schemas = vec![host, schema.clone()];
        let excludes = ExcludeSet::default();

        let mut r = row(json!({NIC: [{"ips": ["1"]}]}));
        null_fill(&mut r, &schemas, &excludes, &json!("-"));
        assert_eq!(r["host"], json!("-"));
        assert_eq!(r[NIC], json!([{"ips": ["1"], "mac": "-"}]));

        let mut r = row(json!({IPS: ["1"]}));
        null_fill(&mut r, &schemas, &excludes, &Value::Null);
        assert!(!r.contains_key(NIC));
        assert_eq!(r[MAC], json!(null));

        let mut r = Row::new();
        null_fill(&mut r, &schemas, &excludes, &Value::Null);
        assert_eq!(r[NIC], json!([]));
    }

    #[test]
    fn test_exclude_removes_keys_and_sub_fields() {
        let schema = nic_schema();
        let lookup = schema_lookup(&[schema.clone(), FieldSchema::custom("host")], &[]);
        let excludes = ExcludeSet::new(&["MAC".to_string(), "host".to_string()]).unwrap();
        let mut r = row(json!({"host": "h", "other": 1, NIC: [{"ips": [], "mac": "a"}]}));
        exclude_fields(&mut r, &lookup, &excludes);
        assert!(!r.contains_key("host"));
        assert_eq!(r["other"], json!(1));
        assert_eq!(r[NIC], json!([{"ips": []}]));
    }

    #[test]
    fn test_exclude_whole_name_only() {
        let catalog = FieldSchemaImporter::new()
            .parse(&json!({
                "generic": [
                    {"name": "specific_data.data.hostname", "title": "Host Name", "type": "string"},
                    {"name": "specific_data.data.hostname_preferred", "title": "Host Name Preferred", "type": "string"}
                ],
                "specific": {}
            }))
            .unwrap();
        let schemas: Vec<FieldSchema> = catalog.iter().filter(|s| !s.is_all).cloned().collect();
        let lookup = schema_lookup(&schemas, &[]);
        let excludes = ExcludeSet::new(&["specific_data.data.hostname".to_string()]).unwrap();
        let mut r = row(json!({
            "specific_data.data.hostname": "a",
            "specific_data.data.hostname_preferred": "b"
        }));
        exclude_fields(&mut r, &lookup, &excludes);
        assert!(!r.contains_key("specific_data.data.hostname"));
        assert_eq!(r["specific_data.data.hostname_preferred"], json!("b"));
    }

    #[test]
    fn test_join_and_trim() {
        let mut r = row(json!({"a": ["x", null, 1, {"k": true}], "b": "plain", "c": 3}));
        join_values(&mut r, ", ", 0);
        assert_eq!(r["a"], json!(r#"x, , 1, {"k":true}"#));
        assert_eq!(r["b"], json!("plain"));
        assert_eq!(r["c"], json!(3));

        let long = "z".repeat(200);
        let trimmed = trim_text(&long, "\n", 100);
        assert!(trimmed.chars().count() <= 100);
        assert!(trimmed.contains("...TRIMMED - "));
        assert!(trimmed.ends_with("characters over 100"));
        assert_eq!(trim_text(&trimmed, "\n", 100), trimmed);
    }

    #[test]
    fn test_trim_too_small_for_marker_truncates() {
        assert_eq!(trim_text("abcdefghij", "\n", 4), "abcd");
    }

    #[test]
    fn test_rename_titles() {
        let schema = nic_schema();
        let lookup = schema_lookup(&[schema], &[]);
        let (r, collisions) = rename_titles(row(json!({NIC: null, "x": 1})), &lookup);
        assert_eq!(r["Aggregated: Network Interfaces"], json!([]));
        assert_eq!(r["x"], json!(1));
        assert!(collisions.is_empty());
    }

    #[test]
    fn test_rename_titles_reports_collisions() {
        let lookup = schema_lookup(&[nic_schema()], &[]);
        let (r, collisions) = rename_titles(
            row(json!({"Aggregated: Network Interfaces": "old", NIC: [1], "x": 1})),
            &lookup,
        );
        assert_eq!(collisions, vec!["Aggregated: Network Interfaces"]);
        assert_eq!(r.len(), 2);
        assert_eq!(r["Aggregated: Network Interfaces"], json!([1]));
    }

    #[test]
    fn test_final_schemas() {
        let schema = nic_schema();
        let schemas = vec![FieldSchema::custom("host"), schema.clone()];
        let excludes = ExcludeSet::default();

        let names = |f: Vec<FieldSchema>| f.into_iter().map(|s| s.name_qual).collect::<Vec<_>>();
        assert_eq!(
            names(final_schemas(&schemas, &excludes, None, false, &[])),
            vec!["host", NIC]
        );
        assert_eq!(
            names(final_schemas(&schemas, &excludes, Some(&schema), false, &[])),
            vec!["host", IPS, MAC]
        );
        let excludes = ExcludeSet::new(&["mac".to_string()]).unwrap();
        assert_eq!(
            names(final_schemas(&schemas, &excludes, None, true, &[])),
            vec!["host", IPS]
        );
    }
}
