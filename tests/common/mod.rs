//! Shared fixtures for the integration tests

#![allow(dead_code)]

use asset_pipeline_sdk::models::Row;
use serde_json::{Value, json};

pub const HOSTNAME: &str = "specific_data.data.hostname";
pub const NIC: &str = "specific_data.data.network_interfaces";
pub const NIC_IPS: &str = "specific_data.data.network_interfaces.ips";
pub const NIC_MAC: &str = "specific_data.data.network_interfaces.mac";
pub const SOFTWARE: &str = "specific_data.data.installed_software";

/// Field metadata as served for the device asset type.
pub fn field_schemas() -> Value {
    json!({
        "generic": [
            {"name": "specific_data.data.hostname", "title": "Host Name", "type": "string"},
            {"name": "specific_data.data.last_seen", "title": "Last Seen", "type": "string", "format": "date-time"},
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
                "name": "specific_data.data.installed_software",
                "title": "Installed Software",
                "type": "array",
                "items": {"type": "array", "items": [
                    {"name": "name", "title": "Software Name", "type": "string"},
                    {"name": "version", "title": "Software Version", "type": "string"}
                ]}
            }
        ],
        "specific": {
            "aws_adapter": [
                {"name": "adapters_data.aws_adapter.region", "title": "Region", "type": "string"},
                {"name": "adapters_data.aws_adapter.id", "title": "ID", "type": "string"}
            ],
            "crowd_strike_adapter": [
                {"name": "adapters_data.crowd_strike_adapter.hostname", "title": "Host Name", "type": "string"}
            ]
        }
    })
}

/// An asset row with two interfaces, the second one carrying a MAC.
pub fn asset(id: &str) -> Value {
    json!({
        "internal_axon_id": id,
        "adapters": ["aws_adapter"],
        "adapter_list_length": 1,
        HOSTNAME: format!("host-{}", id),
        NIC: [
            {"ips": ["1.1.1.1"]},
            {"ips": ["2.2.2.2"], "mac": "aa"}
        ]
    })
}

pub fn assets(n: usize) -> Vec<Value> {
    (0..n).map(|i| asset(&i.to_string())).collect()
}

pub fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap_or_default()
}

/// Parse CSV output, dropping the byte order mark.
pub fn csv_records(text: &str) -> Vec<Vec<String>> {
    let text = text.trim_start_matches('\u{feff}');
    csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(text.as_bytes())
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect()
}
