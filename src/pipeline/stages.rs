//! Stage handlers
//!
//! Each per-row handler takes one row and returns zero or more rows. The
//! bookends run once around the stream.

use super::context::StageContext;
use super::transform;
use crate::config::CallbackErrors;
use crate::error::{AssetError, ConfigurationError, RowProcessingError};
use crate::export::ExportError;
use crate::fetch::PipelineState;
use crate::models::{INSTALLED_SOFTWARE_FIELD, Row, listify};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Key holding the asset id used for tagging.
pub const ASSET_ID_FIELD: &str = "internal_axon_id";

/// Key holding the raw names of the adapters that saw the asset.
pub const ADAPTERS_FIELD: &str = "adapters";

// ---------------------------------------------------------------------------
// Per-row stages
// ---------------------------------------------------------------------------

/// Log the query and server totals once.
pub fn first_page(
    ctx: &mut StageContext,
    row: Row,
    state: &PipelineState,
) -> Result<Vec<Row>, AssetError> {
    let total = |v: Option<u64>| v.map(|t| t.to_string()).unwrap_or_else(|| "?".to_string());
    info!(
        "First page: {} rows over {} pages of {}",
        total(state.rows_total),
        total(state.pages_total),
        state.page_size
    );
    info!(
        "Query filter: {}",
        ctx.filter.as_deref().unwrap_or("<none>")
    );
    debug!("Requested {} fields: {:?}", ctx.fields.len(), ctx.fields);
    Ok(vec![row])
}

/// Run the caller's callbacks in registration order.
pub fn custom_cbs(
    ctx: &mut StageContext,
    mut row: Row,
    _state: &PipelineState,
) -> Result<Vec<Row>, AssetError> {
    for (name, callback) in ctx.callbacks.iter_mut() {
        if let Err(source) = callback(&mut row) {
            let err = RowProcessingError {
                callback: name.clone(),
                row,
                source,
            };
            return match ctx.config.callback_errors {
                CallbackErrors::Strict => Err(err.into()),
                CallbackErrors::Lenient => {
                    warn!("Skipping row: {}", err);
                    ctx.failures.push(err);
                    Ok(Vec::new())
                }
            };
        }
    }
    Ok(vec![row])
}

fn asset_id(row: &Row) -> Option<String> {
    match row.get(ASSET_ID_FIELD)? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

pub fn tags_add(
    ctx: &mut StageContext,
    row: Row,
    _state: &PipelineState,
) -> Result<Vec<Row>, AssetError> {
    match asset_id(&row) {
        Some(id) => {
            ctx.tags_add.push(&id);
        }
        None => ctx.warn_once(
            "tags_missing_id",
            "Rows without an asset id cannot be tagged",
        ),
    }
    Ok(vec![row])
}

pub fn tags_remove(
    ctx: &mut StageContext,
    row: Row,
    _state: &PipelineState,
) -> Result<Vec<Row>, AssetError> {
    match asset_id(&row) {
        Some(id) => {
            ctx.tags_remove.push(&id);
        }
        None => ctx.warn_once(
            "tags_missing_id",
            "Rows without an asset id cannot be tagged",
        ),
    }
    Ok(vec![row])
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .cloned()
        .map(listify)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// Add the adapters known to the catalog that did not see this asset.
pub fn report_adapters_missing(
    ctx: &mut StageContext,
    mut row: Row,
    _state: &PipelineState,
) -> Result<Vec<Row>, AssetError> {
    let present = string_list(row.get(ADAPTERS_FIELD));
    let missing: Vec<Value> = ctx
        .adapter_names
        .iter()
        .filter(|name| !present.contains(name))
        .map(|name| Value::String(name.clone()))
        .collect();
    row.insert("adapters_missing".to_string(), Value::Array(missing));
    Ok(vec![row])
}

/// Compare installed software names against the whitelist.
pub fn report_software_whitelist(
    ctx: &mut StageContext,
    mut row: Row,
    _state: &PipelineState,
) -> Result<Vec<Row>, AssetError> {
    let installed: Vec<String> = row
        .get(INSTALLED_SOFTWARE_FIELD)
        .cloned()
        .map(listify)
        .unwrap_or_default()
        .iter()
        .filter_map(|item| item.get("name").and_then(Value::as_str))
        .map(str::to_string)
        .collect();

    let missing: Vec<Value> = ctx
        .config
        .report_software_whitelist
        .iter()
        .zip(&ctx.whitelist)
        .filter(|(_, re)| !installed.iter().any(|name| re.is_match(name)))
        .map(|(entry, _)| Value::String(entry.clone()))
        .collect();
    let extra: Vec<Value> = installed
        .iter()
        .filter(|name| !ctx.whitelist.iter().any(|re| re.is_match(name)))
        .map(|name| Value::String(name.clone()))
        .collect();
    let whitelist: Vec<Value> = ctx
        .config
        .report_software_whitelist
        .iter()
        .map(|e| Value::String(e.clone()))
        .collect();

    row.insert("software_missing".to_string(), Value::Array(missing));
    row.insert("software_extra".to_string(), Value::Array(extra));
    row.insert("software_whitelist".to_string(), Value::Array(whitelist));
    Ok(vec![row])
}

pub fn field_excludes(
    ctx: &mut StageContext,
    mut row: Row,
    _state: &PipelineState,
) -> Result<Vec<Row>, AssetError> {
    transform::exclude_fields(&mut row, &ctx.lookup, &ctx.excludes);
    Ok(vec![row])
}

pub fn field_null(
    ctx: &mut StageContext,
    mut row: Row,
    _state: &PipelineState,
) -> Result<Vec<Row>, AssetError> {
    ctx.null_fill(&mut row);
    Ok(vec![row])
}

pub fn field_flatten(
    ctx: &mut StageContext,
    mut row: Row,
    _state: &PipelineState,
) -> Result<Vec<Row>, AssetError> {
    ctx.flatten(&mut row);
    Ok(vec![row])
}

pub fn field_explode(
    ctx: &mut StageContext,
    row: Row,
    state: &PipelineState,
) -> Result<Vec<Row>, AssetError> {
    let mut rows = ctx.explode(row);
    StageContext::cap(&mut rows, state);
    Ok(rows)
}

pub fn field_join(
    ctx: &mut StageContext,
    mut row: Row,
    _state: &PipelineState,
) -> Result<Vec<Row>, AssetError> {
    ctx.join(&mut row);
    Ok(vec![row])
}

pub fn field_titles(
    ctx: &mut StageContext,
    row: Row,
    _state: &PipelineState,
) -> Result<Vec<Row>, AssetError> {
    Ok(vec![ctx.rename_titles(row)])
}

fn sink_not_open() -> AssetError {
    ExportError::NotOpen("no sink configured".to_string()).into()
}

pub fn export_json(
    ctx: &mut StageContext,
    row: Row,
    _state: &PipelineState,
) -> Result<Vec<Row>, AssetError> {
    let sink = ctx.sink.as_mut().ok_or_else(sink_not_open)?;
    sink.write(&row)?;
    Ok(vec![row])
}

/// Shape rows into flat, joined CSV records and write them.
pub fn export_csv(
    ctx: &mut StageContext,
    mut row: Row,
    state: &PipelineState,
) -> Result<Vec<Row>, AssetError> {
    ctx.null_fill(&mut row);
    ctx.flatten(&mut row);
    let mut rows = ctx.explode(row);
    StageContext::cap(&mut rows, state);

    let mut out = Vec::with_capacity(rows.len());
    for mut row in rows {
        ctx.join(&mut row);
        let row = if ctx.titles {
            ctx.rename_titles(row)
        } else {
            row
        };
        let sink = ctx.sink.as_mut().ok_or_else(sink_not_open)?;
        sink.write(&row)?;
        out.push(row);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Bookends
// ---------------------------------------------------------------------------

/// Write both tag batches with the tag writer.
pub fn tags_flush(ctx: &mut StageContext, _state: &PipelineState) -> Result<(), AssetError> {
    if ctx.tags_add.is_ready() {
        let ids = ctx.tags_add.drain();
        let writer = ctx
            .tag_writer
            .as_mut()
            .ok_or(ConfigurationError::MissingTagWriter)?;
        let count = writer.add_tags(&ids, ctx.tags_add.tags())?;
        info!("Added tags {:?} to {} assets", ctx.tags_add.tags(), count);
        ctx.tags_added += count;
    }
    if ctx.tags_remove.is_ready() {
        let ids = ctx.tags_remove.drain();
        let writer = ctx
            .tag_writer
            .as_mut()
            .ok_or(ConfigurationError::MissingTagWriter)?;
        let count = writer.remove_tags(&ids, ctx.tags_remove.tags())?;
        info!("Removed tags {:?} from {} assets", ctx.tags_remove.tags(), count);
        ctx.tags_removed += count;
    }
    Ok(())
}

/// Open the sink and write its header.
pub fn export_start(ctx: &mut StageContext, _state: &PipelineState) -> Result<(), AssetError> {
    let sink = ctx.sink.as_mut().ok_or_else(sink_not_open)?;
    sink.start(&ctx.final_schemas)?;
    Ok(())
}

pub fn export_stop(ctx: &mut StageContext, state: &PipelineState) -> Result<(), AssetError> {
    let sink = ctx.sink.as_mut().ok_or_else(sink_not_open)?;
    sink.stop()?;
    debug!("Export closed after {} rows", state.rows_processed);
    Ok(())
}
