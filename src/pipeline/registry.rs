//! Stage registry
//!
//! Every stage the pipeline knows about, with its ordering index and
//! relations to other stages. A pipeline resolves its schedule from this
//! table once, at construction.

use super::context::StageContext;
use super::stages;
use crate::error::{AssetError, ConfigurationError};
use crate::fetch::PipelineState;
use crate::models::Row;

/// Per-row stage entry point.
pub type StageHandler = fn(&mut StageContext, Row, &PipelineState) -> Result<Vec<Row>, AssetError>;

/// Start or stop bookend entry point.
pub type BookendHandler = fn(&mut StageContext, &PipelineState) -> Result<(), AssetError>;

/// A registered stage.
pub struct StageDescriptor {
    pub name: &'static str,
    /// Position in the per-row schedule, lowest first
    pub order: u32,
    /// Only handle the first row
    pub run_once: bool,
    /// Stages that may not be selected together with this one
    pub conflicts: &'static [&'static str],
    /// Stages this one applies internally; they leave the schedule
    pub runs: &'static [&'static str],
    pub start: Option<&'static str>,
    pub stop: Option<&'static str>,
    pub handler: StageHandler,
}

/// A registered bookend.
pub struct BookendDescriptor {
    pub name: &'static str,
    pub handler: BookendHandler,
}

const CSV_RUNS: &[&str] = &[
    "field_null",
    "field_flatten",
    "field_explode",
    "field_join",
    "field_titles",
];

pub static STAGES: &[StageDescriptor] = &[
    StageDescriptor {
        name: "first_page",
        order: 100,
        run_once: true,
        conflicts: &[],
        runs: &[],
        start: None,
        stop: None,
        handler: stages::first_page,
    },
    StageDescriptor {
        name: "custom_cbs",
        order: 200,
        run_once: false,
        conflicts: &[],
        runs: &[],
        start: None,
        stop: None,
        handler: stages::custom_cbs,
    },
    StageDescriptor {
        name: "tags_add",
        order: 300,
        run_once: false,
        conflicts: &[],
        runs: &[],
        start: None,
        stop: Some("tags_flush"),
        handler: stages::tags_add,
    },
    StageDescriptor {
        name: "tags_remove",
        order: 310,
        run_once: false,
        conflicts: &[],
        runs: &[],
        start: None,
        stop: Some("tags_flush"),
        handler: stages::tags_remove,
    },
    StageDescriptor {
        name: "report_adapters_missing",
        order: 400,
        run_once: false,
        conflicts: &[],
        runs: &[],
        start: None,
        stop: None,
        handler: stages::report_adapters_missing,
    },
    StageDescriptor {
        name: "report_software_whitelist",
        order: 410,
        run_once: false,
        conflicts: &[],
        runs: &[],
        start: None,
        stop: None,
        handler: stages::report_software_whitelist,
    },
    StageDescriptor {
        name: "field_excludes",
        order: 500,
        run_once: false,
        conflicts: &[],
        runs: &[],
        start: None,
        stop: None,
        handler: stages::field_excludes,
    },
    StageDescriptor {
        name: "field_null",
        order: 600,
        run_once: false,
        conflicts: &[],
        runs: &[],
        start: None,
        stop: None,
        handler: stages::field_null,
    },
    StageDescriptor {
        name: "field_flatten",
        order: 700,
        run_once: false,
        conflicts: &[],
        runs: &[],
        start: None,
        stop: None,
        handler: stages::field_flatten,
    },
    StageDescriptor {
        name: "field_explode",
        order: 800,
        run_once: false,
        conflicts: &[],
        runs: &[],
        start: None,
        stop: None,
        handler: stages::field_explode,
    },
    StageDescriptor {
        name: "field_join",
        order: 900,
        run_once: false,
        conflicts: &[],
        runs: &[],
        start: None,
        stop: None,
        handler: stages::field_join,
    },
    StageDescriptor {
        name: "field_titles",
        order: 1000,
        run_once: false,
        conflicts: &[],
        runs: &[],
        start: None,
        stop: None,
        handler: stages::field_titles,
    },
    StageDescriptor {
        name: "export_json",
        order: 10000,
        run_once: false,
        conflicts: &["export_csv"],
        runs: &[],
        start: Some("export_json_start"),
        stop: Some("export_json_stop"),
        handler: stages::export_json,
    },
    StageDescriptor {
        name: "export_csv",
        order: 10000,
        run_once: false,
        conflicts: &["export_json"],
        runs: CSV_RUNS,
        start: Some("export_csv_start"),
        stop: Some("export_csv_stop"),
        handler: stages::export_csv,
    },
];

pub static BOOKENDS: &[BookendDescriptor] = &[
    BookendDescriptor {
        name: "tags_flush",
        handler: stages::tags_flush,
    },
    BookendDescriptor {
        name: "export_json_start",
        handler: stages::export_start,
    },
    BookendDescriptor {
        name: "export_json_stop",
        handler: stages::export_stop,
    },
    BookendDescriptor {
        name: "export_csv_start",
        handler: stages::export_start,
    },
    BookendDescriptor {
        name: "export_csv_stop",
        handler: stages::export_stop,
    },
];

pub fn lookup(name: &str) -> Option<&'static StageDescriptor> {
    STAGES.iter().find(|s| s.name == name)
}

fn lookup_bookend(name: &str) -> Option<&'static BookendDescriptor> {
    BOOKENDS.iter().find(|b| b.name == name)
}

pub fn stage_names() -> Vec<&'static str> {
    STAGES.iter().map(|s| s.name).collect()
}

/// The resolved stage plan of one pipeline.
#[derive(Default)]
pub struct Schedule {
    /// Every selected stage, in registry order
    pub selected: Vec<&'static StageDescriptor>,
    /// Per-row stages, sorted by order, subsumed stages removed
    pub stages: Vec<&'static StageDescriptor>,
    /// Deduplicated start bookends
    pub starts: Vec<&'static BookendDescriptor>,
    /// Deduplicated stop bookends
    pub stops: Vec<&'static BookendDescriptor>,
}

impl Schedule {
    /// Resolve selected stage names into a schedule.
    ///
    /// Unknown names and conflicting selections fail here, before any row
    /// is fetched.
    pub fn resolve<S: AsRef<str>>(names: &[S]) -> Result<Self, ConfigurationError> {
        let mut selected: Vec<&'static StageDescriptor> = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            let stage = lookup(name).ok_or_else(|| ConfigurationError::UnknownStage {
                name: name.to_string(),
                valid: stage_names().join(", "),
            })?;
            if !selected.iter().any(|s| s.name == stage.name) {
                selected.push(stage);
            }
        }
        selected.sort_by_key(|s| STAGES.iter().position(|r| r.name == s.name));

        for stage in &selected {
            let conflicts: Vec<String> = stage
                .conflicts
                .iter()
                .filter(|c| selected.iter().any(|s| s.name == **c))
                .map(|c| c.to_string())
                .collect();
            if !conflicts.is_empty() {
                return Err(ConfigurationError::StageConflict {
                    stage: stage.name.to_string(),
                    conflicts,
                });
            }
        }

        let subsumed: Vec<&str> = selected.iter().flat_map(|s| s.runs.iter().copied()).collect();
        let mut stages: Vec<&'static StageDescriptor> = selected
            .iter()
            .copied()
            .filter(|s| !subsumed.contains(&s.name))
            .collect();
        stages.sort_by_key(|s| s.order);

        let mut starts: Vec<&'static BookendDescriptor> = Vec::new();
        let mut stops: Vec<&'static BookendDescriptor> = Vec::new();
        for stage in &stages {
            for (name, out) in [(stage.start, &mut starts), (stage.stop, &mut stops)] {
                if let Some(name) = name
                    && let Some(bookend) = lookup_bookend(name)
                    && !out.iter().any(|b| b.name == bookend.name)
                {
                    out.push(bookend);
                }
            }
        }

        Ok(Self {
            selected,
            stages,
            starts,
            stops,
        })
    }

    pub fn is_selected(&self, name: &str) -> bool {
        self.selected.iter().any(|s| s.name == name)
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name).collect()
    }
}

impl std::fmt::Debug for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |b: &[&BookendDescriptor]| b.iter().map(|b| b.name).collect::<Vec<_>>();
        f.debug_struct("Schedule")
            .field("stages", &self.stage_names())
            .field("starts", &names(&self.starts))
            .field("stops", &names(&self.stops))
            .finish()
    }
}
