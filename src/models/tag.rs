//! Tag batches accumulated across a run
//!
//! Tag stages only record which assets they saw; the actual tag write is a
//! single bulk request per batch made when the pipeline stops.

use std::collections::HashSet;
use std::fmt;

/// Whether a batch adds or removes its tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagOp {
    Add,
    Remove,
}

impl fmt::Display for TagOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagOp::Add => write!(f, "add"),
            TagOp::Remove => write!(f, "remove"),
        }
    }
}

/// Deduplicated, insertion-ordered set of asset ids plus the tags to apply.
#[derive(Debug, Clone)]
pub struct TagBatch {
    op: TagOp,
    tags: Vec<String>,
    ids: Vec<String>,
    seen: HashSet<String>,
}

impl TagBatch {
    /// Create a batch for `tags`; blank and repeated tags are dropped.
    pub fn new(op: TagOp, tags: &[String]) -> Self {
        let mut unique: Vec<String> = Vec::new();
        for tag in tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            if !unique.iter().any(|u| u == tag) {
                unique.push(tag.to_string());
            }
        }
        Self {
            op,
            tags: unique,
            ids: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Record an asset id. Returns false if it was already recorded.
    pub fn push(&mut self, id: &str) -> bool {
        if self.seen.insert(id.to_string()) {
            self.ids.push(id.to_string());
            true
        } else {
            false
        }
    }

    pub fn op(&self) -> TagOp {
        self.op
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// True when there is something to write.
    pub fn is_ready(&self) -> bool {
        !self.tags.is_empty() && !self.ids.is_empty()
    }

    /// Take the accumulated ids, leaving the batch empty.
    pub fn drain(&mut self) -> Vec<String> {
        self.seen.clear();
        std::mem::take(&mut self.ids)
    }
}
