// src/dag/report.rs

//! Per-chunk results and the running report of one pass.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::exec::StateReturn;
use crate::low::{LowChunk, Tag};

fn default_true() -> bool {
    true
}

/// Outcome of one chunk, serialised with the report's dunder key names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResult {
    pub name: String,
    pub result: Option<bool>,
    #[serde(default)]
    pub changes: Map<String, Value>,
    #[serde(default)]
    pub comment: String,
    #[serde(rename = "__run_num__", default, skip_serializing_if = "Option::is_none")]
    pub run_num: Option<u64>,
    /// Local wall-clock time the call started (`HH:MM:SS.ffffff`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// `false` for synthetic results of chunks that were skipped.
    #[serde(rename = "__state_ran__", default = "default_true")]
    pub state_ran: bool,
    /// `state.fun` that actually produced this result.
    #[serde(rename = "__saltfunc__", default, skip_serializing_if = "Option::is_none")]
    pub func: Option<String>,
    #[serde(rename = "__sls__", default)]
    pub sls: String,
    #[serde(rename = "__id__", default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Carried from the state function; suppresses the `mod_watch` fallback.
    #[serde(skip)]
    pub skip_watch: bool,
}

impl ChunkResult {
    /// A result produced without calling the state function.
    pub fn synthetic(low: &LowChunk, result: Option<bool>, comment: impl Into<String>) -> Self {
        Self {
            name: low.name.clone(),
            result,
            changes: Map::new(),
            comment: comment.into(),
            run_num: None,
            start_time: None,
            duration: None,
            state_ran: true,
            func: None,
            sls: low.sls.clone(),
            id: low.id.clone(),
            warnings: Vec::new(),
            skip_watch: false,
        }
    }

    pub fn from_return(low: &LowChunk, ret: StateReturn) -> Self {
        Self {
            name: ret.name,
            result: ret.result,
            changes: ret.changes,
            comment: ret.comment,
            warnings: ret.warnings,
            skip_watch: ret.skip_watch,
            ..Self::synthetic(low, None, "")
        }
    }

    pub fn succeeded(&self) -> bool {
        self.result == Some(true)
    }

    pub fn failed(&self) -> bool {
        self.result == Some(false)
    }
}

/// Insertion-ordered map `Tag -> ChunkResult` for one pass.
///
/// Append-only while a pass runs; the scheduler also keeps a second one as
/// the pre-map for speculative `prereq` results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunningReport {
    entries: IndexMap<Tag, ChunkResult>,
}

impl RunningReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tag: &Tag) -> Option<&ChunkResult> {
        self.entries.get(tag)
    }

    pub fn contains(&self, tag: &Tag) -> bool {
        self.entries.contains_key(tag)
    }

    /// Record a result. An existing entry for `tag` is replaced in place.
    pub fn insert(&mut self, tag: Tag, result: ChunkResult) {
        self.entries.insert(tag, result);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Tag, &ChunkResult)> {
        self.entries.iter()
    }

    /// First entry recorded for the declaration `id`.
    pub fn by_id(&self, id: &str) -> Option<&ChunkResult> {
        self.entries
            .iter()
            .find(|(tag, _)| tag.split().is_some_and(|p| p.id == id))
            .map(|(_, r)| r)
    }

    /// Entries sorted by `__run_num__` (entries without one go last).
    pub fn in_run_order(&self) -> Vec<(&Tag, &ChunkResult)> {
        let mut out: Vec<_> = self.entries.iter().collect();
        out.sort_by_key(|(_, r)| r.run_num.unwrap_or(u64::MAX));
        out
    }

    /// The nested mapping consumed by [`crate::outcome::check_result`].
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

impl Extend<(Tag, ChunkResult)> for RunningReport {
    fn extend<T: IntoIterator<Item = (Tag, ChunkResult)>>(&mut self, iter: T) {
        self.entries.extend(iter);
    }
}

impl IntoIterator for RunningReport {
    type Item = (Tag, ChunkResult);
    type IntoIter = indexmap::map::IntoIter<Tag, ChunkResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
