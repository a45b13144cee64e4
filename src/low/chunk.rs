// src/low/chunk.rs

//! Low chunks: one concrete, normalized unit of work.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::low::requisite::{RequisiteKind, RequisiteRef};
use crate::types::Args;

/// Separator between the four components of a [`Tag`].
pub const TAG_SEP: &str = "_|-";

/// Identity key correlating a chunk with its running-report entry:
/// `"{state}_|-{id}_|-{name}_|-{fun}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

/// The four components of a [`Tag`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagParts {
    pub state: String,
    pub id: String,
    pub name: String,
    pub fun: String,
}

impl Tag {
    pub fn new(state: &str, id: &str, name: &str, fun: &str) -> Self {
        Tag(format!("{state}{TAG_SEP}{id}{TAG_SEP}{name}{TAG_SEP}{fun}"))
    }

    /// Wrap an already formatted tag string (e.g. a key from a report).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Tag(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split the tag back into its components.
    ///
    /// Returns `None` for strings that are not four-part tags.
    pub fn split(&self) -> Option<TagParts> {
        let mut parts = self.0.splitn(4, TAG_SEP);
        let state = parts.next()?;
        let id = parts.next()?;
        let name = parts.next()?;
        let fun = parts.next()?;
        Some(TagParts {
            state: state.to_string(),
            id: id.to_string(),
            name: name.to_string(),
            fun: fun.to_string(),
        })
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One compiled unit of work.
///
/// Created by the compiler and never mutated afterwards. Runtime annotations
/// (prereq markers, "already evaluated") are kept by the scheduler, keyed by
/// [`Tag`].
#[derive(Debug, Clone, PartialEq)]
pub struct LowChunk {
    /// State module, e.g. `pkg`.
    pub state: String,
    /// Function within the module, e.g. `installed`.
    pub fun: String,
    pub name: String,
    /// Declaration id.
    pub id: String,
    pub sls: String,
    pub env: String,
    /// Sort key assigned by the compiler.
    pub order: f64,
    pub requisites: IndexMap<RequisiteKind, Vec<RequisiteRef>>,
    /// Module-specific keyword arguments.
    pub args: Args,
}

impl LowChunk {
    pub fn tag(&self) -> Tag {
        Tag::new(&self.state, &self.id, &self.name, &self.fun)
    }

    /// `state.fun`, the name of the callable this chunk invokes.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.state, self.fun)
    }

    pub fn requisites_of(&self, kind: RequisiteKind) -> &[RequisiteRef] {
        self.requisites
            .get(&kind)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_requisite(&self, kind: RequisiteKind) -> bool {
        self.requisites.get(&kind).is_some_and(|v| !v.is_empty())
    }

    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.get(key)
    }

    /// Boolean argument; `None` when absent or not a bool.
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.args.get(key).and_then(Value::as_bool)
    }

    /// `sls.id`, the short label used in failure comments.
    pub fn label(&self) -> String {
        if self.sls.is_empty() {
            self.id.clone()
        } else {
            format!("{}.{}", self.sls, self.id)
        }
    }

    /// Low data as a flat mapping, matching the shape the state system has
    /// always exposed to modules and dry-run output.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("state".into(), Value::String(self.state.clone()));
        map.insert("__id__".into(), Value::String(self.id.clone()));
        map.insert("name".into(), Value::String(self.name.clone()));
        map.insert("fun".into(), Value::String(self.fun.clone()));
        map.insert("__sls__".into(), Value::String(self.sls.clone()));
        map.insert("__env__".into(), Value::String(self.env.clone()));
        if let Some(order) = serde_json::Number::from_f64(self.order) {
            map.insert("order".into(), Value::Number(order));
        }
        for (kind, refs) in &self.requisites {
            map.insert(
                kind.as_str().to_string(),
                Value::Array(refs.iter().map(RequisiteRef::to_value).collect()),
            );
        }
        for (k, v) in &self.args {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }
}
