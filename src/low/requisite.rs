// src/low/requisite.rs

//! Requisite kinds and requisite references.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

/// The relationship a requisite expresses between two chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequisiteType {
    Require,
    Watch,
    Prereq,
    Onfail,
    Onchanges,
    /// Copy arguments from another declaration (compile-time only).
    Use,
    /// Run `mod_watch` after the main pass if the target changed.
    Listen,
    /// Internal back-edge injected onto the target of a `prereq`.
    Prerequired,
}

/// How the references of one requisite list aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequisiteForm {
    /// Every reference must be satisfied (except plain `onfail`, which
    /// triggers when any of its references failed).
    Plain,
    /// `_any`: a single satisfied reference is enough.
    Any,
    /// `_all`: only used by `onfail_all`.
    All,
    /// `_in`: declared on the target, folded into the forward form before
    /// scheduling.
    In,
}

/// A requisite keyword, e.g. `require_any` or `watch_in`.
///
/// Only the combinations that exist as keywords can be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequisiteKind {
    ty: RequisiteType,
    form: RequisiteForm,
}

const fn kind(ty: RequisiteType, form: RequisiteForm) -> RequisiteKind {
    RequisiteKind { ty, form }
}

impl RequisiteKind {
    pub const REQUIRE: Self = kind(RequisiteType::Require, RequisiteForm::Plain);
    pub const REQUIRE_ANY: Self = kind(RequisiteType::Require, RequisiteForm::Any);
    pub const REQUIRE_IN: Self = kind(RequisiteType::Require, RequisiteForm::In);
    pub const WATCH: Self = kind(RequisiteType::Watch, RequisiteForm::Plain);
    pub const WATCH_ANY: Self = kind(RequisiteType::Watch, RequisiteForm::Any);
    pub const WATCH_IN: Self = kind(RequisiteType::Watch, RequisiteForm::In);
    pub const PREREQ: Self = kind(RequisiteType::Prereq, RequisiteForm::Plain);
    pub const PREREQ_IN: Self = kind(RequisiteType::Prereq, RequisiteForm::In);
    pub const ONFAIL: Self = kind(RequisiteType::Onfail, RequisiteForm::Plain);
    pub const ONFAIL_ANY: Self = kind(RequisiteType::Onfail, RequisiteForm::Any);
    pub const ONFAIL_ALL: Self = kind(RequisiteType::Onfail, RequisiteForm::All);
    pub const ONFAIL_IN: Self = kind(RequisiteType::Onfail, RequisiteForm::In);
    pub const ONCHANGES: Self = kind(RequisiteType::Onchanges, RequisiteForm::Plain);
    pub const ONCHANGES_ANY: Self = kind(RequisiteType::Onchanges, RequisiteForm::Any);
    pub const ONCHANGES_IN: Self = kind(RequisiteType::Onchanges, RequisiteForm::In);
    pub const USE: Self = kind(RequisiteType::Use, RequisiteForm::Plain);
    pub const USE_IN: Self = kind(RequisiteType::Use, RequisiteForm::In);
    pub const LISTEN: Self = kind(RequisiteType::Listen, RequisiteForm::Plain);
    pub const LISTEN_IN: Self = kind(RequisiteType::Listen, RequisiteForm::In);
    pub const PREREQUIRED: Self = kind(RequisiteType::Prerequired, RequisiteForm::Plain);

    /// Every keyword, in the order they are documented.
    pub const ALL: [Self; 20] = [
        Self::REQUIRE,
        Self::REQUIRE_ANY,
        Self::REQUIRE_IN,
        Self::WATCH,
        Self::WATCH_ANY,
        Self::WATCH_IN,
        Self::PREREQ,
        Self::PREREQ_IN,
        Self::ONFAIL,
        Self::ONFAIL_ANY,
        Self::ONFAIL_ALL,
        Self::ONFAIL_IN,
        Self::ONCHANGES,
        Self::ONCHANGES_ANY,
        Self::ONCHANGES_IN,
        Self::USE,
        Self::USE_IN,
        Self::LISTEN,
        Self::LISTEN_IN,
        Self::PREREQUIRED,
    ];

    /// Kinds consulted by the scheduler, in evaluation order.
    ///
    /// `prerequired` is appended by the caller only when the chunk is not
    /// itself being evaluated speculatively.
    pub const SCHEDULED: [Self; 10] = [
        Self::REQUIRE,
        Self::REQUIRE_ANY,
        Self::WATCH,
        Self::WATCH_ANY,
        Self::PREREQ,
        Self::ONFAIL,
        Self::ONFAIL_ANY,
        Self::ONFAIL_ALL,
        Self::ONCHANGES,
        Self::ONCHANGES_ANY,
    ];

    pub fn ty(&self) -> RequisiteType {
        self.ty
    }

    pub fn form(&self) -> RequisiteForm {
        self.form
    }

    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == key)
    }

    pub fn as_str(&self) -> &'static str {
        use RequisiteForm::*;
        use RequisiteType::*;
        match (self.ty, self.form) {
            (Require, Plain) => "require",
            (Require, Any) => "require_any",
            (Require, In) => "require_in",
            (Watch, Plain) => "watch",
            (Watch, Any) => "watch_any",
            (Watch, In) => "watch_in",
            (Prereq, Plain) => "prereq",
            (Prereq, In) => "prereq_in",
            (Onfail, Plain) => "onfail",
            (Onfail, Any) => "onfail_any",
            (Onfail, All) => "onfail_all",
            (Onfail, In) => "onfail_in",
            (Onchanges, Plain) => "onchanges",
            (Onchanges, Any) => "onchanges_any",
            (Onchanges, In) => "onchanges_in",
            (Use, Plain) => "use",
            (Use, In) => "use_in",
            (Listen, Plain) => "listen",
            (Listen, In) => "listen_in",
            (Prerequired, _) => "prerequired",
            // Remaining combinations cannot be constructed outside this module.
            (_, _) => "require",
        }
    }

    pub fn is_inverse(&self) -> bool {
        self.form == RequisiteForm::In
    }

    /// `foo_in` → `foo`; other kinds are returned unchanged.
    pub fn forward(&self) -> Self {
        if self.is_inverse() {
            kind(self.ty, RequisiteForm::Plain)
        } else {
            *self
        }
    }

    /// Kinds resolved into edges of the execution plan.
    pub fn is_scheduled(&self) -> bool {
        !self.is_inverse()
            && !matches!(self.ty, RequisiteType::Use | RequisiteType::Listen)
    }

    /// Requisites whose target is evaluated speculatively (read from the
    /// pre-map rather than the running report).
    pub fn reads_pre_map(&self) -> bool {
        self.ty == RequisiteType::Prereq
    }
}

impl fmt::Display for RequisiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequisiteKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown requisite keyword '{s}'"))
    }
}

/// A reference from one chunk to others.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequisiteRef {
    /// `{module: target}`; `module == None` is the `id` wildcard.
    ///
    /// `target` is a glob matched against chunk ids and names.
    Id {
        module: Option<String>,
        target: String,
    },
    /// `{sls: pattern}` or `{sls: pattern, id: id}`.
    Sls { sls: String, id: Option<String> },
}

impl RequisiteRef {
    pub fn id(target: impl Into<String>) -> Self {
        RequisiteRef::Id {
            module: None,
            target: target.into(),
        }
    }

    pub fn state(module: impl Into<String>, target: impl Into<String>) -> Self {
        RequisiteRef::Id {
            module: Some(module.into()),
            target: target.into(),
        }
    }

    pub fn sls(sls: impl Into<String>) -> Self {
        RequisiteRef::Sls {
            sls: sls.into(),
            id: None,
        }
    }

    /// Parse one entry of a requisite list.
    ///
    /// Accepts `"id"`, `{module: id}`, `{module.fun: id}` (the function part is
    /// dropped), `{sls: name}` and `{sls: name, id: id}`.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::String(s) => Ok(Self::id(s.clone())),
            Value::Object(map) => Self::from_map(map),
            other => Err(format!(
                "Requisite declaration {other} is not formed as a single key dictionary"
            )),
        }
    }

    fn from_map(map: &Map<String, Value>) -> Result<Self, String> {
        if map.len() == 2 {
            if let (Some(sls), Some(id)) = (map.get("sls"), map.get("id")) {
                return Ok(RequisiteRef::Sls {
                    sls: scalar_to_string(sls)?,
                    id: Some(scalar_to_string(id)?),
                });
            }
        }

        let mut iter = map.iter();
        let (key, val) = match (iter.next(), iter.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(format!(
                    "Requisite declaration {} is not formed as a single key dictionary",
                    Value::Object(map.clone())
                ));
            }
        };

        let target = scalar_to_string(val)?;
        let module = key.split('.').next().unwrap_or(key);
        Ok(match module {
            "sls" => Self::sls(target),
            "id" => Self::id(target),
            other => Self::state(other, target),
        })
    }

    /// The key this reference was declared with (`id`, `sls` or a module).
    pub fn key(&self) -> &str {
        match self {
            RequisiteRef::Id { module: Some(m), .. } => m,
            RequisiteRef::Id { module: None, .. } => "id",
            RequisiteRef::Sls { .. } => "sls",
        }
    }

    pub fn target(&self) -> &str {
        match self {
            RequisiteRef::Id { target, .. } => target,
            RequisiteRef::Sls { sls, .. } => sls,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        match self {
            RequisiteRef::Sls { sls, id: Some(id) } => {
                map.insert("sls".into(), Value::String(sls.clone()));
                map.insert("id".into(), Value::String(id.clone()));
            }
            _ => {
                map.insert(self.key().to_string(), Value::String(self.target().to_string()));
            }
        }
        Value::Object(map)
    }
}

impl fmt::Display for RequisiteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequisiteRef::Sls { sls, id: Some(id) } => write!(f, "sls: {sls}, id: {id}"),
            _ => write!(f, "{}: {}", self.key(), self.target()),
        }
    }
}

fn scalar_to_string(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!(
            "Illegal requisite \"{other}\", please check your syntax."
        )),
    }
}
