// src/types.rs

use std::str::FromStr;

use serde_json::{Map, Value};

/// Rendered high data: `{id: {module: [fun, {arg: val}, ...], ...}, ...}`.
///
/// Insertion order is preserved (`serde_json` is built with
/// `preserve_order`), which is what gives document order to the compiler.
pub type HighData = Map<String, Value>;

/// Free-form keyword arguments passed to a state function.
pub type Args = Map<String, Value>;

/// Keyword arguments consumed by the state system itself.
///
/// They stay on the chunk (so checks like `onlyif` can read them) but are
/// stripped from the keyword bag handed to a state function.
pub const STATE_RUNTIME_KEYWORDS: &[&str] = &[
    "check_cmd",
    "failhard",
    "onlyif",
    "unless",
    "creates",
    "onfail_stop",
    "reload_modules",
    "saltenv",
];

/// Keys the compiler lifts out of the argument bag into dedicated
/// [`LowChunk`](crate::low::LowChunk) fields.
pub const STRUCTURAL_KEYWORDS: &[&str] = &["name", "names", "order", "state", "fun"];

/// Keys of a declaration body that are never state modules.
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with("__")
}

/// Where a chunk's explicit `order` places it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderHint {
    First,
    Last,
    /// Integers count from the start; negative ones count back from `last`.
    At(f64),
}

impl OrderHint {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(OrderHint::At),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl FromStr for OrderHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "first" => Ok(OrderHint::First),
            "last" => Ok(OrderHint::Last),
            other => other
                .parse::<f64>()
                .map(OrderHint::At)
                .map_err(|_| format!("invalid order: {other} (expected a number, \"first\" or \"last\")")),
        }
    }
}
