#![allow(dead_code)]

use highstate::types::HighData;
use serde_json::{Map, Value};

/// Builder for high data to simplify test setup.
///
/// ```ignore
/// let high = HighBuilder::new("web")
///     .decl("A", "test", "succeed_with_changes", vec![])
///     .decl("B", "test", "nop", vec![req_state("require", "test", "A")])
///     .build();
/// ```
pub struct HighBuilder {
    sls: String,
    env: String,
    high: HighData,
}

impl HighBuilder {
    pub fn new(sls: &str) -> Self {
        Self {
            sls: sls.to_string(),
            env: "base".to_string(),
            high: HighData::new(),
        }
    }

    /// Switch the SLS for declarations added afterwards.
    pub fn sls(mut self, sls: &str) -> Self {
        self.sls = sls.to_string();
        self
    }

    /// `{id: {module: [fun, args...], __sls__, __env__}}`.
    ///
    /// Adding a second module to an existing id keeps the first one.
    pub fn decl(mut self, id: &str, module: &str, fun: &str, args: Vec<Value>) -> Self {
        let mut run = vec![Value::String(fun.to_string())];
        run.extend(args);

        let entry = self
            .high
            .entry(id.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(body) = entry {
            body.insert(module.to_string(), Value::Array(run));
            body.insert("__sls__".to_string(), Value::String(self.sls.clone()));
            body.insert("__env__".to_string(), Value::String(self.env.clone()));
        }
        self
    }

    /// Insert a declaration body as-is.
    pub fn raw(mut self, id: &str, body: Value) -> Self {
        self.high.insert(id.to_string(), body);
        self
    }

    pub fn build(self) -> HighData {
        self.high
    }
}

/// `{key: value}` argument entry.
pub fn arg(key: &str, value: impl Into<Value>) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value.into());
    Value::Object(map)
}

/// `{kind: targets}` requisite entry.
pub fn req(kind: &str, targets: Value) -> Value {
    arg(kind, targets)
}

/// `{kind: [{module: id}]}` for a single target.
pub fn req_state(kind: &str, module: &str, id: &str) -> Value {
    req(kind, Value::Array(vec![arg(module, id)]))
}

/// `high` parsed from a JSON literal; panics if it is not an object.
pub fn high_from(value: Value) -> HighData {
    match value {
        Value::Object(map) => map,
        other => panic!("high data must be an object, got {other}"),
    }
}
