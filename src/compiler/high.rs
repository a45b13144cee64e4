// src/compiler/high.rs

//! Normalisation and structural validation of raw high data.

use serde_json::{Map, Value};

use crate::low::{RequisiteForm, RequisiteKind, RequisiteRef};
use crate::types::{is_reserved_key, HighData};

/// First explicit order handed out by [`apply_auto_order`].
pub const AUTO_ORDER_START: u64 = 10_000;

/// `__sls__` of a declaration body, or `""` when unset.
pub(crate) fn sls_of(body: &Value) -> &str {
    body.get("__sls__").and_then(Value::as_str).unwrap_or("")
}

/// `__env__` of a declaration body, or `"base"` when unset.
pub(crate) fn env_of(body: &Value) -> &str {
    body.get("__env__").and_then(Value::as_str).unwrap_or("base")
}

/// The only entry of a single-key mapping argument.
pub(crate) fn single_entry(arg: &Value) -> Option<(&str, &Value)> {
    match arg {
        Value::Object(map) if map.len() == 1 => map.iter().next().map(|(k, v)| (k.as_str(), v)),
        _ => None,
    }
}

/// First key of a mapping argument (the one that names it).
pub(crate) fn first_key(arg: &Value) -> Option<&str> {
    arg.as_object()
        .and_then(|m| m.keys().next())
        .map(String::as_str)
}

/// `require` / `watch` written next to the state modules of a declaration
/// instead of inside a run list. They apply to every module of it.
pub(crate) fn is_decl_requisite(key: &str) -> bool {
    key == "require" || key == "watch"
}

/// State module keys of a declaration body, skipping `__dunder__` keys and
/// declaration-level requisites.
pub(crate) fn state_keys(body: &Value) -> Vec<String> {
    body.as_object()
        .map(|m| {
            m.keys()
                .filter(|k| !is_reserved_key(k) && !is_decl_requisite(k))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// Turn dotted function references into plain function entries.
///
/// - `{id: "pkg.installed"}` becomes `{id: {pkg: ["installed"]}}`.
/// - `{id: {"pkg.installed": [...]}}` becomes `{id: {pkg: [..., "installed"]}}`,
///   keeping the key's position. A second dotted key for the same module is
///   left alone so that [`verify_high`] can report it.
pub fn pad_funcs(high: &mut HighData) {
    for (id, body) in high.iter_mut() {
        if is_reserved_key(id) {
            continue;
        }
        if let Value::String(short) = body {
            if let Some((module, fun)) = short.split_once('.') {
                let mut padded = Map::new();
                padded.insert(module.to_string(), Value::Array(vec![Value::String(fun.to_string())]));
                *body = Value::Object(padded);
            }
            continue;
        }
        let Value::Object(decl) = body else { continue };

        let old = std::mem::take(decl);
        for (key, run) in old {
            if key.starts_with('_') || !run.is_array() {
                decl.insert(key, run);
                continue;
            }
            match key.split_once('.') {
                Some((module, fun)) if !decl.contains_key(module) => {
                    let mut run = run;
                    if let Value::Array(items) = &mut run {
                        items.push(Value::String(fun.to_string()));
                    }
                    decl.insert(module.to_string(), run);
                }
                _ => {
                    decl.insert(key, run);
                }
            }
        }
    }
}

/// Give every module declaration without an explicit `order` an increasing
/// order, starting at `start`. Returns the next free value.
///
/// This is what makes `state_auto_order` follow document order.
pub fn apply_auto_order(high: &mut HighData, start: u64) -> u64 {
    let mut next = start;
    for (id, body) in high.iter_mut() {
        if is_reserved_key(id) {
            continue;
        }
        let Value::Object(decl) = body else { continue };
        for (module, run) in decl.iter_mut() {
            if module.starts_with('_') || is_decl_requisite(module) {
                continue;
            }
            let Value::Array(items) = run else { continue };
            let has_order = items.iter().any(|arg| first_key(arg) == Some("order"));
            if !has_order {
                let mut order = Map::new();
                order.insert("order".into(), Value::from(next));
                items.push(Value::Object(order));
                next += 1;
            }
        }
    }
    next
}

/// Structural validation of high data. Every problem found is returned; an
/// empty list means the data can be compiled.
pub fn verify_high(high: &HighData) -> Vec<String> {
    let mut errors = Vec::new();

    for (id, body) in high.iter() {
        if is_reserved_key(id) {
            continue;
        }
        let Value::Object(decl) = body else {
            errors.push(format!(
                "The type {id} in {body} is not formatted as a dictionary"
            ));
            continue;
        };
        let sls = sls_of(body);

        for (module, run) in decl.iter() {
            if is_reserved_key(module) {
                continue;
            }
            let items = match run {
                Value::Null => {
                    errors.push(format!(
                        "ID '{id}' in SLS '{sls}' contains a short declaration ({module}) with a \
                         trailing colon. When not passing any arguments to a state, the colon \
                         must be omitted."
                    ));
                    continue;
                }
                Value::Array(items) => items,
                _ => {
                    errors.push(format!("State '{id}' in SLS '{sls}' is not formed as a list"));
                    continue;
                }
            };

            let mut funcs = usize::from(module.contains('.'));
            for arg in items {
                match arg {
                    Value::String(fun) => {
                        funcs += 1;
                        if fun.trim().contains(' ') {
                            errors.push(format!(
                                "The function \"{fun}\" in state \"{id}\" in SLS \"{sls}\" has \
                                 whitespace, a function with whitespace is not supported, \
                                 perhaps this is an argument that is missing a \":\""
                            ));
                        }
                    }
                    Value::Object(map) => {
                        if map.len() != 1 {
                            errors.push(format!(
                                "Multiple dictionaries defined in argument of state '{id}' in SLS '{sls}'"
                            ));
                        }
                        if let Some((key, val)) = map.iter().next() {
                            verify_arg(id, sls, key, val, &mut errors);
                        }
                    }
                    _ => {}
                }
            }

            if funcs == 0 {
                if module == "require" || module == "watch" {
                    continue;
                }
                errors.push(format!("No function declared in state '{module}' in SLS '{sls}'"));
            } else if funcs > 1 {
                errors.push(format!(
                    "Too many functions declared in state '{module}' in SLS '{sls}'"
                ));
            }
        }
    }

    errors
}

fn verify_arg(id: &str, sls: &str, key: &str, val: &Value, errors: &mut Vec<String>) {
    if key == "names" && !val.is_array() {
        errors.push(format!(
            "The 'names' argument in state '{id}' in SLS '{sls}' needs to be formed as a list"
        ));
        return;
    }

    let Some(kind) = RequisiteKind::parse(key) else { return };
    let members: Vec<&Value> = match val {
        Value::Array(list) => list.iter().collect(),
        // `foo_in: {module: id}` and `use: {module: id}` are accepted shorthands.
        Value::Object(_) if kind.form() == RequisiteForm::In || !kind.is_scheduled() => {
            vec![val]
        }
        _ => {
            errors.push(format!(
                "The {key} statement in state '{id}' in SLS '{sls}' needs to be formed as a list"
            ));
            return;
        }
    };

    for member in members {
        if let Value::Object(map) = member {
            if let Some(req_key) = map.keys().find(|k| k.contains('.')) {
                let trimmed = req_key.split('.').next().unwrap_or(req_key);
                errors.push(format!(
                    "Invalid requisite type '{req_key}' in state '{id}', in SLS '{sls}'. \
                     Requisite types must not contain dots, did you mean '{trimmed}'?"
                ));
                continue;
            }
        }
        if let Err(msg) = RequisiteRef::from_value(member) {
            errors.push(format!("{msg} (ID '{id}' in SLS '{sls}')"));
        }
    }
}
