// src/compiler/extend.rs

//! Whole-document rewrites run before compilation: `__extend__`,
//! `__exclude__` and the folding of inverse requisites.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::compiler::high::{env_of, first_key, single_entry, sls_of, state_keys};
use crate::low::{glob_match, RequisiteKind, RequisiteType};
use crate::types::{is_reserved_key, HighData};

/// `(id, module)` pairs returned by the lookup helpers.
pub type DeclRef = (String, String);

/// Find declarations addressed by `name` under `module`.
///
/// - an id that declares `module` matches directly;
/// - `module == "sls"` returns every declaration of that sls;
/// - otherwise any declaration of `module` whose `name` argument equals
///   `name` matches.
pub fn find_name(name: &str, module: &str, high: &HighData) -> Vec<DeclRef> {
    if high
        .get(name)
        .and_then(Value::as_object)
        .is_some_and(|decl| decl.contains_key(module))
    {
        return vec![(name.to_string(), module.to_string())];
    }

    if module == "sls" {
        return high
            .iter()
            .filter(|(id, body)| !is_reserved_key(id) && sls_of(body) == name)
            .filter_map(|(id, body)| {
                state_keys(body)
                    .into_iter()
                    .next()
                    .map(|state| (id.clone(), state))
            })
            .collect();
    }

    let mut found = Vec::new();
    for (id, body) in high.iter() {
        let Some(Value::Array(run)) = body.get(module) else { continue };
        let named = run.iter().any(|arg| {
            single_entry(arg).is_some_and(|(k, v)| k == "name" && v.as_str() == Some(name))
        });
        if named {
            found.push((id.clone(), module.to_string()));
        }
    }
    found
}

/// Every `(id, module)` declared by the given sls.
pub fn find_sls_ids(sls: &str, high: &HighData) -> Vec<DeclRef> {
    let mut ret = Vec::new();
    for (id, body) in high.iter() {
        if is_reserved_key(id) {
            continue;
        }
        if !body.is_object() {
            warn!(id = %id, "invalid non-mapping item in high data");
            continue;
        }
        if sls_of(body) == sls {
            for state in state_keys(body) {
                ret.push((id.clone(), state));
            }
        }
    }
    ret
}

/// Names of the single-key arguments of one module declaration.
pub fn state_args(id: &str, module: &str, high: &HighData) -> HashSet<String> {
    let Some(Value::Array(run)) = high.get(id).and_then(|b| b.get(module)) else {
        return HashSet::new();
    };
    run.iter()
        .filter_map(single_entry)
        .map(|(k, _)| k.to_string())
        .collect()
}

/// Merge `__extend__` into the declarations it names.
///
/// Within a module list: a function replaces the existing function; a
/// requisite argument is appended to the existing requisite list; any other
/// argument with the same key replaces the old one; everything else is
/// appended. Returns one error per extend entry whose target is missing.
pub fn reconcile_extend(high: &mut HighData) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(ext) = high.shift_remove("__extend__") else {
        return errors;
    };
    let Value::Array(ext) = ext else {
        errors.push("The __extend__ data is not formed as a list".to_string());
        return errors;
    };

    for ext_chunk in ext {
        let Value::Object(ext_chunk) = ext_chunk else { continue };
        for (name, body) in ext_chunk {
            let Some(state_type) = state_keys(&body).into_iter().next() else {
                continue;
            };

            let present = high
                .get(&name)
                .and_then(Value::as_object)
                .is_some_and(|decl| decl.contains_key(&state_type));
            let target = if present {
                name.clone()
            } else {
                let ids = find_name(&name, &state_type, high);
                if ids.len() != 1 {
                    errors.push(format!(
                        "Cannot extend ID '{name}' in '{env}:{sls}'. It is not part of the high state.\n\
                         This is likely due to a missing include statement or an incorrectly typed ID.\n\
                         Ensure that a state with an ID of '{name}' is available\n\
                         in environment '{env}' and to SLS '{sls}'",
                        env = env_of(&body),
                        sls = if sls_of(&body).is_empty() { "base" } else { sls_of(&body) },
                    ));
                    continue;
                }
                ids[0].0.clone()
            };

            let Some(Value::Object(decl)) = high.get_mut(&target) else { continue };
            let Value::Object(body) = body else { continue };
            for (state, run) in body {
                if is_reserved_key(&state) {
                    continue;
                }
                match decl.get_mut(&state) {
                    Some(Value::Array(existing)) => {
                        if let Value::Array(run) = run {
                            merge_run(existing, run);
                        }
                    }
                    _ => {
                        decl.insert(state, run);
                    }
                }
            }
        }
    }

    errors
}

enum Merge {
    Skip,
    Replace,
    Extend,
}

fn merge_run(existing: &mut Vec<Value>, run: Vec<Value>) {
    for arg in run {
        let mut update = false;
        for slot in existing.iter_mut() {
            let action = match (&arg, &*slot) {
                (Value::String(_), Value::String(_)) => Merge::Replace,
                (Value::Object(_), Value::Object(_)) => match (first_key(&arg), first_key(slot)) {
                    (Some(new_key), Some(old_key)) if new_key == old_key => {
                        let is_requisite =
                            RequisiteKind::parse(new_key).is_some_and(|k| !k.is_inverse());
                        if is_requisite && arg[new_key].is_array() && slot[old_key].is_array() {
                            Merge::Extend
                        } else {
                            Merge::Replace
                        }
                    }
                    (Some("name"), Some("names")) => Merge::Replace,
                    _ => Merge::Skip,
                },
                _ => Merge::Skip,
            };

            match action {
                Merge::Skip => {}
                Merge::Replace => {
                    *slot = arg.clone();
                    update = true;
                }
                Merge::Extend => {
                    let key = first_key(&arg).unwrap_or_default().to_string();
                    if let (Some(Value::Array(old)), Some(Value::Array(new))) =
                        (slot.get_mut(&key), arg.get(&key))
                    {
                        old.extend(new.iter().cloned());
                    }
                    update = true;
                }
            }
        }
        if !update {
            existing.push(arg);
        }
    }
}

/// Remove every declaration named by `__exclude__`.
///
/// Entries are an sls name (string), `{sls: glob}` or `{id: id}`.
pub fn apply_exclude(high: &mut HighData) {
    let Some(Value::Array(exclude)) = high.shift_remove("__exclude__") else {
        return;
    };

    let mut ex_sls = Vec::new();
    let mut ex_id = HashSet::new();
    for exc in &exclude {
        match exc {
            Value::String(sls) => ex_sls.push(sls.clone()),
            Value::Object(_) => match single_entry(exc) {
                Some(("sls", Value::String(sls))) => ex_sls.push(sls.clone()),
                Some(("id", Value::String(id))) => {
                    ex_id.insert(id.clone());
                }
                _ => {}
            },
            _ => {}
        }
    }

    if !ex_sls.is_empty() {
        for (id, body) in high.iter() {
            if is_reserved_key(id) {
                continue;
            }
            let sls = sls_of(body);
            if !sls.is_empty() && ex_sls.iter().any(|pat| glob_match(pat, sls)) {
                ex_id.insert(id.clone());
            }
        }
    }

    for id in ex_id {
        if high.shift_remove(&id).is_some() {
            debug!(id = %id, "excluded declaration");
        }
    }
}

/// Additions destined for one declaration.
#[derive(Default)]
struct ExtDecl {
    env: Option<String>,
    sls: Option<String>,
    modules: IndexMap<String, Vec<Value>>,
}

/// Pending additions keyed by target id.
#[derive(Default)]
struct Extension {
    decls: IndexMap<String, ExtDecl>,
}

impl Extension {
    fn run_of(&mut self, id: &str, module: &str) -> &mut Vec<Value> {
        self.decls
            .entry(id.to_string())
            .or_default()
            .modules
            .entry(module.to_string())
            .or_default()
    }

    fn stamp(&mut self, id: &str, source: &Value) {
        let decl = self.decls.entry(id.to_string()).or_default();
        decl.env = Some(env_of(source).to_string());
        decl.sls = Some(sls_of(source).to_string());
    }

    /// Add `{module: id}` to the `rkey` requisite of `target`, creating the
    /// requisite list on first use.
    fn add_requisite(&mut self, target: &str, target_module: &str, rkey: &str, module: &str, id: &str) {
        let mut reference = Map::new();
        reference.insert(module.to_string(), Value::String(id.to_string()));
        let reference = Value::Object(reference);

        let run = self.run_of(target, target_module);
        for arg in run.iter_mut() {
            if let Some(Value::Array(list)) = arg.get_mut(rkey) {
                list.push(reference);
                return;
            }
        }
        let mut req = Map::new();
        req.insert(rkey.to_string(), Value::Array(vec![reference]));
        run.push(Value::Object(req));
    }

    fn into_value(self) -> Value {
        Value::Array(
            self.decls
                .into_iter()
                .map(|(id, decl)| {
                    let mut body = Map::new();
                    if let Some(env) = decl.env {
                        body.insert("__env__".into(), Value::String(env));
                    }
                    if let Some(sls) = decl.sls {
                        body.insert("__sls__".into(), Value::String(sls));
                    }
                    for (module, run) in decl.modules {
                        body.insert(module, Value::Array(run));
                    }
                    let mut entry = Map::new();
                    entry.insert(id, Value::Object(body));
                    Value::Object(entry)
                })
                .collect(),
        )
    }
}

/// Keys never copied by `use` / `use_in`.
fn is_use_ignored(key: &str) -> bool {
    key == "name"
        || key == "names"
        || key == "onfail_stop"
        || RequisiteKind::parse(key).is_some()
}

/// Fold inverse requisites into forward ones and expand `use`, then merge
/// the result through [`reconcile_extend`].
///
/// - `X_in: [{m: t}]` on `A` adds `X: [{A.module: A}]` to every declaration
///   matched by `t`.
/// - `prereq: [B]` on `A` adds `prerequired: [{A.module: A}]` to `B`.
/// - `prereq_in: [B]` on `A` adds `prereq` to `B` and `prerequired` to `A`.
/// - `use: [B]` copies `B`'s plain arguments onto `A` (without overriding
///   arguments `A` already sets); `use_in` is the inverse.
///
/// Kinds in `disabled` are skipped with a warning. A declaration never ends
/// up requiring itself through folding.
pub fn requisite_in(high: &mut HighData, disabled: &[String]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut ext = Extension::default();

    for (id, body) in high.iter() {
        if is_reserved_key(id) {
            continue;
        }
        let Value::Object(decl) = body else { continue };
        for (state, run) in decl.iter() {
            if is_reserved_key(state) {
                continue;
            }
            let Value::Array(run) = run else { continue };
            for arg in run {
                let Some(key) = first_key(arg) else { continue };
                let Some(kind) = RequisiteKind::parse(key) else { continue };
                let folds = kind.is_inverse()
                    || kind == RequisiteKind::USE
                    || kind == RequisiteKind::PREREQ;
                if !folds {
                    continue;
                }
                if disabled.iter().any(|d| d == key) {
                    warn!("The {key} requisite has been disabled, Ignoring.");
                    continue;
                }
                let Some(items) = arg.get(key) else { continue };
                let items: Vec<Value> = match items {
                    Value::Array(list) => list.clone(),
                    Value::Object(map) => map
                        .iter()
                        .map(|(k, v)| {
                            let mut one = Map::new();
                            one.insert(k.clone(), v.clone());
                            Value::Object(one)
                        })
                        .collect(),
                    other => vec![other.clone()],
                };

                for item in items {
                    let Some((pstate, pname)) = resolve_item(&item, high) else {
                        continue;
                    };
                    let trimmed = pstate.split_once('.').map(|(t, _)| t.to_string());
                    let pstate = match trimmed {
                        Some(trimmed) => {
                            errors.push(format!(
                                "Invalid requisite in {rkey}: {pstate} for {pname}, in SLS '{sls}'. \
                                 Requisites must not contain dots, did you mean '{trimmed}'?",
                                rkey = kind.forward(),
                                sls = sls_of(body),
                            ));
                            trimmed
                        }
                        None => pstate,
                    };

                    let hinges = if pstate == "sls" {
                        find_sls_ids(&pname, high)
                    } else {
                        vec![(pname.clone(), pstate.clone())]
                    };

                    for (name, hinge_state) in hinges {
                        fold_one(
                            &mut ext,
                            high,
                            FoldSource {
                                kind,
                                id,
                                state,
                                body,
                            },
                            &name,
                            &hinge_state,
                        );
                    }
                }
            }
        }
    }

    high.insert("__extend__".into(), ext.into_value());
    errors.extend(reconcile_extend(high));
    errors
}

struct FoldSource<'a> {
    kind: RequisiteKind,
    id: &'a str,
    state: &'a str,
    body: &'a Value,
}

fn fold_one(ext: &mut Extension, high: &HighData, src: FoldSource<'_>, name: &str, hinge_state: &str) {
    let FoldSource {
        kind,
        id,
        state,
        body,
    } = src;

    if name == id && hinge_state == state {
        debug!(id = %id, kind = %kind, "skipping self-referencing requisite");
        return;
    }

    match kind.ty() {
        RequisiteType::Prereq if kind.is_inverse() => {
            // The origin runs after the prereq'd target has been checked.
            let mut reference = Map::new();
            reference.insert(hinge_state.to_string(), Value::String(name.to_string()));
            let mut req = Map::new();
            req.insert(
                "prerequired".to_string(),
                Value::Array(vec![Value::Object(reference)]),
            );
            ext.run_of(id, state).push(Value::Object(req));
        }
        RequisiteType::Prereq => {
            for (ext_id, req_state) in find_name(name, hinge_state, high) {
                if ext_id == id && req_state == state {
                    continue;
                }
                ext.add_requisite(&ext_id, &req_state, "prerequired", state, id);
            }
            return;
        }
        RequisiteType::Use => {
            if kind.is_inverse() {
                for (ext_id, req_state) in find_name(name, hinge_state, high) {
                    let taken = state_args(&ext_id, hinge_state, high);
                    let copied = usable_args(high, id, state, &taken);
                    ext.run_of(&ext_id, &req_state).extend(copied);
                }
            } else {
                let taken = state_args(id, state, high);
                for (ext_id, req_state) in find_name(name, hinge_state, high) {
                    let copied = usable_args(high, &ext_id, &req_state, &taken);
                    ext.run_of(id, state).extend(copied);
                }
            }
            return;
        }
        _ => {}
    }

    ext.stamp(name, body);
    ext.add_requisite(name, hinge_state, kind.forward().as_str(), state, id);
}

/// Plain single-key arguments of `id.module` that are not yet set in `taken`.
fn usable_args(high: &HighData, id: &str, module: &str, taken: &HashSet<String>) -> Vec<Value> {
    let Some(Value::Array(run)) = high.get(id).and_then(|b| b.get(module)) else {
        return Vec::new();
    };
    run.iter()
        .filter(|arg| {
            single_entry(arg).is_some_and(|(k, _)| !taken.contains(k) && !is_use_ignored(k))
        })
        .cloned()
        .collect()
}

/// Resolve one entry of an inverse requisite list into `(module, target)`.
///
/// A bare string names an id (taking its first module) or, failing that, a
/// declaration whose `name` argument matches.
fn resolve_item(item: &Value, high: &HighData) -> Option<(String, String)> {
    match item {
        Value::Object(_) => {
            let (k, v) = single_entry(item)?;
            Some((k.to_string(), scalar(v)?))
        }
        Value::String(target) => {
            if let Some(body) = high.get(target) {
                let module = state_keys(body).into_iter().next()?;
                return Some((module, target.clone()));
            }
            let mut found = None;
            for (id, body) in high.iter() {
                if is_reserved_key(id) {
                    continue;
                }
                for module in state_keys(body) {
                    if let Some(Value::Array(run)) = body.get(&module) {
                        let named = run.iter().any(|arg| {
                            single_entry(arg)
                                .is_some_and(|(k, v)| k == "name" && v.as_str() == Some(target))
                        });
                        if named {
                            found = Some((module, id.clone()));
                        }
                    }
                }
            }
            found
        }
        _ => None,
    }
}

fn scalar(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
