// src/compiler/compile.rs

//! High data → ordered low chunks.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde_json::Value;

use crate::compiler::high::{env_of, is_decl_requisite, sls_of};
use crate::errors::{Result, StateError};
use crate::low::{LowChunk, RequisiteKind, RequisiteRef};
use crate::types::{is_reserved_key, Args, HighData, OrderHint};

/// Offset that places `order: last` (and negative orders) behind everything
/// else.
const LAST_OFFSET: f64 = 1_000_000.0;

/// A compiled chunk whose final sort key is not known yet.
#[derive(Debug, Clone)]
pub struct UnorderedChunk {
    pub chunk: LowChunk,
    pub order: Option<OrderHint>,
    /// 1-based position within a `names` list.
    pub name_order: Option<u32>,
}

/// Everything collected from one module declaration before it is split by
/// function and name.
#[derive(Default, Clone)]
struct Collected {
    name: Option<String>,
    order: Option<OrderHint>,
    requisites: IndexMap<RequisiteKind, Vec<RequisiteRef>>,
    args: Args,
}

impl Collected {
    fn absorb(&mut self, id: &str, key: &str, val: &Value, errors: &mut Vec<String>) {
        match key {
            "state" | "fun" | "names" => {}
            "name" => {
                // Invalid names fall back to the declaration id.
                self.name = Some(val.as_str().unwrap_or(id).to_string());
            }
            "order" => match OrderHint::from_value(val) {
                Some(hint) => self.order = Some(hint),
                None => errors.push(format!("Invalid order {val} in ID '{id}'")),
            },
            _ => match RequisiteKind::parse(key) {
                Some(kind) => {
                    let members: Vec<&Value> = match val {
                        Value::Array(list) => list.iter().collect(),
                        Value::Null => Vec::new(),
                        other => vec![other],
                    };
                    let refs = self.requisites.entry(kind).or_default();
                    for member in members {
                        match RequisiteRef::from_value(member) {
                            Ok(r) => refs.push(r),
                            Err(msg) => errors.push(format!("{msg} (ID '{id}')")),
                        }
                    }
                }
                None => {
                    self.args.insert(key.to_string(), val.clone());
                }
            },
        }
    }
}

/// Compile (already verified) high data into low chunks, sorted by
/// [`order_chunks`].
///
/// Each `(id, module, function)` yields one chunk, or one chunk per entry
/// when the declaration carries `names`. A `names` entry is either a plain
/// name or `{name: [{arg: val}, ...]}` overriding arguments for that name.
pub fn compile_high_data(high: &HighData) -> Result<Vec<LowChunk>> {
    let mut errors = Vec::new();
    let mut pending = Vec::new();

    for (id, body) in high.iter() {
        if is_reserved_key(id) {
            continue;
        }
        let Value::Object(decl) = body else {
            errors.push(format!("ID '{id}' is not formed as a mapping"));
            continue;
        };
        let sls = sls_of(body).to_string();
        let env = env_of(body).to_string();
        let decl_reqs: Vec<(&String, &Value)> =
            decl.iter().filter(|(key, _)| is_decl_requisite(key)).collect();

        for (module, run) in decl.iter() {
            if is_reserved_key(module) || is_decl_requisite(module) {
                continue;
            }
            let Value::Array(run) = run else {
                errors.push(format!("State '{id}' in SLS '{sls}' is not formed as a list"));
                continue;
            };

            let mut funcs: Vec<String> = Vec::new();
            let mut names: Vec<Value> = Vec::new();
            let mut collected = Collected::default();

            for arg in run {
                match arg {
                    Value::String(fun) => {
                        if !funcs.contains(fun) {
                            funcs.push(fun.clone());
                        }
                    }
                    Value::Object(map) => {
                        for (key, val) in map {
                            if key == "names" {
                                for entry in val.as_array().into_iter().flatten() {
                                    if !names.contains(entry) {
                                        names.push(entry.clone());
                                    }
                                }
                            } else {
                                collected.absorb(id, key, val, &mut errors);
                            }
                        }
                    }
                    _ => {}
                }
            }

            for (key, reqs) in &decl_reqs {
                collected.absorb(id, key, reqs, &mut errors);
            }

            if funcs.is_empty() {
                errors.push(format!(
                    "Missing \"fun\" data in state '{module}' of ID '{id}' in SLS '{sls}'"
                ));
                continue;
            }

            let mut variants: Vec<(Collected, Option<u32>)> = Vec::new();
            if names.is_empty() {
                variants.push((collected, None));
            } else {
                for (index, entry) in names.iter().enumerate() {
                    let mut live = collected.clone();
                    match entry {
                        Value::Object(map) => {
                            let Some((low_name, overrides)) = map.iter().next() else {
                                continue;
                            };
                            live.name = Some(low_name.clone());
                            for item in overrides.as_array().into_iter().flatten() {
                                if let Value::Object(pairs) = item {
                                    for (key, val) in pairs {
                                        live.absorb(id, key, val, &mut errors);
                                    }
                                }
                            }
                        }
                        Value::String(s) => live.name = Some(s.clone()),
                        other => live.name = Some(other.to_string()),
                    }
                    variants.push((live, Some(index as u32 + 1)));
                }
            }

            for (live, name_order) in variants {
                for fun in &funcs {
                    pending.push(UnorderedChunk {
                        chunk: LowChunk {
                            state: module.clone(),
                            fun: fun.clone(),
                            name: live.name.clone().unwrap_or_else(|| id.clone()),
                            id: id.clone(),
                            sls: sls.clone(),
                            env: env.clone(),
                            order: 0.0,
                            requisites: live.requisites.clone(),
                            args: live.args.clone(),
                        },
                        order: live.order,
                        name_order,
                    });
                }
            }
        }
    }

    if !errors.is_empty() {
        return Err(StateError::Compilation(errors));
    }

    let chunks = order_chunks(pending);
    ensure_unique_tags(&chunks)?;
    Ok(chunks)
}

/// Assign final order keys and sort.
///
/// - no explicit order → `cap` (100 past the largest positive integer order);
/// - `first` → 0, `last` → `cap + 1_000_000`;
/// - negative orders count back from `last`;
/// - `names` entries add `name_order / 10000` to keep their listed order.
///
/// Ties are broken by `state + name + fun`; the sort is stable.
pub fn order_chunks(chunks: Vec<UnorderedChunk>) -> Vec<LowChunk> {
    let mut cap = 1.0_f64;
    for c in &chunks {
        if let Some(OrderHint::At(n)) = c.order {
            if n.fract() == 0.0 && n > cap - 1.0 && n > 0.0 {
                cap = n + 100.0;
            }
        }
    }

    let mut ordered: Vec<LowChunk> = chunks
        .into_iter()
        .map(|c| {
            let mut order = match c.order {
                None => cap,
                Some(OrderHint::First) => 0.0,
                Some(OrderHint::Last) => cap + LAST_OFFSET,
                Some(OrderHint::At(n)) => n,
            };
            if c.order.is_some() {
                if let Some(n) = c.name_order {
                    order += f64::from(n) / 10_000.0;
                }
                if order < 0.0 {
                    order += cap + LAST_OFFSET;
                }
            }
            LowChunk { order, ..c.chunk }
        })
        .collect();

    ordered.sort_by(|a, b| {
        a.order.total_cmp(&b.order).then_with(|| {
            let ka = format!("{}{}{}", a.state, a.name, a.fun);
            let kb = format!("{}{}{}", b.state, b.name, b.fun);
            ka.cmp(&kb)
        })
    });
    ordered
}

fn ensure_unique_tags(chunks: &[LowChunk]) -> Result<()> {
    let mut seen = HashSet::new();
    let mut errors = Vec::new();
    for chunk in chunks {
        let tag = chunk.tag();
        if !seen.insert(tag.clone()) {
            errors.push(format!(
                "Duplicate state '{tag}' in ID '{}' in SLS '{}'",
                chunk.id, chunk.sls
            ));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(StateError::Compilation(errors))
    }
}

/// Drop requisites of the given kinds from every chunk.
pub(crate) fn strip_requisites(chunks: &mut [LowChunk], disabled: &[RequisiteKind]) {
    if disabled.is_empty() {
        return;
    }
    for chunk in chunks.iter_mut() {
        chunk.requisites.retain(|kind, _| !disabled.contains(kind));
    }
}
