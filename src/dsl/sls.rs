// src/dsl/sls.rs

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::compiler::Compiler;
use crate::dag::{RunningReport, Scheduler};
use crate::errors::{Result, StateError};
use crate::low::{RequisiteKind, RequisiteRef};
use crate::types::HighData;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlsOptions {
    /// Every new state function requires the one declared before it.
    pub ordered: bool,
}

#[derive(Debug, Clone)]
struct Requisite {
    target: RequisiteRef,
    /// Injected by `ordered` rather than written by the caller.
    auto: bool,
}

#[derive(Debug, Clone, Default)]
struct ModuleDecl {
    fun: Option<String>,
    args: Vec<(String, Value)>,
    requisites: IndexMap<RequisiteKind, Vec<Requisite>>,
}

impl ModuleDecl {
    fn run_list(&self) -> Value {
        let mut run = Vec::new();
        if let Some(fun) = &self.fun {
            run.push(Value::String(fun.clone()));
        }
        for (key, value) in &self.args {
            run.push(single(key, value.clone()));
        }
        for (kind, reqs) in &self.requisites {
            if reqs.is_empty() {
                continue;
            }
            let refs = reqs.iter().map(|r| r.target.to_value()).collect();
            run.push(single(kind.as_str(), Value::Array(refs)));
        }
        Value::Array(run)
    }

    fn drop_auto_requires(&mut self) {
        for reqs in self.requisites.values_mut() {
            reqs.retain(|r| !r.auto);
        }
        self.requisites.retain(|_, reqs| !reqs.is_empty());
    }

    fn auto_requires(&self, target: &RequisiteRef) -> bool {
        self.requisites
            .values()
            .flatten()
            .any(|r| r.auto && r.target == *target)
    }
}

#[derive(Debug, Clone, Default)]
struct Declaration {
    modules: IndexMap<String, ModuleDecl>,
}

/// A state function as tracked for `ordered` documents.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FuncRef {
    id: String,
    module: String,
}

impl FuncRef {
    fn as_requisite(&self) -> RequisiteRef {
        RequisiteRef::state(self.module.clone(), self.id.clone())
    }
}

/// One SLS document under construction.
#[derive(Debug, Clone)]
pub struct Sls {
    name: String,
    env: String,
    options: SlsOptions,
    decls: IndexMap<String, Declaration>,
    extends: IndexMap<String, Declaration>,
    funcs: Vec<FuncRef>,
}

impl Sls {
    pub fn new(name: impl Into<String>, options: SlsOptions) -> Self {
        Self {
            name: name.into(),
            env: "base".to_string(),
            options,
            decls: IndexMap::new(),
            extends: IndexMap::new(),
            funcs: Vec::new(),
        }
    }

    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = env.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> SlsOptions {
        self.options
    }

    /// Ids of the pending declarations, in declaration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.decls.keys().map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.decls.contains_key(id) || self.extends.contains_key(id)
    }

    /// Handle on the declaration `id`, created on first use.
    pub fn state(&mut self, id: impl Into<String>) -> StateBuilder<'_> {
        let id = id.into();
        if !self.contains(&id) {
            self.decls.insert(id.clone(), Declaration::default());
        }
        StateBuilder { sls: self, id }
    }

    /// Turn the declaration `id` into an `__extend__` entry of this document.
    pub fn extend(&mut self, id: &str) -> Result<()> {
        if self.options.ordered {
            return Err(StateError::Dsl(
                "Cannot extend() after the ordered option was turned on!".to_string(),
            ));
        }
        let decl = self
            .decls
            .shift_remove(id)
            .ok_or_else(|| StateError::Dsl(format!("No state declaration '{id}' to extend")))?;
        self.extends.insert(id.to_string(), decl);
        Ok(())
    }

    /// The document as high data.
    pub fn to_high_data(&self) -> HighData {
        let mut high = HighData::new();
        if !self.extends.is_empty() {
            let ext = self
                .extends
                .iter()
                .map(|(id, decl)| single(id, self.body(decl)))
                .collect();
            high.insert("__extend__".to_string(), Value::Array(ext));
        }
        for (id, decl) in &self.decls {
            high.insert(id.clone(), self.body(decl));
        }
        high
    }

    /// Compile `id` with `compiler` and run it on `scheduler` right away.
    ///
    /// The declaration leaves the document first, together with its tracked
    /// function and the ordering requisite injected for it, so the final plan
    /// will not run it a second time. With `check`, any result that is not
    /// `true` is an error.
    pub fn execute(
        &mut self,
        id: &str,
        compiler: &Compiler,
        scheduler: &mut Scheduler,
        check: bool,
    ) -> Result<RunningReport> {
        let decl = self.take_for_execution(id)?;

        let mut high = HighData::new();
        high.insert(id.to_string(), self.body(&decl));
        let chunks = compiler.compile(high)?;
        let plan = scheduler.plan(chunks)?;

        info!(sls = %self.name, id, "executing state at compile time");
        let report = scheduler.call_chunks(&plan);
        scheduler.reset();

        if check {
            if let Some((tag, result)) = report.iter().find(|(_, r)| !r.succeeded()) {
                return Err(StateError::Dsl(format!(
                    "Failed executing low state at compile time:\n{tag}: {}",
                    result.comment
                )));
            }
        }
        Ok(report)
    }

    fn take_for_execution(&mut self, id: &str) -> Result<Declaration> {
        let Some(decl) = self.decls.get(id) else {
            return Err(StateError::Dsl(format!(
                "No state declaration '{id}' to execute"
            )));
        };

        let own: Vec<FuncRef> = decl
            .modules
            .keys()
            .map(|module| FuncRef {
                id: id.to_string(),
                module: module.clone(),
            })
            .collect();
        for func in &own {
            let target = func.as_requisite();
            let dependent = self.decls.iter().find(|(other, d)| {
                *other != id && d.modules.values().any(|m| m.auto_requires(&target))
            });
            if let Some((other, d)) = dependent {
                let module = d.modules.keys().next().map(String::as_str).unwrap_or("");
                return Err(StateError::Dsl(format!(
                    "Cannot run state({}: {id}) that is required by a runtime state({module}: {other}), at compile time.",
                    func.module
                )));
            }
        }

        let Some(mut decl) = self.decls.shift_remove(id) else {
            return Err(StateError::Dsl(format!(
                "No state declaration '{id}' to execute"
            )));
        };
        self.funcs.retain(|f| f.id != id);
        for module in decl.modules.values_mut() {
            module.drop_auto_requires();
        }
        debug!(id, "declaration removed from the document");
        Ok(decl)
    }

    fn body(&self, decl: &Declaration) -> Value {
        let mut body = Map::new();
        for (module, m) in &decl.modules {
            body.insert(module.clone(), m.run_list());
        }
        body.insert("__sls__".to_string(), Value::String(self.name.clone()));
        body.insert("__env__".to_string(), Value::String(self.env.clone()));
        Value::Object(body)
    }

    fn decl_mut(&mut self, id: &str) -> &mut Declaration {
        if self.extends.contains_key(id) {
            return self.extends.entry(id.to_string()).or_default();
        }
        self.decls.entry(id.to_string()).or_default()
    }
}

/// Handle on one state declaration.
#[derive(Debug)]
pub struct StateBuilder<'a> {
    sls: &'a mut Sls,
    id: String,
}

impl<'a> StateBuilder<'a> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Handle on the state module `module` of this declaration.
    pub fn module(self, module: impl Into<String>) -> ModuleBuilder<'a> {
        let module = module.into();
        self.sls
            .decl_mut(&self.id)
            .modules
            .entry(module.clone())
            .or_default();
        ModuleBuilder {
            sls: self.sls,
            id: self.id,
            module,
        }
    }
}

/// Handle on one state module of a declaration.
#[derive(Debug)]
pub struct ModuleBuilder<'a> {
    sls: &'a mut Sls,
    id: String,
    module: String,
}

impl<'a> ModuleBuilder<'a> {
    fn decl(&mut self) -> &mut ModuleDecl {
        let module = self.module.clone();
        self.sls.decl_mut(&self.id).modules.entry(module).or_default()
    }

    /// Set the state function. A module holds a single function.
    pub fn function(mut self, fun: impl Into<String>) -> Result<Self> {
        let fun = fun.into();
        let current = self.decl().fun.clone();
        match current {
            Some(existing) if existing == fun => return Ok(self),
            Some(existing) => {
                return Err(StateError::Dsl(format!(
                    "Multiple state functions ({fun}, {existing}) not allowed in state module ({}) of '{}'",
                    self.module, self.id
                )))
            }
            None => {}
        }
        self.decl().fun = Some(fun);

        if self.sls.options.ordered {
            let this = FuncRef {
                id: self.id.clone(),
                module: self.module.clone(),
            };
            if let Some(prev) = self.sls.funcs.last().filter(|f| **f != this).cloned() {
                self.push_requisite(RequisiteKind::REQUIRE, prev.as_requisite(), true);
            }
            self.sls.funcs.push(this);
        }
        Ok(self)
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        let args = &mut self.decl().args;
        match args.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => args.push((key, value)),
        }
        self
    }

    /// Add a requisite of any kind, including the `_in` forms.
    pub fn requisite(mut self, kind: RequisiteKind, target: RequisiteRef) -> Self {
        self.push_requisite(kind, target, false);
        self
    }

    pub fn require(self, target: RequisiteRef) -> Self {
        self.requisite(RequisiteKind::REQUIRE, target)
    }

    pub fn watch(self, target: RequisiteRef) -> Self {
        self.requisite(RequisiteKind::WATCH, target)
    }

    pub fn prereq(self, target: RequisiteRef) -> Self {
        self.requisite(RequisiteKind::PREREQ, target)
    }

    pub fn onfail(self, target: RequisiteRef) -> Self {
        self.requisite(RequisiteKind::ONFAIL, target)
    }

    pub fn onchanges(self, target: RequisiteRef) -> Self {
        self.requisite(RequisiteKind::ONCHANGES, target)
    }

    pub fn listen(self, target: RequisiteRef) -> Self {
        self.requisite(RequisiteKind::LISTEN, target)
    }

    fn push_requisite(&mut self, kind: RequisiteKind, target: RequisiteRef, auto: bool) {
        self.decl()
            .requisites
            .entry(kind)
            .or_default()
            .push(Requisite { target, auto });
    }
}

fn single(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}
