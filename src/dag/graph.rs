// src/dag/graph.rs

//! The execution plan: compiled chunks with every requisite reference
//! resolved to chunk indices.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::errors::{Result, StateError};
use crate::exec::ModuleRegistry;
use crate::low::{LowChunk, Pattern, RequisiteKind, RequisiteRef, Tag};

/// Compiled chunks plus resolved requisite edges.
///
/// Built once per compilation; the scheduler only ever reads it.
#[derive(Debug, Clone)]
pub struct Plan {
    chunks: Vec<LowChunk>,
    tags: Vec<Tag>,
    index: HashMap<Tag, usize>,
    /// Per chunk: requisite kind -> indices of the chunks it points at.
    deps: Vec<IndexMap<RequisiteKind, Vec<usize>>>,
    /// Per chunk: verification problems reported when the chunk is called.
    issues: Vec<Vec<String>>,
}

impl Plan {
    /// Resolve requisites, reject cycles and verify chunks against
    /// `registry`.
    ///
    /// Errors:
    /// - a reference matching nothing: [`StateError::MissingRequisite`]
    /// - a literal reference matching several declarations, or a chunk whose
    ///   state module is not registered: [`StateError::Compilation`]
    /// - a requisite cycle: [`StateError::RecursiveRequisite`]
    ///
    /// Unknown functions of a registered module and missing required
    /// arguments are not fatal; see [`Plan::issues`].
    pub fn build(chunks: Vec<LowChunk>, registry: &dyn ModuleRegistry) -> Result<Self> {
        let unknown: Vec<String> = chunks
            .iter()
            .filter(|c| !registry.has_module(&c.state))
            .map(|c| {
                format!(
                    "State '{}' in SLS '{}' is not available (ID '{}')",
                    c.full_name(),
                    c.sls,
                    c.id
                )
            })
            .collect();
        if !unknown.is_empty() {
            return Err(StateError::Compilation(unknown));
        }

        let mut plan = Self::unresolved(chunks);
        plan.resolve_references(registry)?;
        plan.check_cycles()?;
        plan.issues = verify_chunks(&plan.chunks, registry);

        debug!(chunks = plan.len(), "execution plan built");
        Ok(plan)
    }

    /// A plan whose chunks carry no requisites worth resolving (the
    /// listener chunks of the listen pass).
    pub(crate) fn unresolved(chunks: Vec<LowChunk>) -> Self {
        let tags: Vec<Tag> = chunks.iter().map(LowChunk::tag).collect();
        let index = tags
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();
        let n = chunks.len();
        Self {
            chunks,
            tags,
            index,
            deps: vec![IndexMap::new(); n],
            issues: vec![Vec::new(); n],
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[LowChunk] {
        &self.chunks
    }

    pub fn chunk(&self, idx: usize) -> &LowChunk {
        &self.chunks[idx]
    }

    pub fn tag(&self, idx: usize) -> &Tag {
        &self.tags[idx]
    }

    pub fn index_of(&self, tag: &Tag) -> Option<usize> {
        self.index.get(tag).copied()
    }

    /// Chunks `idx` depends on through `kind`, in reference order.
    pub fn deps(&self, idx: usize, kind: RequisiteKind) -> &[usize] {
        self.deps[idx]
            .get(&kind)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Verification problems of chunk `idx` (empty when it is callable).
    pub fn issues(&self, idx: usize) -> &[String] {
        &self.issues[idx]
    }

    fn resolve_references(&mut self, registry: &dyn ModuleRegistry) -> Result<()> {
        let mut all = Vec::with_capacity(self.chunks.len());
        for (idx, chunk) in self.chunks.iter().enumerate() {
            let has_mod_watch = registry.has_mod_watch(&chunk.state);
            let mut resolved: IndexMap<RequisiteKind, Vec<usize>> = IndexMap::new();

            for (&kind, refs) in &chunk.requisites {
                if !kind.is_scheduled() {
                    continue;
                }
                let target_kind = match kind {
                    RequisiteKind::WATCH if !has_mod_watch => RequisiteKind::REQUIRE,
                    RequisiteKind::WATCH_ANY if !has_mod_watch => RequisiteKind::REQUIRE_ANY,
                    other => other,
                };
                for req in refs {
                    let matched = self.resolve(idx, kind, req)?;
                    resolved.entry(target_kind).or_default().extend(matched);
                }
            }
            all.push(resolved);
        }
        self.deps = all;
        Ok(())
    }

    /// Indices of the chunks `req` points at, seen from chunk `idx`.
    fn resolve(&self, idx: usize, kind: RequisiteKind, req: &RequisiteRef) -> Result<Vec<usize>> {
        let low = &self.chunks[idx];
        let matched: Vec<usize> = match req {
            RequisiteRef::Sls { sls, id } => {
                let sls_pat = Pattern::new(sls);
                let id_pat = id.as_deref().map(Pattern::new);
                self.chunks
                    .iter()
                    .enumerate()
                    .filter(|(j, c)| {
                        *j != idx
                            && sls_pat.matches(&c.sls)
                            && id_pat.as_ref().is_none_or(|p| p.matches(&c.id))
                    })
                    .map(|(j, _)| j)
                    .collect()
            }
            RequisiteRef::Id { module, target } => {
                let pat = Pattern::new(target);
                let module_ok = |c: &LowChunk| module.as_deref().is_none_or(|m| m == c.state);
                let by_id: Vec<usize> = self
                    .chunks
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| module_ok(c) && pat.matches(&c.id))
                    .map(|(j, _)| j)
                    .collect();
                let matched = if by_id.is_empty() {
                    self.chunks
                        .iter()
                        .enumerate()
                        .filter(|(_, c)| module_ok(c) && pat.matches(&c.name))
                        .map(|(j, _)| j)
                        .collect()
                } else {
                    by_id
                };

                if pat.is_literal() {
                    let ids: HashSet<&str> =
                        matched.iter().map(|&j| self.chunks[j].id.as_str()).collect();
                    if ids.len() > 1 {
                        let mut ids: Vec<&str> = ids.into_iter().collect();
                        ids.sort_unstable();
                        return Err(StateError::compilation(format!(
                            "Requisite {kind} {req} of ID '{}' in SLS '{}' is ambiguous, it matches IDs: {}",
                            low.id,
                            low.sls,
                            ids.join(", ")
                        )));
                    }
                }
                matched
            }
        };

        if matched.is_empty() {
            return Err(StateError::MissingRequisite {
                requisite: format!("{kind} {req}"),
                id: low.id.clone(),
                sls: low.sls.clone(),
            });
        }
        Ok(matched)
    }

    /// Reject requisite cycles. `prerequired` edges are back-edges of
    /// `prereq` and are left out.
    fn check_cycles(&self) -> Result<()> {
        // Edge direction: chunk -> dependency.
        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
        for idx in 0..self.chunks.len() {
            graph.add_node(idx);
        }
        for (idx, kinds) in self.deps.iter().enumerate() {
            for (&kind, targets) in kinds {
                if kind == RequisiteKind::PREREQUIRED {
                    continue;
                }
                for &dep in targets {
                    graph.add_edge(idx, dep, ());
                }
            }
        }

        let self_loop = graph.nodes().any(|n| graph.contains_edge(n, n));
        if !self_loop && toposort(&graph, None).is_ok() {
            return Ok(());
        }

        let chain = find_cycle(&graph);
        let source = chain.first().copied().unwrap_or(0);
        let target = chain.get(1).copied().unwrap_or(source);
        let (src, tgt) = (&self.chunks[source], &self.chunks[target]);
        let err = StateError::RecursiveRequisite {
            source_sls: src.sls.clone(),
            source_id: src.id.clone(),
            target_sls: tgt.sls.clone(),
            target_id: tgt.id.clone(),
            chain: chain.iter().map(|&i| self.chunks[i].label()).collect(),
        };
        tracing::error!(error = %err, "recursive requisite");
        Err(err)
    }
}

/// Shortest cycle through the lowest-numbered node of the first cyclic
/// component, as a closed walk `[a, b, ..., a]`.
fn find_cycle(graph: &DiGraphMap<usize, ()>) -> Vec<usize> {
    let Some(component) = tarjan_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .min_by_key(|scc| scc.iter().copied().min().unwrap_or(usize::MAX))
    else {
        return Vec::new();
    };
    let members: HashSet<usize> = component.iter().copied().collect();
    let start = component.iter().copied().min().unwrap_or(0);

    if graph.contains_edge(start, start) {
        return vec![start, start];
    }

    // BFS inside the component back to `start`.
    let mut parent: HashMap<usize, usize> = HashMap::new();
    let mut queue = VecDeque::from([start]);
    while let Some(node) = queue.pop_front() {
        let mut next: Vec<usize> = graph
            .neighbors(node)
            .filter(|n| members.contains(n))
            .collect();
        next.sort_unstable();
        for n in next {
            if n == start {
                let mut path = vec![node];
                let mut cur = node;
                while cur != start {
                    match parent.get(&cur) {
                        Some(&p) => cur = p,
                        None => break,
                    }
                    path.push(cur);
                }
                path.reverse();
                path.push(start);
                return path;
            }
            if n != start && !parent.contains_key(&n) {
                parent.insert(n, node);
                queue.push_back(n);
            }
        }
    }
    vec![start, start]
}

/// Per-chunk checks against the registry: the function must exist and every
/// argument it requires must be set.
fn verify_chunks(chunks: &[LowChunk], registry: &dyn ModuleRegistry) -> Vec<Vec<String>> {
    chunks
        .iter()
        .map(|chunk| {
            let Some(func) = registry.lookup(&chunk.state, &chunk.fun) else {
                return vec![
                    StateError::UnknownStateModule {
                        state: chunk.state.clone(),
                        fun: chunk.fun.clone(),
                    }
                    .to_string(),
                ];
            };
            func.required_args()
                .iter()
                .filter(|arg| match arg.as_str() {
                    "name" => chunk.name.is_empty(),
                    other => !chunk.args.contains_key(other),
                })
                .map(|arg| format!("Missing parameter {arg} for state {}", chunk.full_name()))
                .collect()
        })
        .collect()
}
