// src/dag/state_manager.rs

//! Requisite status classification for one chunk.

use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::debug;

use crate::dag::graph::Plan;
use crate::dag::report::RunningReport;
use crate::dag::status::RunStatus;
use crate::low::{RequisiteForm, RequisiteKind, RequisiteType};

/// Per-dependency observation, folded into one [`RunStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Stat {
    Unmet,
    Met,
    Fail,
    Change,
    Pre,
    Premet,
    Onfail,
    Onchanges,
    Onchangesmet,
}

/// Resolved dependencies of one chunk, keyed by requisite kind.
pub type ResolvedReqs = IndexMap<RequisiteKind, Vec<usize>>;

/// A read-only view over the two reports for classifying requisites.
pub struct RequisiteChecker<'a> {
    plan: &'a Plan,
    running: &'a RunningReport,
    pre: &'a RunningReport,
}

impl<'a> RequisiteChecker<'a> {
    pub fn new(plan: &'a Plan, running: &'a RunningReport, pre: &'a RunningReport) -> Self {
        Self { plan, running, pre }
    }

    /// Kinds consulted for a chunk; `prerequired` only when the chunk is
    /// not itself being evaluated speculatively.
    pub fn kinds(with_prerequired: bool) -> Vec<RequisiteKind> {
        let mut kinds = RequisiteKind::SCHEDULED.to_vec();
        if with_prerequired {
            kinds.push(RequisiteKind::PREREQUIRED);
        }
        kinds
    }

    /// Classify chunk `idx`, returning the status and the dependencies that
    /// were consulted.
    pub fn check(&self, idx: usize, with_prerequired: bool) -> (RunStatus, ResolvedReqs) {
        let mut reqs = ResolvedReqs::new();
        let mut fun_stats: HashSet<Stat> = HashSet::new();

        for kind in Self::kinds(with_prerequired) {
            let deps = self.plan.deps(idx, kind);
            if deps.is_empty() {
                continue;
            }
            reqs.insert(kind, deps.to_vec());
            fun_stats.extend(self.kind_stats(kind, deps));
        }

        let status = aggregate(&fun_stats);
        debug!(
            chunk = %self.plan.tag(idx),
            status = %status,
            "requisite status"
        );
        (status, reqs)
    }

    fn kind_stats(&self, kind: RequisiteKind, deps: &[usize]) -> HashSet<Stat> {
        let report = if kind.reads_pre_map() {
            self.pre
        } else {
            self.running
        };
        let ty = kind.ty();
        let mut stats = HashSet::new();

        for &dep in deps {
            let Some(res) = report.get(self.plan.tag(dep)) else {
                stats.insert(Stat::Unmet);
                continue;
            };

            if ty == RequisiteType::Onfail {
                if res.result == Some(true) {
                    stats.insert(Stat::Onfail);
                    continue;
                }
            } else if res.result == Some(false) {
                stats.insert(Stat::Fail);
                continue;
            }

            if ty == RequisiteType::Onchanges {
                stats.insert(if res.changes.is_empty() {
                    Stat::Onchanges
                } else {
                    Stat::Onchangesmet
                });
                continue;
            }
            if ty == RequisiteType::Watch && !res.changes.is_empty() {
                stats.insert(Stat::Change);
                continue;
            }

            match ty {
                RequisiteType::Prereq => {
                    if res.result.is_none() {
                        stats.insert(Stat::Premet);
                        if res.state_ran {
                            stats.insert(Stat::Met);
                        }
                    } else {
                        stats.insert(Stat::Pre);
                    }
                }
                RequisiteType::Prerequired if res.result.is_some() => {}
                _ => {
                    if res.state_ran {
                        stats.insert(Stat::Met);
                    }
                }
            }
        }

        if kind.form() == RequisiteForm::Any || kind == RequisiteKind::ONFAIL {
            if stats.contains(&Stat::Met) || stats.contains(&Stat::Change) {
                stats.remove(&Stat::Fail);
            }
            if stats.contains(&Stat::Onchangesmet) {
                stats.remove(&Stat::Onchanges);
                stats.remove(&Stat::Fail);
            }
            if stats.contains(&Stat::Onfail) && stats.contains(&Stat::Met) {
                stats.remove(&Stat::Onfail);
            }
        }
        if kind.form() == RequisiteForm::All && stats.contains(&Stat::Onfail) {
            stats.remove(&Stat::Met);
        }
        stats
    }
}

fn aggregate(stats: &HashSet<Stat>) -> RunStatus {
    let has = |s: Stat| stats.contains(&s);
    if has(Stat::Unmet) {
        RunStatus::Unmet
    } else if has(Stat::Fail) {
        RunStatus::Fail
    } else if has(Stat::Pre) {
        if has(Stat::Premet) {
            RunStatus::Met
        } else {
            RunStatus::Pre
        }
    } else if has(Stat::Onfail) && !has(Stat::Onchangesmet) {
        RunStatus::Onfail
    } else if has(Stat::Onchanges) && !has(Stat::Onchangesmet) {
        RunStatus::Onchanges
    } else if has(Stat::Change) {
        RunStatus::Change
    } else if has(Stat::Onfail) {
        RunStatus::Onfail
    } else {
        RunStatus::Met
    }
}
