// src/dag/mod.rs

//! Requisite resolution and scheduling.
//!
//! - [`graph`] holds the [`Plan`]: chunks with resolved requisite edges,
//!   checked for cycles and verified against the module registry.
//! - [`state_manager`] classifies a chunk's requisites into a [`RunStatus`].
//! - [`scheduler`] contains the recursive-descent executor that forces
//!   dependencies and records results.
//! - [`report`] defines [`ChunkResult`] and the [`RunningReport`].
//! - [`status`] defines [`RunStatus`].

pub mod graph;
pub mod report;
pub mod scheduler;
pub mod state_manager;
pub mod status;

pub use graph::Plan;
pub use report::{ChunkResult, RunningReport};
pub use scheduler::{Scheduler, SchedulerOptions};
pub use state_manager::RequisiteChecker;
pub use status::RunStatus;
