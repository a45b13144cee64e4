// src/exec/mod.rs

//! State execution layer.
//!
//! - [`backend`] provides the [`ModuleRegistry`] trait the scheduler calls
//!   through, and the concrete [`Registry`] used in production, which tests
//!   can replace or extend with closures.
//! - [`task_runner`] runs shell commands and the `onlyif` / `unless` /
//!   `creates` / `check_cmd` checks.
//! - [`modules`] holds the builtin `test`, `cmd` and `check` state modules.

pub mod backend;
pub mod modules;
pub mod task_runner;

pub use backend::{ModuleRegistry, Registry, StateCall, StateFunction, StateReturn, WatchContext};
