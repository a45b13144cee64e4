// src/exec/modules/mod.rs

//! Builtin state modules.
//!
//! - [`test`]: functions with fixed outcomes, used to exercise requisites.
//! - [`cmd`]: shell commands (`cmd.run`, `cmd.wait`).
//! - [`check`]: event checks for the continuous runtime.

pub mod check;
pub mod cmd;
pub mod test;

use super::backend::Registry;

pub(crate) fn register_builtins(reg: &mut Registry) {
    test::register(reg);
    cmd::register(reg);
    check::register(reg);
}
