// src/compiler/mod.rs

//! The high-data compiler.
//!
//! [`Compiler::compile`] runs the full pipeline over one rendered document:
//!
//! 1. [`pad_funcs`] and (optionally) [`apply_auto_order`]
//! 2. [`reconcile_extend`] + [`verify_high`] (all errors collected)
//! 3. [`requisite_in`] then [`apply_exclude`]
//! 4. [`compile_high_data`], which sorts through [`order_chunks`]
//!
//! Per-chunk checks against the module registry happen later, when the
//! execution plan is built (`dag::Plan::build`).

pub mod compile;
pub mod extend;
pub mod high;

use tracing::{debug, warn};

use crate::errors::{Result, StateError};
use crate::low::{LowChunk, RequisiteKind};
use crate::types::HighData;

pub use compile::{compile_high_data, order_chunks, UnorderedChunk};
pub use extend::{
    apply_exclude, find_name, find_sls_ids, reconcile_extend, requisite_in, state_args,
};
pub use high::{apply_auto_order, pad_funcs, verify_high, AUTO_ORDER_START};

/// Compiler switches, usually taken from the `[state]` config section.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Give declarations without an explicit `order` their document order.
    pub state_auto_order: bool,
    /// Requisite keywords to ignore (e.g. `["watch_in"]`).
    pub disabled_requisites: Vec<String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            state_auto_order: true,
            disabled_requisites: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Compiler {
    options: CompileOptions,
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Compile rendered high data into an ordered list of chunks.
    ///
    /// Structural errors, failed extends and malformed inverse requisites
    /// are all reported together as one [`StateError::Compilation`].
    pub fn compile(&self, mut high: HighData) -> Result<Vec<LowChunk>> {
        pad_funcs(&mut high);
        if self.options.state_auto_order {
            apply_auto_order(&mut high, AUTO_ORDER_START);
        }

        let mut errors = reconcile_extend(&mut high);
        errors.extend(verify_high(&high));
        if !errors.is_empty() {
            return Err(StateError::Compilation(errors));
        }

        let req_in_errors = requisite_in(&mut high, &self.options.disabled_requisites);
        if !req_in_errors.is_empty() {
            return Err(StateError::Compilation(req_in_errors));
        }
        apply_exclude(&mut high);

        let mut chunks = compile_high_data(&high)?;
        let disabled = self.disabled_kinds();
        compile::strip_requisites(&mut chunks, &disabled);

        debug!(chunks = chunks.len(), "compiled high data");
        Ok(chunks)
    }

    fn disabled_kinds(&self) -> Vec<RequisiteKind> {
        self.options
            .disabled_requisites
            .iter()
            .filter_map(|name| match RequisiteKind::parse(name) {
                Some(kind) if !kind.is_inverse() => Some(kind),
                Some(_) => None,
                None => {
                    warn!(requisite = %name, "unknown requisite in disabled_requisites");
                    None
                }
            })
            .inspect(|kind| warn!("The {kind} requisite has been disabled, Ignoring."))
            .collect()
    }
}
