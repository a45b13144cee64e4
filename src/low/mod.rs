// src/low/mod.rs

//! The low-data model.
//!
//! - [`chunk`] holds [`LowChunk`], the compiled unit of work, and its [`Tag`].
//! - [`requisite`] holds the requisite keywords and references between chunks.
//! - [`pattern`] holds the shell-style matching used by references.

pub mod chunk;
pub mod pattern;
pub mod requisite;

pub use chunk::{LowChunk, Tag, TagParts, TAG_SEP};
pub use pattern::{glob_match, Pattern};
pub use requisite::{RequisiteForm, RequisiteKind, RequisiteRef, RequisiteType};
