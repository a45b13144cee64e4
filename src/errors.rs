// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Compilation and resolution errors are fatal to a whole pass: they mean the
//! plan itself is broken. Failures of individual state functions never show
//! up here; they are recorded in the running report instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    /// The high data could not be turned into valid chunks.
    #[error("Compilation error:\n{}", .0.join("\n"))]
    Compilation(Vec<String>),

    /// A requisite names an id/name/sls that is not part of the plan.
    #[error(
        "Requisite {requisite} of ID '{id}' in SLS '{sls}' was not found in the compiled plan"
    )]
    MissingRequisite {
        requisite: String,
        id: String,
        sls: String,
    },

    /// A requisite chain leads back to a chunk that is still being resolved.
    #[error(
        "A recursive requisite was found, SLS '{source_sls}' ID '{source_id}' -> SLS '{target_sls}' ID '{target_id}'{}",
        fmt_chain(.chain)
    )]
    RecursiveRequisite {
        source_sls: String,
        source_id: String,
        target_sls: String,
        target_id: String,
        chain: Vec<String>,
    },

    /// No function is registered for `state.fun`.
    #[error("State '{state}.{fun}' was not found")]
    UnknownStateModule { state: String, fun: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("DSL error: {0}")]
    Dsl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn fmt_chain(chain: &[String]) -> String {
    if chain.is_empty() {
        String::new()
    } else {
        format!(" (chain: {})", chain.join(" -> "))
    }
}

impl StateError {
    /// Convenience for a compilation error carrying a single message.
    pub fn compilation(msg: impl Into<String>) -> Self {
        StateError::Compilation(vec![msg.into()])
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, StateError>;
