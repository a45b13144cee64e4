// src/config/mod.rs

//! `Highstate.toml`: the `[state]` switches and `[thorium]` pacing.
//!
//! [`model`] is what serde reads, [`validate`] turns it into a checked
//! [`ConfigFile`], [`loader`] finds and reads the file.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, resolve_config, CONFIG_ENV};
pub use model::{ConfigFile, RawConfigFile, RawThoriumSection, StateSection, ThoriumSection};
pub use validate::parse_duration;
