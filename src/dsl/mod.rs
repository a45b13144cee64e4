// src/dsl/mod.rs

//! Imperative front-end that builds high data declaration by declaration.
//!
//! ```ignore
//! let mut sls = Sls::new("web", SlsOptions { ordered: true });
//! sls.state("nginx").module("pkg").function("installed")?;
//! sls.state("conf")
//!     .module("file")
//!     .function("managed")?
//!     .arg("name", "/etc/nginx/nginx.conf")
//!     .watch(RequisiteRef::state("pkg", "nginx"));
//! let high = sls.to_high_data();
//! ```
//!
//! A declaration can also be run on the spot with [`Sls::execute`]; it is
//! then dropped from the document so the final plan does not run it again.

pub mod sls;

pub use sls::{ModuleBuilder, Sls, SlsOptions, StateBuilder};
