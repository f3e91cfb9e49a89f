//! Shared identifiers, errors, configuration, and SQL templating for quarry
//! crates.
//!
//! Architecture role:
//! - defines the hierarchical [`Identifier`] used as the handle for every
//!   plan node and generated table/view name
//! - provides the common [`CompilerError`] / [`Result`] contracts
//! - hosts the compiler configuration and the named-placeholder
//!   [`StringTemplate`] used for all SQL text synthesis
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`template`]

pub mod config;
pub mod error;
pub mod ids;
pub mod template;

pub use config::CompilerConfig;
pub use error::{CompilerError, Result};
pub use ids::Identifier;
pub use template::StringTemplate;
