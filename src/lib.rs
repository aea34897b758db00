pub mod cli;
pub mod config;
pub mod error;
pub mod runtime;

pub use error::{MeshgateError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
