//! procpool configuration
//!
//! One [`PoolConfig`] value carries every feature toggle the allocator and the
//! spare pool consult. It is loaded once (file + environment), validated, and
//! handed to the browser root at construction.

pub mod error;
pub mod loader;
pub mod types;

pub use error::{ConfigError, Result};
pub use loader::ConfigLoader;
pub use types::{LoggingConfig, Platform, PoolConfig, ProcessConfig, SpareConfig};
