//! Shared plumbing for the segq crates
//!
//! - `config`: TOML + environment configuration with validation
//! - `error`: error taxonomy for the ambient layer
//! - `logging`: tracing subscriber setup

pub mod config;
pub mod error;
pub mod logging;

pub use config::{ConfigError, ConfigManager, LoggingConfig, QueueConfig, SegqConfig};
pub use error::*;
pub use logging::init_tracing;

/// Layout and sizing constants
pub mod constants {
    /// Slots per segment unless a queue picks its own
    pub const DEFAULT_SEGMENT_CAPACITY: usize = 1024;

    /// Segments pre-allocated by a fresh pool
    pub const DEFAULT_INITIAL_POOL_BLOCKS: usize = 2;

    /// Free segments a pool keeps before releasing memory
    pub const DEFAULT_MAX_FREE_BLOCKS: usize = 16;
}
