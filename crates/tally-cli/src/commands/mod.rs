//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Core commands (init, config) and shared utilities (open_db, load_config)
//! - `classify` - Single-description classification
//! - `serve` - Web server command
//! - `status` - Batch status
//! - `upload` - Local statement processing

pub mod classify;
pub mod core;
pub mod serve;
pub mod status;
pub mod upload;

// Re-export command functions for main.rs
pub use classify::*;
pub use core::*;
pub use serve::*;
pub use status::*;
pub use upload::*;
