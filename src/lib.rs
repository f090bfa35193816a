//! espanso-companion library.
//!
//! Readiness handshake, status caching and control of the espanso daemon,
//! plus phrase-suggestion handling and debounced snippet refresh. The binary
//! in `main.rs` is a thin command-line front end over [`AppContext`].

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod refresh;
pub mod service;
pub mod suggestions;

// Re-export commonly used types for convenience
pub use cli::{CliRunner, CommandExecutor, CommandResult};
pub use config::Config;
pub use context::{AppContext, DashboardStatus};
pub use error::{CompanionError, Result};
pub use service::{Report, ServiceHandshake, StatusCache, StepOutcome, StepStatus};
