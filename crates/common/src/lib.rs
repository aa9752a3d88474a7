//! Specdeck Common Library
//!
//! Run state, output parsing, and spec discovery shared by the Specdeck
//! server and CLI.

pub mod discovery;
pub mod domain;
pub mod error;
pub mod events;
pub mod lines;
pub mod relay;
pub mod state;
pub mod types;

// Re-export commonly used types
pub use discovery::discover_tests;
pub use domain::{base_url, normalize_base_domain};
pub use error::{Error, Result};
pub use events::OutputParser;
pub use relay::{AuthRelay, RelayPhase, RelayView};
pub use state::{RunController, RunPhase, RunState};
pub use types::*;

/// Specdeck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default target host for runs
pub const DEFAULT_BASE_DOMAIN: &str = "app.bullet-ai.com";
