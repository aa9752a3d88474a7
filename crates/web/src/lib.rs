//! Specdeck Runner Server
//!
//! Spawns the browser test runner, turns its output into live run state, and
//! serves that state over HTTP together with a small dashboard.

pub mod config;
pub mod dashboard;
pub mod server;
pub mod supervisor;

pub use config::{CommandConfig, RunnerConfig};
pub use server::{AppState, WebServer};
pub use supervisor::Supervisor;
