//! Specdeck CLI
//!
//! HTTP client and command implementations for the `specdeck` binary.

pub mod client;
pub mod commands;
pub mod output;
