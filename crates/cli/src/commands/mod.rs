//! CLI Commands

pub mod auth;
pub mod run;
pub mod status;
pub mod specs;
