//! osc CLI library
//!
//! Exposes the command tree so integration tests can parse and run commands.

pub mod commands;
pub mod exit_code;
pub mod output;
