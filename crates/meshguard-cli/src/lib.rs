//! MeshGuard CLI library
//!
//! Components behind the `meshguard` binary: argument parsing, TOML
//! configuration, the interactive node console and the in-memory simulator.

pub mod cli;
pub mod commands;
pub mod config;
pub mod console;
pub mod simulate;

pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::{AppConfig, ConfigError};
