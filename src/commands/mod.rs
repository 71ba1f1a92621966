//! CLI command implementations for dssg-monitor.
//!
//! - `list-collectors`: print every resolvable collector identifier
//! - `test`: run a few collection ticks and print the resulting metrics
//! - `config`: write a sample configuration file

pub mod config;
pub mod list;

// Re-export command functions
pub use config::command_config;
pub use list::command_list_collectors;
pub use test::command_test;
