//! # epa-cli — Operational Binary
//!
//! Subcommand handlers for the `epa` binary: [`serve`] reads
//! [`config::ServeConfig`] from the environment and runs the API server,
//! [`check`] reports the resolved configuration without starting anything.

pub mod check;
pub mod config;
pub mod serve;
