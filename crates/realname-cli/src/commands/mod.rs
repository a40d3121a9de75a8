//! CLI commands

pub mod diff;
