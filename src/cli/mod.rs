//! CLI module for devlog - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
