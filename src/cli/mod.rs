//! CLI command definitions for taskboard
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

pub mod audit;

use audit::AuditArgs;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Task board REST server and maintenance tools
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<PathBuf>,

    /// Port for the HTTP listener (overrides config)
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Keep all data in memory; nothing survives a restart
    #[arg(long, global = true, conflicts_with = "database")]
    pub memory: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP server (default if no subcommand given)
    Serve,

    /// Check task/user assignment consistency, optionally repairing it
    Audit(AuditArgs),
}
