//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - init / sync / status: backend setup and git synchronization
//! - create / show / list / search: entry inspection
//! - note / complete / close / delete: entry lifecycle
//! - stats: aggregate counts

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// devlog - development log tracker with pluggable storage
#[derive(Parser, Debug)]
#[command(name = "devlog")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Prepare the configured storage backend
    Init,

    /// Create a new entry
    Create {
        /// Entry title
        title: String,

        /// Entry type (feature, bugfix, task, refactor, docs)
        #[arg(short = 't', long = "type", default_value = "task")]
        devlog_type: String,

        /// Priority (low, medium, high, critical)
        #[arg(short, long)]
        priority: Option<String>,

        /// Longer description
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Show one entry
    Show {
        /// Entry id (`12` or `#12`)
        id: String,

        /// Print the full entry as JSON
        #[arg(long)]
        json: bool,
    },

    /// List entries, most recently updated first
    List {
        /// Filter by status
        #[arg(short, long)]
        status: Option<String>,

        /// Filter by type
        #[arg(short = 't', long = "type")]
        devlog_type: Option<String>,

        /// Filter by priority
        #[arg(short, long)]
        priority: Option<String>,
    },

    /// Full-text search
    Search {
        /// Search text
        query: String,
    },

    /// Append a note to an entry
    Note {
        /// Entry id
        id: String,

        /// Note text
        content: String,

        /// Note category (progress, issue, solution, idea, reminder, feedback)
        #[arg(long, default_value = "progress")]
        category: String,
    },

    /// Mark an entry done
    Complete {
        /// Entry id
        id: String,

        /// Completion summary
        summary: Option<String>,
    },

    /// Close an entry without completing it
    Close {
        /// Entry id
        id: String,

        /// Reason for closing
        reason: Option<String>,
    },

    /// Delete an entry
    Delete {
        /// Entry id
        id: String,
    },

    /// Counts by status, type and priority
    Stats,

    /// Pull, resolve conflicts and push (git storage)
    Sync,

    /// Compare the local clone with its remote (git storage)
    Status,
}
