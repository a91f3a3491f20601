//! Daemon subcommands

pub mod diagnostics;
pub mod root;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Check engine connectivity and image cache state
    Diagnostics,
}
