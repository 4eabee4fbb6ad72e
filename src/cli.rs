// CLI argument parsing using clap.
// Defines the command-line interface for prwiki.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "prwiki")]
#[command(about = "GitHub-PR-backed comment service and data mirror for a study-group wiki")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the comment API server
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8787", env = "PRWIKI_PORT")]
        port: u16,
    },

    /// Sync merged-PR discussion from GitHub and regenerate the static
    /// data files the site loads
    Mirror {
        /// Directory holding per-PR snapshots (pr-<n>.json)
        #[arg(long, default_value = "data/prs")]
        data_dir: String,

        /// Directory the derived artifacts are written to
        #[arg(long, default_value = "public/data")]
        output_dir: String,
    },
}
