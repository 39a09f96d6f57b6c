use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "veristream")]
#[command(about = "Inspect, check and list veristream validation scenarios")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List discoverable scenarios with their description fields.
    List {
        /// Directories to scan instead of the default search paths.
        paths: Vec<PathBuf>,

        /// Also write the listing to this file.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Print the listing as JSON instead of structure text.
        #[arg(long)]
        json: bool,
    },

    /// Load scenarios and print the parsed action queue; exits non-zero
    /// on loader errors.
    Check {
        /// Colon-separated scenario references (paths or basenames).
        scenarios: String,
    },

    /// Print registered action types and their parameters.
    Types {
        /// Restrict to a comma-separated selection of type names.
        selection: Option<String>,
    },
}
