use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::config::GeneratorOverrides;

#[derive(Debug, Parser)]
#[command(
    name = "contextual",
    about = "Index local folders and search them in plain language"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true, env = "CONTEXTUAL_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(flatten)]
    pub generator: GeneratorArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Text-generation endpoint overrides. Unset values fall back to the
/// persisted settings, then to built-in defaults.
#[derive(Debug, Clone, Default, Args)]
pub struct GeneratorArgs {
    /// Base URL of the Ollama-compatible chat endpoint
    #[arg(long, global = true, env = "CONTEXTUAL_GENERATOR_URL")]
    pub generator_url: Option<String>,

    /// Model name sent with every generation request
    #[arg(long, global = true, env = "CONTEXTUAL_GENERATOR_MODEL")]
    pub generator_model: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, global = true, env = "CONTEXTUAL_GENERATOR_TIMEOUT")]
    pub generator_timeout: Option<u64>,
}

impl GeneratorArgs {
    pub fn overrides(&self) -> GeneratorOverrides {
        GeneratorOverrides {
            url: self.generator_url.clone(),
            model: self.generator_model.clone(),
            timeout_secs: self.generator_timeout,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the daemon on a Unix socket
    Serve(ServeArgs),
    /// Index a folder and everything below it
    Index(IndexArgs),
    /// Search the index
    Search(SearchArgs),
    /// Rebuild the content index from the registry
    Rebuild,
    /// List indexed roots
    Roots(JsonArgs),
    /// List the direct children of an indexed folder
    Ls(LsArgs),
    /// Show index statistics
    Status(JsonArgs),
    /// Manage persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Send one request to a running daemon and print the response
    Request(RequestArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

#[derive(Debug, Parser)]
pub struct ServeArgs {
    /// Socket path (defaults to contextual.sock in the data directory)
    #[arg(long)]
    pub socket: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// Folder to index
    pub path: PathBuf,
}

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// Filter text, or a natural-language query with --ai
    pub query: String,

    /// Resolve the query through the intent parser first
    #[arg(long)]
    pub ai: bool,

    /// Only return results inside this folder
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct LsArgs {
    /// Folder to list
    pub folder: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct JsonArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print a setting
    Get {
        key: String,
    },
    /// Persist a setting
    Set {
        key: String,
        value: String,
    },
    /// Remove a setting (revert to default)
    Unset {
        key: String,
    },
    /// List persisted settings
    List(JsonArgs),
}

#[derive(Debug, Parser)]
pub struct RequestArgs {
    /// Method name, e.g. ping or search
    pub method: String,

    /// Parameters as a JSON object
    pub params: Option<String>,

    /// Socket path (defaults to contextual.sock in the data directory)
    #[arg(long)]
    pub socket: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "contextual",
            &mut std::io::stdout(),
        );
    }
}
