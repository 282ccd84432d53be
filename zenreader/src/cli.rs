use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// ZenReader: keep a PDF library sorted into folders.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Library directory. Defaults to the nearest library in the current directory or its parents.
    #[arg(long, global = true, env = "ZENREADER_LIBRARY")]
    pub library: Option<PathBuf>,

    /// Increase verbosity (use multiple times for more).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an empty library in the current (or given) directory.
    Init(InitArgs),
    /// Add PDF files to the library. Directories are scanned one level deep.
    Import(ImportArgs),
    /// Sort documents into folders.
    Organize(OrganizeArgs),
    /// Move every document back to Uncategorized.
    Reset(ResetArgs),
    /// List documents and the folder each one is in.
    List,
    /// List folders with their document counts.
    Folders,
    /// Manage the library configuration.
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory to create the library in. Defaults to `--library` or the current directory.
    pub path: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Path(s) to PDF files or directories containing them.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct OrganizeArgs {
    /// Re-classify every document, not only the uncategorized ones.
    #[arg(long)]
    pub all: bool,

    /// Do not ask for confirmation.
    #[arg(long, short)]
    pub yes: bool,

    /// Skip the external classifier; only heuristics are used.
    #[arg(long)]
    pub no_ai: bool,

    /// Do not look up catalogue subjects.
    #[arg(long)]
    pub no_subjects: bool,

    /// Seconds to wait after the classifier reports an exhausted quota.
    #[arg(long)]
    pub cooldown_secs: Option<u64>,

    /// Consecutive quota errors on one document before it is parked in the fallback folder.
    #[arg(long)]
    pub retry_limit: Option<u32>,

    /// Gemini API key.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Do not ask for confirmation.
    #[arg(long, short)]
    pub yes: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Get the value of a configuration key.
    Get {
        /// Dotted configuration key (e.g., `organize.cooldown_secs`, `gemini.model`).
        key: String,
    },
    /// Set a configuration key to a value. Values are parsed as JSON, falling back to a string.
    Set {
        /// Dotted configuration key (e.g., `organize.cooldown_secs`, `gemini.model`).
        key: String,
        /// The value to set.
        value: String,
    },
    /// List all configuration keys and values.
    List,
    /// Show the location of the configuration file.
    Locate,
}
