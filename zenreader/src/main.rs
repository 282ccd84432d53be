use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use zenreader::cli::{Cli, Commands};
use zenreader::commands;

fn init_tracing(verbose: u8, quiet: bool) {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    // RUST_LOG takes precedence over -v/-q.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok(); // Load .env file if present

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let library = cli.library;
    match cli.command {
        Commands::Init(args) => commands::handle_init(args, library).await?,
        Commands::Import(args) => commands::handle_import(args, library).await?,
        Commands::Organize(args) => commands::handle_organize(args, library, cli.quiet).await?,
        Commands::Reset(args) => commands::handle_reset(args, library).await?,
        Commands::List => commands::handle_list(library).await?,
        Commands::Folders => commands::handle_folders(library).await?,
        Commands::Config(args) => commands::handle_config(args, library).await?,
    }

    Ok(())
}
