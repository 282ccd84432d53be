use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use console::style;
use tracing::info;

use zenreader_core::confirm::{AutoConfirm, Confirmer};
use zenreader_core::library::JsonLibrary;
use zenreader_core::organize::OrganizeReport;

use crate::{
    app::{OrganizeRequest, ProgressRenderer, ZenReader, locate_library},
    cli::{ConfigArgs, ConfigCommands, ImportArgs, InitArgs, OrganizeArgs, ResetArgs},
    config::{Config, config_path},
    confirm::ConsoleConfirmer,
};

fn confirmer(yes: bool) -> Box<dyn Confirmer> {
    if yes { Box::new(AutoConfirm) } else { Box::new(ConsoleConfirmer) }
}

async fn open(library: Option<&Path>) -> Result<ZenReader> {
    ZenReader::open(&locate_library(library)?).await
}

// --- Handler Functions ---

pub async fn handle_init(args: InitArgs, library: Option<PathBuf>) -> Result<()> {
    let target = match args.path.or(library) {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    tokio::fs::create_dir_all(&target).await?;
    JsonLibrary::create(&target).await?;
    info!(root = %target.display(), "Library created");
    println!("Created library in {}", target.display());
    Ok(())
}

pub async fn handle_import(args: ImportArgs, library: Option<PathBuf>) -> Result<()> {
    let app = open(library.as_deref()).await?;
    let imported = app.import(&args.paths).await?;
    for document in &imported {
        println!("  Imported: {}", document.filename);
    }
    println!("{} document(s) imported.", imported.len());
    Ok(())
}

pub async fn handle_organize(args: OrganizeArgs, library: Option<PathBuf>, quiet: bool) -> Result<()> {
    let app = open(library.as_deref()).await?;
    let request = OrganizeRequest {
        all: args.all,
        use_ai: !args.no_ai,
        use_subjects: !args.no_subjects,
        cooldown_secs: args.cooldown_secs,
        retry_limit: args.retry_limit,
        api_key: args.api_key,
    };
    let organizer = app.organizer(&request)?;
    let Some(documents) = app
        .documents_to_organize(&organizer, request.all, &*confirmer(args.yes))
        .await?
    else {
        println!("Nothing changed.");
        return Ok(());
    };
    if documents.is_empty() {
        println!("Nothing to organize.");
        return Ok(());
    }

    let renderer = if quiet { ProgressRenderer::hidden() } else { ProgressRenderer::stderr() };
    let report = app.organize(&organizer, documents, renderer).await?;
    print_report(&report);
    if !report.failures.is_empty() {
        bail!("{} document(s) could not be filed", report.failures.len());
    }
    Ok(())
}

fn print_report(report: &OrganizeReport) {
    let headline = if report.cancelled {
        style(format!("Cancelled after {} of {} documents.", report.processed, report.total)).yellow()
    } else {
        style(format!("Organized {} documents.", report.processed)).green()
    };
    println!("{}", headline);
    println!("  moved:        {}", report.assigned);
    println!("  unchanged:    {}", report.unchanged);
    println!("  unsorted:     {}", report.unsorted);
    println!("  unmatched:    {}", report.unmatched);
    println!("  skipped:      {}", report.skipped);
    println!("  AI calls:     {}", report.ai_calls);
    println!("  quota pauses: {}", report.quota_pauses);
    for failure in &report.failures {
        println!("  {} {}: {}", style("failed").red(), failure.filename, failure.message);
    }
}

pub async fn handle_reset(args: ResetArgs, library: Option<PathBuf>) -> Result<()> {
    let app = open(library.as_deref()).await?;
    match app.reset(&*confirmer(args.yes)).await? {
        Some(moved) => println!("{} document(s) moved back to Uncategorized.", moved),
        None => println!("Nothing changed."),
    }
    Ok(())
}

pub async fn handle_list(library: Option<PathBuf>) -> Result<()> {
    let app = open(library.as_deref()).await?;
    let rows = app.documents_with_folders().await?;
    if rows.is_empty() {
        println!("The library is empty.");
    }
    for (document, folder) in rows {
        println!("{:<24} {}", style(folder).cyan(), document.filename);
    }
    Ok(())
}

pub async fn handle_folders(library: Option<PathBuf>) -> Result<()> {
    let app = open(library.as_deref()).await?;
    for (name, count) in app.folder_counts().await? {
        println!("{:>5}  {}", count, name);
    }
    Ok(())
}

pub async fn handle_config(args: ConfigArgs, library: Option<PathBuf>) -> Result<()> {
    let root = locate_library(library.as_deref())?;
    match args.command {
        ConfigCommands::Get { key } => {
            let config = Config::load(&root).await?;
            println!("{}", config.get(&key)?);
        }
        ConfigCommands::Set { key, value } => {
            let mut config = Config::load(&root).await?;
            config.set(&key, &value)?;
            config.save(&root).await?;
            info!(%key, "Configuration updated");
        }
        ConfigCommands::List => {
            let config = Config::load(&root).await?;
            for (key, value) in config.entries()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigCommands::Locate => {
            println!("{}", config_path(&root).display());
        }
    }
    Ok(())
}
