use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

mod cli;

use cli::Cli;
use cli::commands::Commands;
use devlog::DevlogManager;
use devlog::config::AppConfig;
use devlog::domain::{
    CreateDevlogRequest, DevlogFilter, DevlogStats, DevlogType, Entry, EntryId, NoteCategory, Priority, Status,
};
use devlog::git::{GitStorageProvider, ProcessGitRunner, RemoteStatus};
use devlog::storage::{ProviderFactory, StorageConfig, StorageProvider};

fn setup_logging(level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("devlog")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("devlog.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var_os("RUST_LOG").is_none()
        && let Some(level) = level
    {
        builder.parse_filters(level);
    }
    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn parse_id(id: &str) -> Result<EntryId> {
    id.parse::<EntryId>().context(format!("Invalid entry id '{}'", id))
}

fn status_label(status: Status) -> ColoredString {
    let text = status.as_str();
    match status {
        Status::New => text.cyan(),
        Status::InProgress | Status::Testing | Status::InReview => text.yellow(),
        Status::Blocked => text.red(),
        Status::Done => text.green(),
        Status::Closed | Status::Archived => text.dimmed(),
    }
}

fn print_entry_line(entry: &Entry) {
    println!(
        "{:>6} [{}] {} ({}, {})",
        entry.display_id().bold(),
        status_label(entry.status),
        entry.title,
        entry.devlog_type,
        entry.priority
    );
}

fn print_entry(entry: &Entry) {
    print_entry_line(entry);
    if !entry.description.is_empty() {
        println!("\n{}", entry.description);
    }
    if let Some(assignee) = &entry.assignee {
        println!("{} {}", "Assignee:".green(), assignee);
    }
    if !entry.tags.is_empty() {
        println!("{} {}", "Tags:".green(), entry.tags.join(", "));
    }
    println!("{} {}", "Updated:".green(), entry.updated_at.to_rfc3339());
    if !entry.context.acceptance_criteria.is_empty() {
        println!("{}", "Acceptance criteria:".green());
        for criterion in &entry.context.acceptance_criteria {
            println!("  - {}", criterion);
        }
    }
    if !entry.notes.is_empty() {
        println!("{}", "Notes:".green());
        for note in &entry.notes {
            println!("  {} [{}] {}", note.timestamp.format("%Y-%m-%d %H:%M"), note.category, note.content);
        }
    }
}

fn print_stats(stats: &DevlogStats) {
    println!("{} {}", "Total:".green(), stats.total_entries);
    println!("{}", "By status:".green());
    for (status, count) in &stats.by_status {
        println!("  {:<12} {}", status_label(*status), count);
    }
    println!("{}", "By type:".green());
    for (devlog_type, count) in &stats.by_type {
        println!("  {:<12} {}", devlog_type.as_str(), count);
    }
    println!("{}", "By priority:".green());
    for (priority, count) in &stats.by_priority {
        println!("  {:<12} {}", priority.as_str(), count);
    }
}

async fn git_provider(config: &AppConfig) -> Result<GitStorageProvider> {
    let StorageConfig::Git(git) = &config.storage else {
        eyre::bail!(
            "This command needs git storage (configured: {})",
            config.storage.kind()
        );
    };
    let provider = GitStorageProvider::new(git.clone(), Arc::new(ProcessGitRunner));
    provider.initialize().await.context("Failed to initialize git storage")?;
    Ok(provider)
}

async fn handle_sync_command(config: &AppConfig) -> Result<()> {
    let provider = git_provider(config).await?;
    let report = provider.sync().await.context("Sync failed")?;
    for path in &report.resolved_files {
        println!("{} {}", "Resolved:".yellow(), path.display());
    }
    if report.index_rebuilt {
        println!("{}", "Rebuilt index from entry files".yellow());
    }
    let summary = match (report.committed, report.pushed) {
        (_, true) => "pushed".green(),
        (true, false) => "committed".yellow(),
        (false, false) => "up to date".green(),
    };
    println!("{} {}", "Sync:".green(), summary);
    Ok(())
}

async fn handle_status_command(config: &AppConfig) -> Result<()> {
    let provider = git_provider(config).await?;
    match provider.remote_status().await {
        RemoteStatus::Synced => println!("{}", "In sync with remote".green()),
        RemoteStatus::Ahead { ahead } => println!("{} {} commit(s) to push", "Ahead:".yellow(), ahead),
        RemoteStatus::Behind { behind } => println!("{} {} commit(s) to pull", "Behind:".yellow(), behind),
        RemoteStatus::Diverged { ahead, behind } => {
            println!("{} {} ahead, {} behind", "Diverged:".red(), ahead, behind)
        }
        RemoteStatus::Error { message } => println!("{} {}", "Error:".red(), message),
    }
    Ok(())
}

async fn handle_entry_command(manager: &DevlogManager, command: &Commands) -> Result<()> {
    match command {
        Commands::Init => {
            println!("{} {} storage ready", "Initialized:".green(), manager.provider().kind());
        }
        Commands::Create {
            title,
            devlog_type,
            priority,
            description,
        } => {
            let devlog_type: DevlogType = devlog_type.parse()?;
            let mut request = CreateDevlogRequest::new(title.clone(), devlog_type);
            if let Some(priority) = priority {
                request = request.with_priority(priority.parse::<Priority>()?);
            }
            if let Some(description) = description {
                request = request.with_description(description.clone());
            }
            let entry = manager.create(request).await?;
            println!("{} {}", "Created:".green(), entry.display_id());
        }
        Commands::Show { id, json } => {
            let id = parse_id(id)?;
            let Some(entry) = manager.get(&id).await? else {
                eyre::bail!("No devlog entry {}", id);
            };
            if *json {
                println!("{}", serde_json::to_string_pretty(&entry)?);
            } else {
                print_entry(&entry);
            }
        }
        Commands::List {
            status,
            devlog_type,
            priority,
        } => {
            let mut filter = DevlogFilter::new();
            if let Some(status) = status {
                filter = filter.with_status(status.parse()?);
            }
            if let Some(devlog_type) = devlog_type {
                filter = filter.with_type(devlog_type.parse()?);
            }
            if let Some(priority) = priority {
                filter = filter.with_priority(priority.parse()?);
            }
            let entries = manager.list(&filter).await?;
            if entries.is_empty() {
                println!("{}", "No entries".dimmed());
            }
            entries.iter().for_each(print_entry_line);
        }
        Commands::Search { query } => {
            let entries = manager.search(query).await?;
            if entries.is_empty() {
                println!("{} {}", "No matches for".dimmed(), query);
            }
            entries.iter().for_each(print_entry_line);
        }
        Commands::Note { id, content, category } => {
            let category: NoteCategory = category.parse()?;
            let entry = manager
                .add_note(&parse_id(id)?, category, content.clone(), Vec::new())
                .await?;
            println!("{} {} ({} notes)", "Noted:".green(), entry.display_id(), entry.notes.len());
        }
        Commands::Complete { id, summary } => {
            let entry = manager.complete(&parse_id(id)?, summary.as_deref()).await?;
            println!("{} {}", "Completed:".green(), entry.display_id());
        }
        Commands::Close { id, reason } => {
            let entry = manager.close(&parse_id(id)?, reason.as_deref()).await?;
            println!("{} {}", "Closed:".yellow(), entry.display_id());
        }
        Commands::Delete { id } => {
            let id = parse_id(id)?;
            manager.delete(&id).await?;
            println!("{} {}", "Deleted:".red(), id);
        }
        Commands::Stats => print_stats(&manager.stats().await?),
        Commands::Sync | Commands::Status => eyre::bail!("{:?} runs against the git clone, not an entry store", command),
    }
    Ok(())
}

async fn run_application(cli: &Cli, config: &AppConfig) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Sync => return handle_sync_command(config).await,
        Commands::Status => return handle_status_command(config).await,
        _ => {}
    }

    let provider = ProviderFactory::new()
        .open_provider(&config.storage)
        .await
        .context(format!("Failed to open {} storage", config.storage.kind()))?;
    let manager = DevlogManager::new(provider);
    let result = handle_entry_command(&manager, &cli.command).await;
    manager.dispose().await?;
    result
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_ref()).context("Failed to load configuration")?;

    let level = if cli.is_verbose() {
        Some("debug")
    } else {
        config.log_level.as_deref()
    };
    setup_logging(level).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
