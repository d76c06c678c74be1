use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{ConfigLoader, ENV_CONFIG, ENV_DATA};
use crate::storage;

pub mod commands;

use self::commands::{AuthArgs, BackupArgs, BookArgs, CommandContext, EntryArgs, MoodArgs};

#[derive(Parser, Debug)]
#[command(
    name = "diary",
    version,
    about = "Personal diary and mood tracker"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override the config file location (takes precedence over DIARY_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over DIARY_DATA)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write, edit and browse diary entries
    Entry(EntryArgs),
    /// Organise entries into books
    Book(BookArgs),
    /// Record mood check-ins and look at trends
    Mood(MoodArgs),
    /// Sign in to cloud storage
    Auth(AuthArgs),
    /// Push entries saved on this device to cloud storage
    Sync,
    /// Show where entries are stored and who is signed in
    Status,
    /// Copy the local database aside
    Backup(BackupArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var(ENV_CONFIG, path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var(ENV_DATA, path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = loader.load_or_init()?;
    let storage = storage::init(&config.storage)?;

    let ctx = CommandContext::new(Arc::new(config), paths, storage);
    let result = match cli.command {
        Commands::Entry(args) => commands::handle_entry_command(&ctx, args),
        Commands::Book(args) => commands::handle_book_command(&ctx, args),
        Commands::Mood(args) => commands::handle_mood_command(&ctx, args),
        Commands::Auth(args) => commands::handle_auth_command(&ctx, args),
        Commands::Sync => commands::sync_now(&ctx),
        Commands::Status => commands::show_status(&ctx),
        Commands::Backup(args) => commands::handle_backup_command(&ctx, args),
    };

    if ctx.config.storage.backup_on_exit {
        if let Err(err) = ctx.storage.backup_to(&ctx.config.storage.backup_dir) {
            tracing::warn!(error = %format!("{err:#}"), "backup on exit failed");
        }
    }
    result
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(())
    })
    .map(|_| ())
}
