//! Rill CLI - read/starred state sync from the command line
//!
//! Local commands work offline against the store; `sync`, `daemon`,
//! `mark-all-read` and `unread-counts` reach the remote aggregator.

mod auth;
mod cli;
mod commands;
mod config_file;
mod error;

use clap::Parser;
use rill_core::models::ActionType;
use tracing_subscriber::filter::LevelFilter;

use crate::cli::{ArticleCommands, Cli, Commands};
use crate::commands::articles::{run_list, run_mark_all_read, run_set_state};
use crate::commands::auth_cmd::run_auth;
use crate::commands::common::{resolve_db_path, Context};
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::queue::{run_failed, run_requeue};
use crate::commands::remote::{run_feeds, run_quota, run_unread_counts};
use crate::commands::sync::{run_daemon, run_status, run_sync};
use crate::config_file::{resolve_config_path, CliConfig};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .parse_lossy(
                    std::env::var("RUST_LOG").unwrap_or_else(|_| "rill=info".to_string()),
                ),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let config_path = resolve_config_path(cli.config)?;
    let context = Context {
        db_path: resolve_db_path(cli.db_path)?,
        config: CliConfig::load(&config_path)?,
        config_path,
    };

    match cli.command {
        Commands::Sync { json } => run_sync(&context, json).await?,
        Commands::Status { json } => run_status(&context, json).await?,
        Commands::Articles {
            command:
                ArticleCommands::List {
                    limit,
                    unread,
                    json,
                },
        } => run_list(&context, limit, unread, json).await?,
        Commands::Read { ids } => run_set_state(&context, ActionType::Read, &ids).await?,
        Commands::Unread { ids } => run_set_state(&context, ActionType::Unread, &ids).await?,
        Commands::Star { ids } => run_set_state(&context, ActionType::Star, &ids).await?,
        Commands::Unstar { ids } => run_set_state(&context, ActionType::Unstar, &ids).await?,
        Commands::MarkAllRead { feed, folder } => {
            run_mark_all_read(&context, feed, folder).await?;
        }
        Commands::Failed { limit, json } => run_failed(&context, limit, json).await?,
        Commands::Requeue => run_requeue(&context).await?,
        Commands::UnreadCounts { json } => run_unread_counts(&context, json).await?,
        Commands::Feeds { json } => run_feeds(&context, json).await?,
        Commands::Quota => run_quota(&context).await?,
        Commands::Daemon => run_daemon(&context).await?,
        Commands::Auth { command } => run_auth(&context, command).await?,
        Commands::Config { command } => run_config(&context, command)?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}
