use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "rill")]
#[command(about = "Keep your feed reader's read and starred state in sync")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one sync cycle now
    Sync {
        /// Output the run record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show local sync state: watermarks, queue, quota
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Browse locally stored articles
    Articles {
        #[command(subcommand)]
        command: ArticleCommands,
    },
    /// Mark articles read
    Read {
        /// Article ids
        ids: Vec<String>,
    },
    /// Mark articles unread
    Unread {
        /// Article ids
        ids: Vec<String>,
    },
    /// Star articles
    Star {
        /// Article ids
        ids: Vec<String>,
    },
    /// Remove the star from articles
    Unstar {
        /// Article ids
        ids: Vec<String>,
    },
    /// Mark a feed, a folder, or everything as read (remote first)
    MarkAllRead {
        /// Remote stream id of a feed
        #[arg(long, conflicts_with = "folder")]
        feed: Option<String>,
        /// Folder label
        #[arg(long)]
        folder: Option<String>,
    },
    /// List changes that exhausted their retries
    Failed {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move failed changes back into the queue
    Requeue,
    /// Fetch unread counts from the remote (one API call)
    UnreadCounts {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List subscribed feeds known locally
    Feeds {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show today's remote call budget
    Quota,
    /// Run the sync scheduler until interrupted
    Daemon,
    /// Manage remote credentials
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Inspect or initialize the config file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum ArticleCommands {
    /// List recent articles
    List {
        /// Number of articles to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Only unread articles
        #[arg(long)]
        unread: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Store an OAuth refresh token and client secret in the keychain
    Login {
        #[arg(long, value_name = "TOKEN")]
        refresh_token: String,
        #[arg(long, value_name = "SECRET")]
        client_secret: String,
    },
    /// Show which credentials would be used
    Status,
    /// Remove stored credentials
    Logout,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write a config file, keeping existing values not overridden here
    Init {
        /// Reader API base URL
        #[arg(long, value_name = "URL")]
        base_url: Option<String>,
        #[arg(long, value_name = "ID")]
        app_id: Option<String>,
        #[arg(long, value_name = "KEY")]
        app_key: Option<String>,
        /// OAuth token endpoint
        #[arg(long, value_name = "URL")]
        token_endpoint: Option<String>,
        /// OAuth client id
        #[arg(long, value_name = "ID")]
        client_id: Option<String>,
    },
}
