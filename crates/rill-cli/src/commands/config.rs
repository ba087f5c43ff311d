use rill_core::util::normalize_text_option;

use crate::cli::ConfigCommands;
use crate::commands::common::{display_path, print_json, Context};
use crate::config_file::CliConfig;
use crate::error::CliError;

pub fn run_config(context: &Context, command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show => {
            println!("# {}", display_path(&context.config_path));
            print_json(&context.config)
        }
        ConfigCommands::Init {
            base_url,
            app_id,
            app_key,
            token_endpoint,
            client_id,
        } => {
            // Start from the file alone so env overrides are not persisted.
            let mut config = CliConfig::load_from_path(&context.config_path)?;
            merge_remote_flags(
                &mut config,
                RemoteFlags {
                    base_url,
                    app_id,
                    app_key,
                    token_endpoint,
                    client_id,
                },
            );
            config.save_to_path(&context.config_path)?;
            println!("Config written to {}", display_path(&context.config_path));

            let missing = missing_fields(&config);
            if missing.is_empty() {
                println!("OAuth is configured. Run `rill auth login` to store your tokens.");
            } else {
                println!(
                    "Not set: {} (or export RILL_ACCESS_TOKEN instead)",
                    missing.join(", ")
                );
            }
            Ok(())
        }
    }
}

#[derive(Debug, Default)]
pub struct RemoteFlags {
    pub base_url: Option<String>,
    pub app_id: Option<String>,
    pub app_key: Option<String>,
    pub token_endpoint: Option<String>,
    pub client_id: Option<String>,
}

/// Explicit flags win; anything not given keeps the existing value
pub fn merge_remote_flags(config: &mut CliConfig, flags: RemoteFlags) {
    let remote = &mut config.remote;
    if let Some(value) = normalize_text_option(flags.base_url) {
        remote.base_url = value;
    }
    if let Some(value) = normalize_text_option(flags.app_id) {
        remote.app_id = Some(value);
    }
    if let Some(value) = normalize_text_option(flags.app_key) {
        remote.app_key = Some(value);
    }
    if let Some(value) = normalize_text_option(flags.token_endpoint) {
        remote.token_endpoint = Some(value);
    }
    if let Some(value) = normalize_text_option(flags.client_id) {
        remote.client_id = Some(value);
    }
}

pub fn missing_fields(config: &CliConfig) -> Vec<&'static str> {
    let remote = &config.remote;
    let mut missing = Vec::new();
    if remote.app_id.is_none() {
        missing.push("app_id");
    }
    if remote.app_key.is_none() {
        missing.push("app_key");
    }
    if remote.token_endpoint.is_none() {
        missing.push("token_endpoint");
    }
    if remote.client_id.is_none() {
        missing.push("client_id");
    }
    missing
}
