use std::env;

use rill_core::sync::{CredentialProvider, OAuthCredentials};

use crate::auth::{CliCredentials, SecretStore, StoredOAuth};
use crate::cli::AuthCommands;
use crate::commands::common::Context;
use crate::error::CliError;

pub async fn run_auth(context: &Context, command: AuthCommands) -> Result<(), CliError> {
    let remote = &context.config.remote;
    match command {
        AuthCommands::Login {
            refresh_token,
            client_secret,
        } => {
            let (Some(endpoint), Some(client_id)) = (&remote.token_endpoint, &remote.client_id)
            else {
                return Err(CliError::Config(
                    "token_endpoint and client_id must be set first. Run `rill config init --token-endpoint <URL> --client-id <ID>`.".to_string(),
                ));
            };

            let credentials = OAuthCredentials::new(
                endpoint.clone(),
                client_id.clone(),
                client_secret.clone(),
                refresh_token,
            )?;
            // One exchange proves the secrets work before they are stored.
            credentials.access_token().await?;

            SecretStore::new(client_id).save(&StoredOAuth {
                refresh_token: credentials.refresh_token().await,
                client_secret,
            })?;
            println!("Stored credentials for client '{client_id}'");
            Ok(())
        }
        AuthCommands::Status => {
            match CliCredentials::resolve(remote, env::var("RILL_ACCESS_TOKEN").ok()) {
                Ok(credentials) => println!("Using {}", credentials.source()),
                Err(CliError::SyncNotConfigured) => println!("No credentials configured."),
                Err(error) => return Err(error),
            }
            Ok(())
        }
        AuthCommands::Logout => {
            let Some(client_id) = &remote.client_id else {
                println!("No client_id configured; nothing stored.");
                return Ok(());
            };
            SecretStore::new(client_id).clear()?;
            println!("Removed stored credentials for client '{client_id}'");
            Ok(())
        }
    }
}
