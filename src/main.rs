// prwiki: GitHub-PR-backed comment service and data mirror for a
// study-group documentation wiki.

mod auth;
mod cli;
mod comments;
mod config;
mod error;
mod gateway;
mod github;
mod highlight;
mod locator;
mod mirror;
mod server;
mod session;
mod threads;

use clap::Parser;
use std::path::Path;

use crate::auth::RealOAuthClient;
use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::github::{ConfigTokenSource, RealClientFactory, RealGitHubClient, TokenCache};
use crate::server::AppState;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Serve { port } => {
            let oauth = RealOAuthClient::new(
                config.client_id.clone().unwrap_or_default(),
                config.client_secret.clone().unwrap_or_default(),
            );
            let state = AppState {
                bot_token: TokenCache::new(Box::new(ConfigTokenSource::new(
                    config.bot_token.clone(),
                ))),
                factory: Box::new(RealClientFactory),
                oauth: Box::new(oauth),
                config,
            };
            server::serve(state, port)
        }
        Command::Mirror {
            data_dir,
            output_dir,
        } => {
            let token = config.bot_token.clone().unwrap_or_default();
            let client = RealGitHubClient::new(token);
            mirror::run(
                &client,
                &config.repo_owner,
                &config.repo_name,
                Path::new(&data_dir),
                Path::new(&output_dir),
            )
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
