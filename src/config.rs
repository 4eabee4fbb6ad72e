// Configuration: ~/.config/prwiki/config.toml overridden by environment
// variables, so deployments can ship a file and CI can inject secrets.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

const DEFAULT_SITE_URL: &str = "http://localhost:3000";
const DEFAULT_TOKEN_VALIDITY_DAYS: i64 = 7;

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub repo_owner: String,
    pub repo_name: String,
    pub bot_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub auth_secret: String,
    pub site_url: String,
    pub token_validity_days: i64,
}

/// On-disk shape; every field optional so env vars can fill the gaps.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    repo_owner: Option<String>,
    repo_name: Option<String>,
    bot_token: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    auth_secret: Option<String>,
    site_url: Option<String>,
    token_validity_days: Option<i64>,
}

fn config_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".config/prwiki/config.toml"))
}

fn read_file_config() -> Result<FileConfig> {
    let Some(path) = config_path() else {
        return Ok(FileConfig::default());
    };
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

impl Config {
    pub fn load() -> Result<Config> {
        let file = read_file_config()?;
        Self::from_sources(file, |name| std::env::var(name).ok())
    }

    fn from_sources(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Config> {
        let pick = |env_name: &str, file_value: Option<String>| env(env_name).or(file_value);

        let repo_owner = pick("GITHUB_REPO_OWNER", file.repo_owner)
            .context("repo_owner is not configured (set GITHUB_REPO_OWNER)")?;
        let repo_name = pick("GITHUB_REPO_NAME", file.repo_name)
            .context("repo_name is not configured (set GITHUB_REPO_NAME)")?;
        let auth_secret = pick("AUTH_SECRET", file.auth_secret)
            .context("auth_secret is not configured (set AUTH_SECRET)")?;

        let token_validity_days = match pick("TOKEN_VALIDITY_DAYS", None) {
            Some(raw) => raw
                .parse()
                .context("TOKEN_VALIDITY_DAYS must be an integer")?,
            None => file
                .token_validity_days
                .unwrap_or(DEFAULT_TOKEN_VALIDITY_DAYS),
        };

        Ok(Config {
            repo_owner,
            repo_name,
            bot_token: pick("GITHUB_BOT_TOKEN", file.bot_token),
            client_id: pick("GITHUB_CLIENT_ID", file.client_id),
            client_secret: pick("GITHUB_CLIENT_SECRET", file.client_secret),
            auth_secret,
            site_url: pick("SITE_URL", file.site_url)
                .unwrap_or_else(|| DEFAULT_SITE_URL.to_string()),
            token_validity_days,
        })
    }
}
