// GitHub OAuth: authorize URL, code-for-token exchange, and user lookup.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::session::SessionUser;

const AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const ACCESS_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const USER_URL: &str = "https://api.github.com/user";
const OAUTH_SCOPE: &str = "public_repo";

/// Trait for the OAuth exchange, allowing test implementations.
pub trait OAuthClient {
    fn exchange_code(&self, code: &str) -> Result<String>;
    fn fetch_user(&self, access_token: &str) -> Result<SessionUser>;
}

/// The URL users are redirected to for login.
pub fn authorize_url(client_id: &str, site_url: &str) -> String {
    let redirect_uri = format!("{site_url}/api/oauth/authorized");
    format!(
        "{AUTHORIZE_URL}?client_id={}&redirect_uri={}&scope={}",
        urlencoding::encode(client_id),
        urlencoding::encode(&redirect_uri),
        urlencoding::encode(OAUTH_SCOPE)
    )
}

/// When a session established now stops being honored.
pub fn token_expiry(now: DateTime<Utc>, validity_days: i64) -> i64 {
    (now + Duration::days(validity_days)).timestamp_millis()
}

pub struct RealOAuthClient {
    client_id: String,
    client_secret: String,
    http: reqwest::blocking::Client,
}

impl RealOAuthClient {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            client_id,
            client_secret,
            http: reqwest::blocking::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct UserResponse {
    login: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    avatar_url: String,
    #[serde(default)]
    html_url: String,
}

impl OAuthClient for RealOAuthClient {
    fn exchange_code(&self, code: &str) -> Result<String> {
        let response: TokenResponse = self
            .http
            .post(ACCESS_TOKEN_URL)
            .header("Accept", "application/json")
            .json(&serde_json::json!({
                "client_id": self.client_id,
                "client_secret": self.client_secret,
                "code": code,
            }))
            .send()
            .context("Failed to reach GitHub OAuth endpoint")?
            .json()
            .context("Failed to parse OAuth token response")?;

        match response.access_token {
            Some(token) => Ok(token),
            None => anyhow::bail!(
                "OAuth exchange rejected: {}",
                response
                    .error_description
                    .unwrap_or_else(|| "no access token in response".to_string())
            ),
        }
    }

    fn fetch_user(&self, access_token: &str) -> Result<SessionUser> {
        let response = self
            .http
            .get(USER_URL)
            .header("Authorization", format!("Bearer {access_token}"))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", concat!("prwiki/", env!("CARGO_PKG_VERSION")))
            .send()
            .context("Failed to fetch GitHub user")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("GitHub /user returned {status}");
        }

        let user: UserResponse = response.json().context("Failed to parse GitHub user")?;
        Ok(SessionUser {
            login: user.login,
            name: user.name,
            avatar_url: user.avatar_url,
            profile_url: user.html_url,
        })
    }
}
