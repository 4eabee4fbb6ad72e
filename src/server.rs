// HTTP JSON API for the comment service. A blocking tiny_http accept loop
// routes requests to handlers that are plain functions over injected trait
// objects, so everything below the socket is unit-testable.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::io::Read;
use tiny_http::Method;

use crate::auth::{OAuthClient, authorize_url, token_expiry};
use crate::comments::{normalize_issue_comment, normalize_review, normalize_review_comment};
use crate::config::Config;
use crate::error::ApiError;
use crate::gateway::{self, NewComment, WriteIdentity};
use crate::github::{ClientFactory, GitHubClient, TokenCache};
use crate::highlight::annotations;
use crate::locator::{GitHubPrLocator, PrLocator};
use crate::session::{
    SessionData, clear_cookie_header, session_from_cookie_header, set_cookie_header,
};
use crate::threads::build_forest;

/// Everything a request handler can reach. Built once at startup.
pub struct AppState {
    pub config: Config,
    pub bot_token: TokenCache,
    pub factory: Box<dyn ClientFactory>,
    pub oauth: Box<dyn OAuthClient>,
}

/// A fully materialized response: status, JSON body, extra headers.
#[derive(Debug)]
pub struct HttpReply {
    pub status: u16,
    pub body: Value,
    pub headers: Vec<(String, String)>,
}

impl HttpReply {
    fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            headers: Vec::new(),
        }
    }

    fn redirect(location: &str) -> Self {
        Self {
            status: 302,
            body: json!({}),
            headers: vec![("Location".to_string(), location.to_string())],
        }
    }

    fn with_header(mut self, name: &str, value: String) -> Self {
        self.headers.push((name.to_string(), value));
        self
    }

    fn from_error(error: ApiError) -> Self {
        Self::json(error.status(), error.body())
    }
}

fn wrap(result: Result<(u16, Value), ApiError>) -> HttpReply {
    match result {
        Ok((status, body)) => HttpReply::json(status, body),
        Err(error) => HttpReply::from_error(error),
    }
}

// --- field extraction -------------------------------------------------------

fn required_str<'a>(payload: &'a Value, field: &str) -> Result<&'a str, ApiError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{field} is required")))
}

fn required_u64(payload: &Value, field: &str) -> Result<u64, ApiError> {
    payload
        .get(field)
        .and_then(Value::as_u64)
        .ok_or_else(|| ApiError::BadRequest(format!("{field} is required")))
}

fn optional_str<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

// --- handlers ---------------------------------------------------------------

fn handle_login(config: &Config) -> HttpReply {
    match &config.client_id {
        Some(client_id) => HttpReply::redirect(&authorize_url(client_id, &config.site_url)),
        None => HttpReply::from_error(ApiError::Upstream {
            message: "GitHub OAuth is not configured".to_string(),
            details: "GITHUB_CLIENT_ID is unset".to_string(),
        }),
    }
}

fn handle_authorized(
    config: &Config,
    oauth: &dyn OAuthClient,
    query: &HashMap<String, String>,
    now: DateTime<Utc>,
) -> Result<HttpReply, ApiError> {
    let code = query
        .get("code")
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("code is required".to_string()))?;

    let access_token = oauth
        .exchange_code(code)
        .map_err(|e| ApiError::upstream("OAuth exchange failed", e))?;
    let user = oauth
        .fetch_user(&access_token)
        .map_err(|e| ApiError::upstream("Failed to load GitHub user", e))?;

    let session = SessionData {
        user,
        access_token,
        expires_at: token_expiry(now, config.token_validity_days),
    };
    let cookie = set_cookie_header(&config.auth_secret, &session)
        .map_err(|e| ApiError::upstream("Failed to establish session", e))?;

    Ok(HttpReply::redirect("/").with_header("Set-Cookie", cookie))
}

fn handle_status(session: Option<&SessionData>) -> HttpReply {
    let body = match session {
        Some(session) => json!({ "authenticated": true, "user": session.user }),
        None => json!({ "authenticated": false }),
    };
    HttpReply::json(200, body)
}

fn handle_logout() -> HttpReply {
    HttpReply::json(200, json!({ "success": true }))
        .with_header("Set-Cookie", clear_cookie_header())
}

/// Create a comment. Input validation (including the anonymous-name
/// requirement) happens before the locator or any GitHub client is touched.
fn handle_create(
    config: &Config,
    factory: &dyn ClientFactory,
    bot_token: &TokenCache,
    locator: &dyn PrLocator,
    session: Option<&SessionData>,
    payload: &Value,
    now: DateTime<Utc>,
) -> Result<(u16, Value), ApiError> {
    let file_path = required_str(payload, "filePath")?;
    let body = required_str(payload, "body")?;

    let identity = match session {
        Some(session) => {
            if session.access_token.is_empty() {
                return Err(ApiError::Unauthorized(
                    "Session token is invalid".to_string(),
                ));
            }
            WriteIdentity::Authenticated
        }
        None => {
            let name = optional_str(payload, "anonymousName").ok_or_else(|| {
                ApiError::BadRequest("anonymousName is required for anonymous comments".to_string())
            })?;
            WriteIdentity::Anonymous {
                name: name.to_string(),
            }
        }
    };

    let pr_number = locator
        .resolve_pr(file_path)
        .map_err(|e| ApiError::upstream("Failed to locate comment thread", e))?;

    let client = match (&identity, session) {
        (WriteIdentity::Authenticated, Some(session)) => {
            factory.for_token(&session.access_token)
        }
        _ => {
            let token = bot_token
                .get()
                .map_err(|e| ApiError::upstream("Bot credential unavailable", e))?;
            factory.for_token(&token)
        }
    };

    let new = NewComment {
        file_path: file_path.to_string(),
        body: body.to_string(),
        line_number: payload.get("lineNumber").and_then(Value::as_u64),
        selected_text: optional_str(payload, "selectedText").map(str::to_string),
        in_reply_to: payload.get("inReplyTo").and_then(Value::as_u64),
    };

    let comment = gateway::create_comment(
        client.as_ref(),
        &config.repo_owner,
        &config.repo_name,
        pr_number,
        &new,
        &identity,
        now,
    )?;

    Ok((
        201,
        json!({
            "success": true,
            "comment": {
                "id": comment.id,
                "prNumber": comment.pr_number,
                "htmlUrl": comment.html_url,
                "createdAt": comment.created_at,
            },
        }),
    ))
}

/// List the normalized comment forest for a file path or a PR number
/// (exactly one of the two).
fn handle_list(
    config: &Config,
    client: &dyn GitHubClient,
    locator: &dyn PrLocator,
    query: &HashMap<String, String>,
) -> Result<(u16, Value), ApiError> {
    let file_path = query.get("filePath").filter(|s| !s.is_empty());
    let pr_param = query.get("prNumber").filter(|s| !s.is_empty());

    let pr_number = match (file_path, pr_param) {
        (Some(path), None) => locator
            .resolve_pr(path)
            .map_err(|e| ApiError::upstream("Failed to locate comment thread", e))?,
        (None, Some(raw)) => raw
            .parse()
            .map_err(|_| ApiError::BadRequest("prNumber must be a number".to_string()))?,
        _ => {
            return Err(ApiError::BadRequest(
                "Provide exactly one of filePath or prNumber".to_string(),
            ));
        }
    };

    let (owner, repo) = (&config.repo_owner, &config.repo_name);
    let issue_comments = client
        .list_issue_comments(owner, repo, pr_number)
        .map_err(|e| ApiError::upstream("Failed to list comments", e))?;
    let review_comments = client
        .list_review_comments(owner, repo, pr_number)
        .map_err(|e| ApiError::upstream("Failed to list comments", e))?;
    let reviews = client
        .list_reviews(owner, repo, pr_number)
        .map_err(|e| ApiError::upstream("Failed to list comments", e))?;

    let mut comments = Vec::new();
    comments.extend(issue_comments.iter().map(normalize_issue_comment));
    comments.extend(review_comments.iter().map(normalize_review_comment));
    comments.extend(reviews.iter().filter_map(normalize_review));
    let forest = build_forest(comments);

    let mut body = json!({ "comments": forest, "prNumber": pr_number });
    // Clients rendering the file inline pass the rendered line count and get
    // back the per-line annotation plan alongside the forest.
    if let Some(line_count) = query.get("lineCount").and_then(|raw| raw.parse().ok()) {
        body["annotations"] = json!(annotations(line_count, &forest));
    }

    Ok((200, body))
}

fn require_session(session: Option<&SessionData>) -> Result<&SessionData, ApiError> {
    let session =
        session.ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))?;
    if session.access_token.is_empty() {
        return Err(ApiError::Unauthorized(
            "Session token is invalid".to_string(),
        ));
    }
    Ok(session)
}

fn handle_update(
    config: &Config,
    factory: &dyn ClientFactory,
    session: Option<&SessionData>,
    payload: &Value,
) -> Result<(u16, Value), ApiError> {
    let session = require_session(session)?;
    let comment_id = required_u64(payload, "commentId")?;
    let body = required_str(payload, "body")?;

    let client = factory.for_token(&session.access_token);
    let updated = gateway::update_comment(
        client.as_ref(),
        &config.repo_owner,
        &config.repo_name,
        comment_id,
        body,
        &session.user.login,
    )?;

    Ok((
        200,
        json!({
            "success": true,
            "comment": { "id": updated.id, "updatedAt": updated.updated_at },
        }),
    ))
}

fn handle_delete(
    config: &Config,
    factory: &dyn ClientFactory,
    session: Option<&SessionData>,
    payload: &Value,
) -> Result<(u16, Value), ApiError> {
    let session = require_session(session)?;
    let comment_id = required_u64(payload, "commentId")?;

    let client = factory.for_token(&session.access_token);
    gateway::delete_comment(
        client.as_ref(),
        &config.repo_owner,
        &config.repo_name,
        comment_id,
        &session.user.login,
    )?;

    Ok((200, json!({ "success": true })))
}

// --- routing ----------------------------------------------------------------

const KNOWN_PATHS: &[&str] = &[
    "/api/auth/login",
    "/api/oauth/authorized",
    "/api/auth/status",
    "/api/auth/logout",
    "/api/comments/create",
    "/api/comments/list",
    "/api/comments/update",
    "/api/comments/delete",
];

fn parse_body(body: &str) -> Result<Value, ApiError> {
    if body.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(body).map_err(|_| ApiError::BadRequest("Invalid JSON body".to_string()))
}

fn with_bot_client<T>(
    state: &AppState,
    f: impl FnOnce(&dyn GitHubClient) -> Result<T, ApiError>,
) -> Result<T, ApiError> {
    let token = state
        .bot_token
        .get()
        .map_err(|e| ApiError::upstream("Bot credential unavailable", e))?;
    let client = state.factory.for_token(&token);
    f(client.as_ref())
}

/// Dispatch one request. Pure over the injected state, so tests drive it
/// directly without a socket.
pub fn route(
    state: &AppState,
    method: &Method,
    path: &str,
    query: &HashMap<String, String>,
    cookie: Option<&str>,
    body: &str,
) -> HttpReply {
    let now = Utc::now();
    let session =
        cookie.and_then(|header| session_from_cookie_header(&state.config.auth_secret, header, now));

    match (method, path) {
        (Method::Get, "/api/auth/login") => handle_login(&state.config),
        (Method::Get, "/api/oauth/authorized") => {
            match handle_authorized(&state.config, state.oauth.as_ref(), query, now) {
                Ok(reply) => reply,
                Err(error) => HttpReply::from_error(error),
            }
        }
        (Method::Get, "/api/auth/status") => handle_status(session.as_ref()),
        (Method::Post, "/api/auth/logout") => handle_logout(),
        (Method::Post, "/api/comments/create") => wrap(parse_body(body).and_then(|payload| {
            with_bot_client(state, |bot| {
                let locator = GitHubPrLocator::new(
                    &state.config.repo_owner,
                    &state.config.repo_name,
                    bot,
                );
                handle_create(
                    &state.config,
                    state.factory.as_ref(),
                    &state.bot_token,
                    &locator,
                    session.as_ref(),
                    &payload,
                    now,
                )
            })
        })),
        (Method::Get, "/api/comments/list") => wrap(with_bot_client(state, |bot| {
            let locator =
                GitHubPrLocator::new(&state.config.repo_owner, &state.config.repo_name, bot);
            handle_list(&state.config, bot, &locator, query)
        })),
        (Method::Patch, "/api/comments/update") => wrap(parse_body(body).and_then(|payload| {
            handle_update(
                &state.config,
                state.factory.as_ref(),
                session.as_ref(),
                &payload,
            )
        })),
        (Method::Delete, "/api/comments/delete") => wrap(parse_body(body).and_then(|payload| {
            handle_delete(
                &state.config,
                state.factory.as_ref(),
                session.as_ref(),
                &payload,
            )
        })),
        _ if KNOWN_PATHS.contains(&path) => {
            HttpReply::json(405, json!({ "error": "Method not allowed" }))
        }
        _ => HttpReply::json(404, json!({ "error": "Not found" })),
    }
}

fn parse_query(raw: &str) -> HashMap<String, String> {
    raw.split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((
                urlencoding::decode(key).ok()?.into_owned(),
                urlencoding::decode(value).ok()?.into_owned(),
            ))
        })
        .collect()
}

fn respond(request: tiny_http::Request, reply: HttpReply) {
    let mut response = tiny_http::Response::from_string(reply.body.to_string())
        .with_status_code(reply.status);
    if let Ok(header) =
        tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
    {
        response = response.with_header(header);
    }
    for (name, value) in reply.headers {
        if let Ok(header) = tiny_http::Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            response = response.with_header(header);
        }
    }
    if let Err(error) = request.respond(response) {
        tracing::warn!(%error, "failed to send response");
    }
}

/// Run the API server until the process is killed.
pub fn serve(state: AppState, port: u16) -> Result<()> {
    let server = tiny_http::Server::http(("127.0.0.1", port))
        .map_err(|e| anyhow::anyhow!("Failed to bind 127.0.0.1:{port}: {e}"))?;
    tracing::info!(port, "listening");

    for mut request in server.incoming_requests() {
        let url = request.url().to_string();
        let (path, raw_query) = match url.split_once('?') {
            Some((path, query)) => (path.to_string(), query.to_string()),
            None => (url, String::new()),
        };
        let query = parse_query(&raw_query);
        let cookie = request
            .headers()
            .iter()
            .find(|h| h.field.equiv("Cookie"))
            .map(|h| h.value.as_str().to_string());

        let mut body = String::new();
        if let Err(error) = request.as_reader().read_to_string(&mut body) {
            tracing::warn!(%error, "failed to read request body");
            respond(
                request,
                HttpReply::json(400, json!({ "error": "Unreadable request body" })),
            );
            continue;
        }

        let method = request.method().clone();
        let reply = route(&state, &method, &path, &query, cookie.as_deref(), &body);
        tracing::info!(method = %method, path = %path, status = reply.status, "request");
        respond(request, reply);
    }
    Ok(())
}
