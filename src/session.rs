// Session cookie: an HMAC-SHA256-signed token `v1.<payload>.<sig>` carrying
// the GitHub identity and access token. Anything that fails to verify is
// treated as no session, never as an error.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "prwiki-session";
const TOKEN_VERSION: &str = "v1";
const COOKIE_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub profile_url: String,
}

/// Contents of a session cookie. `expires_at` is epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub user: SessionUser,
    pub access_token: String,
    pub expires_at: i64,
}

impl SessionData {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now.timestamp_millis()
    }
}

fn sign(secret: &[u8], payload: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(payload.as_bytes());
    Some(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Encode a session into the signed cookie value.
pub fn encode_session(secret: &str, session: &SessionData) -> Result<String> {
    let json = serde_json::to_vec(session).context("Failed to serialize session")?;
    let payload = URL_SAFE_NO_PAD.encode(json);
    let sig = sign(secret.as_bytes(), &payload).context("Failed to sign session")?;
    Ok(format!("{TOKEN_VERSION}.{payload}.{sig}"))
}

/// Decode and verify a cookie value. Wrong version, bad signature, malformed
/// payload, or an expired session all yield `None`.
pub fn decode_session(secret: &str, token: &str, now: DateTime<Utc>) -> Option<SessionData> {
    let mut parts = token.splitn(3, '.');
    let version = parts.next()?;
    let payload = parts.next()?;
    let sig = parts.next()?;
    if version != TOKEN_VERSION {
        return None;
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload.as_bytes());
    let presented = URL_SAFE_NO_PAD.decode(sig).ok()?;
    mac.verify_slice(&presented).ok()?;

    let json = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let session: SessionData = serde_json::from_slice(&json).ok()?;
    session.is_valid(now).then_some(session)
}

/// Pull the session out of a request's `Cookie` header, if any.
pub fn session_from_cookie_header(
    secret: &str,
    header: &str,
    now: DateTime<Utc>,
) -> Option<SessionData> {
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        if name != SESSION_COOKIE {
            return None;
        }
        decode_session(secret, value, now)
    })
}

/// `Set-Cookie` header value establishing a session.
pub fn set_cookie_header(secret: &str, session: &SessionData) -> Result<String> {
    Ok(format!(
        "{SESSION_COOKIE}={}; Max-Age={COOKIE_MAX_AGE_SECS}; Path=/; HttpOnly; SameSite=Lax",
        encode_session(secret, session)?
    ))
}

/// `Set-Cookie` header value clearing the session.
pub fn clear_cookie_header() -> String {
    format!("{SESSION_COOKIE}=; Max-Age=0; Path=/; HttpOnly; SameSite=Lax")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(expires_at: i64) -> SessionData {
        SessionData {
            user: SessionUser {
                login: "alice".to_string(),
                name: Some("Alice".to_string()),
                avatar_url: "https://avatars.example/alice".to_string(),
                profile_url: "https://github.com/alice".to_string(),
            },
            access_token: "gho_user_token".to_string(),
            expires_at,
        }
    }

    fn future_millis() -> i64 {
        (Utc::now() + Duration::days(7)).timestamp_millis()
    }

    #[test]
    fn round_trip() {
        let original = session(future_millis());
        let token = encode_session("secret", &original).unwrap();
        let decoded = decode_session("secret", &token, Utc::now()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let token = encode_session("secret", &session(future_millis())).unwrap();
        let mut parts: Vec<&str> = token.splitn(3, '.').collect();
        let forged = URL_SAFE_NO_PAD.encode(b"{\"user\":{}}");
        parts[1] = &forged;
        let tampered = parts.join(".");
        assert!(decode_session("secret", &tampered, Utc::now()).is_none());
    }

    #[test]
    fn forged_signature_is_rejected() {
        let token = encode_session("secret", &session(future_millis())).unwrap();
        let mut parts: Vec<&str> = token.splitn(3, '.').collect();

        // valid base64 of the wrong length, then a wrong MAC of the right length
        let short = URL_SAFE_NO_PAD.encode(b"short");
        parts[2] = &short;
        assert!(decode_session("secret", &parts.join("."), Utc::now()).is_none());

        let wrong = URL_SAFE_NO_PAD.encode([0u8; 32]);
        parts[2] = &wrong;
        assert!(decode_session("secret", &parts.join("."), Utc::now()).is_none());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = encode_session("secret", &session(future_millis())).unwrap();
        assert!(decode_session("other-secret", &token, Utc::now()).is_none());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let token = encode_session("secret", &session(future_millis())).unwrap();
        let downgraded = format!("v0.{}", token.split_once('.').unwrap().1);
        assert!(decode_session("secret", &downgraded, Utc::now()).is_none());
    }

    #[test]
    fn expired_session_is_rejected() {
        let expired = (Utc::now() - Duration::hours(1)).timestamp_millis();
        let token = encode_session("secret", &session(expired)).unwrap();
        assert!(decode_session("secret", &token, Utc::now()).is_none());
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        assert!(decode_session("secret", "", Utc::now()).is_none());
        assert!(decode_session("secret", "v1", Utc::now()).is_none());
        assert!(decode_session("secret", "v1.!!!.???", Utc::now()).is_none());
    }

    #[test]
    fn cookie_header_parsing_finds_the_session() {
        let token = encode_session("secret", &session(future_millis())).unwrap();
        let header = format!("theme=dark; {SESSION_COOKIE}={token}; other=1");
        let decoded = session_from_cookie_header("secret", &header, Utc::now()).unwrap();
        assert_eq!(decoded.user.login, "alice");

        assert!(session_from_cookie_header("secret", "theme=dark", Utc::now()).is_none());
    }

    #[test]
    fn cookie_attributes() {
        let header = set_cookie_header("secret", &session(future_millis())).unwrap();
        assert!(header.starts_with(&format!("{SESSION_COOKIE}=v1.")));
        assert!(header.contains("Max-Age=604800"));
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("SameSite=Lax"));
        assert!(header.contains("Path=/"));

        let cleared = clear_cookie_header();
        assert!(cleared.contains("Max-Age=0"));
    }
}
