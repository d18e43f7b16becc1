//! Session tokens and the token endpoint of the hosted auth API

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Project;

/// Refresh this long before the access token actually expires.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Signed-in session as persisted in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user_id: String,
    pub email: Option<String>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_MARGIN_SECS) >= self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
    email: Option<String>,
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: now + Duration::seconds(self.expires_in),
            user_id: self.user.id,
            email: self.user.email,
        }
    }
}

/// Sign in with e-mail and password.
pub async fn password_grant(
    http: &reqwest::Client,
    project: &Project,
    email: &str,
    password: &str,
) -> Result<Session> {
    let body = serde_json::json!({ "email": email, "password": password });
    token_request(http, project, "password", &body).await
}

/// Exchange a refresh token for a new session.
pub async fn refresh_grant(
    http: &reqwest::Client,
    project: &Project,
    refresh_token: &str,
) -> Result<Session> {
    let body = serde_json::json!({ "refresh_token": refresh_token });
    token_request(http, project, "refresh_token", &body).await
}

async fn token_request(
    http: &reqwest::Client,
    project: &Project,
    grant_type: &str,
    body: &serde_json::Value,
) -> Result<Session> {
    let url = format!("{}/auth/v1/token?grant_type={}", project.url, grant_type);
    tracing::debug!("Auth POST {}", url);

    let resp = http
        .post(&url)
        .header("apikey", &project.anon_key)
        .json(body)
        .send()
        .await
        .with_context(|| format!("Auth POST {} failed", url))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        bail!("Auth HTTP {} ({} grant): {}", status.as_u16(), grant_type, text);
    }

    let token: TokenResponse = resp
        .json()
        .await
        .context("Failed to parse token response")?;
    Ok(token.into_session(Utc::now()))
}

/// Revoke the session server-side. Best-effort.
pub async fn revoke(http: &reqwest::Client, project: &Project, access_token: &str) -> Result<()> {
    let url = format!("{}/auth/v1/logout", project.url);
    let resp = http
        .post(&url)
        .header("apikey", &project.anon_key)
        .bearer_auth(access_token)
        .send()
        .await
        .with_context(|| format!("Auth POST {} failed", url))?;
    if !resp.status().is_success() {
        bail!("Logout returned HTTP {}", resp.status().as_u16());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_token_response_to_session() {
        let json = r#"{
            "access_token": "at",
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "rt",
            "user": {"id": "u1", "email": "ana@gaivota.news", "role": "authenticated"}
        }"#;
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let session = serde_json::from_str::<TokenResponse>(json)
            .unwrap()
            .into_session(now);
        assert_eq!(session.user_id, "u1");
        assert_eq!(session.expires_at, Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap());
    }

    #[test]
    fn test_expiry_margin() {
        let expires_at = Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap();
        let session = Session {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            expires_at,
            user_id: "u1".to_string(),
            email: None,
        };
        assert!(!session.is_expired_at(expires_at - Duration::seconds(120)));
        assert!(session.is_expired_at(expires_at - Duration::seconds(30)));
        assert!(session.is_expired_at(expires_at + Duration::seconds(1)));
    }
}
