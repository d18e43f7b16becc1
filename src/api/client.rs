//! Authenticated HTTP client for the hosted backend
//!
//! Wraps reqwest::Client with the project key and the session bearer token.
//! The session is refreshed whenever it is about to expire, so a long-lived
//! client keeps working past the first access token.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::RwLock;

use crate::auth::{self, Session};
use crate::config::{Config, Project};

/// Client for the REST, storage and realtime endpoints of one project.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    project: Project,
    user_id: String,
    /// Shared by all clones, so one refresh serves every request.
    session: Arc<RwLock<Session>>,
    sound_enabled: bool,
    /// Write refreshed sessions back to the config file.
    persist: bool,
}

impl BackendClient {
    /// Load config and build client. Refreshes the session if it is expired.
    pub async fn new() -> Result<Self> {
        let mut config = Config::load()?;
        let project = config.project()?;

        match auth::ensure_fresh(&mut config).await {
            Ok(true) => {}
            Ok(false) => bail!("Not logged in. Run 'gaivota-chat login'."),
            Err(e) => bail!("{:#}. Run 'gaivota-chat login'.", e),
        }
        let session = config
            .session
            .clone()
            .context("Not logged in. Run 'gaivota-chat login'.")?;

        Ok(Self::with_session(project, session, config.sound_enabled, true))
    }

    fn with_session(project: Project, session: Session, sound_enabled: bool, persist: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            project,
            user_id: session.user_id.clone(),
            session: Arc::new(RwLock::new(session)),
            sound_enabled,
            persist,
        }
    }

    /// Client that never touches the config file.
    #[cfg(test)]
    pub fn detached(project: Project, session: Session) -> Self {
        Self::with_session(project, session, true, false)
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Current bearer token, refreshing the session first if it expired.
    pub async fn access_token(&self) -> Result<String> {
        {
            let session = self.session.read().await;
            if !session.is_expired() {
                return Ok(session.access_token.clone());
            }
        }

        let mut session = self.session.write().await;
        // Another task may have refreshed while we waited for the lock.
        if !session.is_expired() {
            return Ok(session.access_token.clone());
        }

        tracing::info!("Session expired, refreshing...");
        let fresh = auth::session::refresh_grant(&self.http, &self.project, &session.refresh_token)
            .await
            .context("Session refresh failed. Run 'gaivota-chat login'")?;
        if self.persist {
            if let Err(e) = save_session(&fresh) {
                tracing::warn!("Could not save refreshed session: {:#}", e);
            }
        }
        *session = fresh;
        tracing::info!("Session refreshed");
        Ok(session.access_token.clone())
    }

    pub fn sound_enabled(&self) -> bool {
        self.sound_enabled
    }

    fn rest_url(&self, path_and_query: &str) -> String {
        format!("{}/rest/v1/{}", self.project.url, path_and_query)
    }

    /// Public URL of an object in a public bucket.
    pub fn public_object_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.project.url, bucket, path
        )
    }

    async fn authorized(&self, req: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        let token = self.access_token().await?;
        Ok(req
            .header("apikey", &self.project.anon_key)
            .bearer_auth(token))
    }

    /// GET a PostgREST resource (`table?select=...`).
    pub async fn rest_get(&self, path_and_query: &str) -> Result<reqwest::Response> {
        let url = self.rest_url(path_and_query);
        tracing::debug!("REST GET {}", url);

        let resp = self
            .authorized(self.http.get(&url))
            .await?
            .send()
            .await
            .with_context(|| format!("REST GET {} failed", url))?;

        check_response(resp, &url).await
    }

    /// POST rows to a PostgREST resource with the given `Prefer` header.
    pub async fn rest_post(
        &self,
        path_and_query: &str,
        prefer: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response> {
        let url = self.rest_url(path_and_query);
        tracing::debug!("REST POST {}", url);

        let resp = self
            .authorized(self.http.post(&url))
            .await?
            .header("Prefer", prefer)
            .json(body)
            .send()
            .await
            .with_context(|| format!("REST POST {} failed", url))?;

        check_response(resp, &url).await
    }

    /// Upload raw bytes to `bucket/path`.
    pub async fn storage_upload(
        &self,
        bucket: &str,
        path: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/storage/v1/object/{}/{}", self.project.url, bucket, path);
        tracing::debug!("Storage POST {} ({} bytes)", url, bytes.len());

        let resp = self
            .authorized(self.http.post(&url))
            .await?
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .with_context(|| format!("Storage POST {} failed", url))?;

        check_response(resp, &url).await
    }
}

/// Store a refreshed session so the next process starts with it.
fn save_session(session: &Session) -> Result<()> {
    let mut config = Config::load()?;
    config.set_session(session.clone());
    config.save()
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        bail!(
            "401 Unauthorized for {}. Session may be invalid -- run 'gaivota-chat login'.",
            url
        );
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, body);
    }
    Ok(resp)
}
