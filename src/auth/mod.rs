//! Authentication against the hosted auth API
//!
//! E-mail/password sign-in; the resulting session (access and refresh
//! token) is kept in the config file and refreshed on demand.

pub mod session;

use anyhow::{Context, Result};

pub use session::Session;

use crate::config::Config;

/// Refresh the stored session if it is expired. Returns Ok(true) when a
/// usable session is stored afterwards.
pub async fn ensure_fresh(config: &mut Config) -> Result<bool> {
    let Some(current) = config.session.clone() else {
        return Ok(false);
    };
    if !current.is_expired() {
        return Ok(true);
    }

    let project = config.project()?;
    tracing::info!("Session expired, refreshing...");
    let http = reqwest::Client::new();
    let fresh = session::refresh_grant(&http, &project, &current.refresh_token)
        .await
        .context("Session refresh failed")?;
    config.set_session(fresh);
    config.save()?;
    tracing::info!("Session refreshed");
    Ok(true)
}

/// Sign in with e-mail and password.
pub async fn login(email: &str, password: &str, force: bool) -> Result<()> {
    let mut config = Config::load()?;

    if !force && config.session.is_some() {
        match ensure_fresh(&mut config).await {
            Ok(true) => {
                println!("Already logged in. Use --force to sign in again.");
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!("Refresh failed, signing in again: {:#}", e);
            }
        }
    }

    let project = config.project()?;
    let http = reqwest::Client::new();
    tracing::info!("Signing in as {}...", email);
    let session = session::password_grant(&http, &project, email, password).await?;

    println!("Logged in as {} ({}).", email, session.user_id);
    config.set_session(session);
    config.save()?;
    Ok(())
}

/// Revoke and forget the stored session.
pub async fn logout() -> Result<()> {
    let mut config = Config::load()?;
    if let (Some(session), Ok(project)) = (config.session.as_ref(), config.project()) {
        let http = reqwest::Client::new();
        if let Err(e) = session::revoke(&http, &project, &session.access_token).await {
            tracing::warn!("Server-side logout failed: {:#}", e);
        }
    }
    config.clear_session();
    config.save()?;
    println!("Logged out.");
    Ok(())
}

/// Display current configuration and session status.
pub async fn status() -> Result<()> {
    let config = Config::load()?;

    match config.project() {
        Ok(project) => println!("Project:   {}", project.url),
        Err(_) => println!("Project:   not configured"),
    }
    println!(
        "Sound:     {}",
        if config.sound_enabled { "on" } else { "off" }
    );

    match config.session {
        Some(ref session) if !session.is_expired() => {
            println!("Session:   valid");
            println!("  user:       {}", session.user_id);
            if let Some(ref email) = session.email {
                println!("  email:      {}", email);
            }
            println!("  expires_at: {}", session.expires_at.to_rfc3339());
        }
        Some(_) => println!("Session:   expired (will refresh on next use)"),
        None => {
            println!("Session:   none");
            println!("\nRun 'gaivota-chat login' to authenticate.");
        }
    }

    Ok(())
}
