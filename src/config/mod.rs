//! Configuration and session storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::auth::Session;

/// Application configuration
#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    /// Backend project URL, e.g. `https://abcd.supabase.co`
    pub project_url: Option<String>,
    /// Public (anon) API key sent with every request
    pub anon_key: Option<String>,
    /// Play a sound when someone else's message arrives
    #[serde(default = "default_sound")]
    pub sound_enabled: bool,
    /// Signed-in session (from last login)
    pub session: Option<Session>,
}

fn default_sound() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_url: None,
            anon_key: None,
            sound_enabled: default_sound(),
            session: None,
        }
    }
}

/// Project coordinates needed before any request can be made.
#[derive(Debug, Clone)]
pub struct Project {
    pub url: String,
    pub anon_key: String,
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "gaivota", "gaivota-chat")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        Self::parse(&content)
    }

    fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // The file holds session tokens.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    /// Project URL and key, or an error telling the user to configure them.
    pub fn project(&self) -> Result<Project> {
        let url = self
            .project_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .context("No project URL configured. Run 'gaivota-chat configure --url ...'.")?;
        let anon_key = self
            .anon_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .context("No API key configured. Run 'gaivota-chat configure --anon-key ...'.")?;
        Ok(Project {
            url: url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        })
    }

    pub fn set_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    pub fn clear_session(&mut self) {
        self.session = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_defaults_when_keys_missing() {
        let config = Config::parse("").unwrap();
        assert!(config.sound_enabled);
        assert!(config.session.is_none());
        assert!(config.project().is_err());
    }

    #[test]
    fn test_round_trip_with_session() {
        let mut config = Config {
            project_url: Some("https://demo.supabase.co/".to_string()),
            anon_key: Some("anon".to_string()),
            sound_enabled: false,
            session: None,
        };
        config.set_session(Session {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            expires_at: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            user_id: "u1".to_string(),
            email: Some("ana@gaivota.news".to_string()),
        });

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed = Config::parse(&text).unwrap();
        assert!(!parsed.sound_enabled);
        assert_eq!(parsed.session.as_ref().unwrap().user_id, "u1");

        let project = parsed.project().unwrap();
        assert_eq!(project.url, "https://demo.supabase.co");
    }
}
