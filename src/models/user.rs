//! User-related models

use serde::{Deserialize, Serialize};

/// Role attached to a profile.
///
/// Only a closed set of roles may open the chat widget; everything the
/// backend sends that we do not recognize lands in `Unknown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Editor,
    Supporter,
    User,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Role {
    /// Capability gate for the chat widget.
    pub fn can_open_chat(self) -> bool {
        matches!(self, Role::Admin | Role::Editor | Role::Supporter)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Editor => "editor",
            Role::Supporter => "supporter",
            Role::User => "user",
            Role::Unknown => "unknown",
        }
    }
}

/// Display profile (row of the `profiles` table).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "full_name", default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub role: Role,
}

impl Profile {
    /// Name to show in the UI, never empty.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => "Unknown",
        }
    }
}

/// The signed-in caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
    pub display_name: String,
    pub avatar_url: Option<String>,
}
