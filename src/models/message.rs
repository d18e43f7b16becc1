//! Message-related models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Profile;

/// File attached to a message.
#[derive(Debug, Clone, PartialEq)]
pub struct FileAttachment {
    pub url: String,
    pub mime_type: Option<String>,
    pub name: Option<String>,
}

impl FileAttachment {
    pub fn is_image(&self) -> bool {
        self.mime_type
            .as_deref()
            .is_some_and(|t| t.starts_with("image/"))
    }

    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("attachment")
    }
}

/// Row of the `chat_messages` table, as delivered by REST queries and
/// realtime insert notifications.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageRow {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Author profile, present when the query embeds `profiles(...)`.
    #[serde(default)]
    pub profiles: Option<Profile>,
}

/// Chat message as held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub user_id: String,
    /// May be empty when a file is attached.
    pub content: String,
    pub file: Option<FileAttachment>,
    pub created_at: DateTime<Utc>,
    /// Resolved author profile, attached on arrival.
    pub author: Option<Profile>,
}

impl ChatMessage {
    pub fn author_name(&self) -> &str {
        self.author
            .as_ref()
            .map(Profile::display_name)
            .unwrap_or("Unknown")
    }
}

impl From<MessageRow> for ChatMessage {
    fn from(row: MessageRow) -> Self {
        let file = row.file_url.filter(|u| !u.is_empty()).map(|url| FileAttachment {
            url,
            mime_type: row.file_type,
            name: row.file_name,
        });
        Self {
            id: row.id,
            user_id: row.user_id,
            content: row.content.unwrap_or_default(),
            file,
            created_at: row.created_at,
            author: row.profiles,
        }
    }
}

/// Insert payload for `chat_messages`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMessage {
    pub user_id: String,
    pub content: String,
    pub file_url: Option<String>,
    pub file_type: Option<String>,
    pub file_name: Option<String>,
}

impl NewMessage {
    /// Plain text message with empty file fields.
    pub fn text(user_id: &str, content: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            content: content.to_string(),
            file_url: None,
            file_type: None,
            file_name: None,
        }
    }

    /// File message with empty text.
    pub fn file(user_id: &str, upload: &UploadedFile) -> Self {
        Self {
            user_id: user_id.to_string(),
            content: String::new(),
            file_url: Some(upload.url.clone()),
            file_type: Some(upload.mime_type.clone()),
            file_name: Some(upload.name.clone()),
        }
    }
}

/// A file picked from disk, ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl LocalFile {
    pub fn new(name: &str, bytes: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            mime_type: mime_guess::from_path(name)
                .first_or_octet_stream()
                .to_string(),
            bytes,
        }
    }

    /// Read a file from disk.
    pub async fn read(path: &std::path::Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();
        Ok(Self::new(&name, bytes))
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    pub url: String,
    pub mime_type: String,
    pub name: String,
}

/// Make a file name safe for use as a storage object key.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Object key for a new attachment: `<user id>/<uuid>-<sanitized name>`.
pub fn attachment_path(user_id: &str, file_name: &str) -> String {
    format!(
        "{}/{}-{}",
        user_id,
        uuid::Uuid::new_v4(),
        sanitize_file_name(file_name)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_path_layout() {
        let path = attachment_path("u1", "my photo.png");
        let (owner, object) = path.split_once('/').unwrap();
        assert_eq!(owner, "u1");
        assert!(object.ends_with("-my_photo.png"));
        assert_eq!(object.len(), 36 + 1 + "my_photo.png".len());
    }

    #[test]
    fn test_row_with_embedded_profile() {
        let json = r#"{
            "id": "m1",
            "user_id": "u1",
            "content": "hello",
            "file_url": null,
            "file_type": null,
            "file_name": null,
            "created_at": "2024-05-01T10:00:00.123+00:00",
            "profiles": {"id": "u1", "full_name": "Ana", "avatar_url": null, "role": "admin"}
        }"#;
        let row: MessageRow = serde_json::from_str(json).unwrap();
        let msg = ChatMessage::from(row);
        assert_eq!(msg.content, "hello");
        assert!(msg.file.is_none());
        assert_eq!(msg.author_name(), "Ana");
    }

    #[test]
    fn test_row_with_file() {
        let json = r#"{
            "id": "m2",
            "user_id": "u1",
            "content": "",
            "file_url": "https://x/storage/v1/object/public/chat-files/u1/a.png",
            "file_type": "image/png",
            "file_name": "a.png",
            "created_at": "2024-05-01T10:00:00Z"
        }"#;
        let msg = ChatMessage::from(serde_json::from_str::<MessageRow>(json).unwrap());
        let file = msg.file.unwrap();
        assert!(file.is_image());
        assert_eq!(file.label(), "a.png");
        assert!(msg.author.is_none());
    }

    #[test]
    fn test_local_file_mime_type() {
        let mime = |name: &str| LocalFile::new(name, Vec::new()).mime_type;
        assert_eq!(mime("photo.JPG"), "image/jpeg");
        assert_eq!(mime("report.pdf"), "application/pdf");
        assert_eq!(mime("clip.webm"), "video/webm");
        assert_eq!(mime("noext"), "application/octet-stream");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("my report (1).pdf"), "my_report__1_.pdf");
        assert_eq!(sanitize_file_name("../etc/passwd"), "_etc_passwd");
        assert_eq!(sanitize_file_name("..."), "file");
    }

    #[test]
    fn test_new_file_message_has_empty_text() {
        let upload = UploadedFile {
            url: "https://x/f.zip".to_string(),
            mime_type: "application/zip".to_string(),
            name: "f.zip".to_string(),
        };
        let msg = NewMessage::file("u1", &upload);
        assert!(msg.content.is_empty());
        assert_eq!(msg.file_name.as_deref(), Some("f.zip"));
    }
}
