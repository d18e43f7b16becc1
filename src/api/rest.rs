//! Table access over PostgREST: messages, read receipts, profiles

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::client::BackendClient;
use crate::models::{
    ChatMessage, Identity, MessageRow, NewMessage, Profile, ReadReceipt, ReceiptKey, ReceiptRow,
};
use crate::store::{IdentityProvider, MessageStore, ProfileDirectory, ReceiptStore};

const MESSAGES: &str = "chat_messages";
const READS: &str = "chat_message_reads";
const PROFILES: &str = "profiles";

/// Ids per receipt request, keeps the query string bounded.
const RECEIPT_CHUNK: usize = 100;

/// `in.(a,b,c)` filter value, percent-encoded for the query string.
fn in_filter(ids: &[String]) -> String {
    let list = format!("in.({})", ids.join(","));
    url::form_urlencoded::byte_serialize(list.as_bytes()).collect()
}

fn eq_filter(value: &str) -> String {
    let eq = format!("eq.{}", value);
    url::form_urlencoded::byte_serialize(eq.as_bytes()).collect()
}

#[async_trait]
impl MessageStore for BackendClient {
    async fn fetch_all(&self) -> Result<Vec<ChatMessage>> {
        let path = format!(
            "{}?select=*,profiles(id,full_name,avatar_url,role)&order=created_at.asc",
            MESSAGES
        );
        let rows: Vec<MessageRow> = self
            .rest_get(&path)
            .await?
            .json()
            .await
            .context("Failed to parse chat messages")?;
        Ok(rows.into_iter().map(ChatMessage::from).collect())
    }

    async fn insert(&self, message: &NewMessage) -> Result<()> {
        let body = serde_json::to_value(message).context("Failed to encode message")?;
        self.rest_post(MESSAGES, "return=minimal", &body).await?;
        Ok(())
    }
}

#[async_trait]
impl ReceiptStore for BackendClient {
    async fn fetch_by_message_ids(&self, ids: &[String]) -> Result<Vec<ReadReceipt>> {
        let mut receipts = Vec::new();
        for chunk in ids.chunks(RECEIPT_CHUNK) {
            let path = format!(
                "{}?select=message_id,user_id,read_at,profiles(full_name)&message_id={}",
                READS,
                in_filter(chunk)
            );
            let rows: Vec<ReceiptRow> = self
                .rest_get(&path)
                .await?
                .json()
                .await
                .context("Failed to parse read receipts")?;
            receipts.extend(rows.into_iter().map(ReadReceipt::from));
        }
        Ok(receipts)
    }

    async fn upsert_ignore_duplicates(&self, keys: &[ReceiptKey]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_value(keys).context("Failed to encode receipts")?;
        self.rest_post(
            &format!("{}?on_conflict=message_id,user_id", READS),
            "resolution=ignore-duplicates,return=minimal",
            &body,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ProfileDirectory for BackendClient {
    async fn lookup(&self, user_id: &str) -> Result<Option<Profile>> {
        let path = format!(
            "{}?select=id,full_name,avatar_url,role&id={}",
            PROFILES,
            eq_filter(user_id)
        );
        let mut rows: Vec<Profile> = self
            .rest_get(&path)
            .await?
            .json()
            .await
            .context("Failed to parse profile")?;
        Ok(rows.pop())
    }
}

#[async_trait]
impl IdentityProvider for BackendClient {
    async fn current_user(&self) -> Result<Option<Identity>> {
        let profile = self.lookup(self.user_id()).await?;
        let identity = match profile {
            Some(profile) => Identity {
                user_id: self.user_id().to_string(),
                role: profile.role,
                display_name: profile.display_name().to_string(),
                avatar_url: profile.avatar_url.clone(),
            },
            None => {
                tracing::warn!("No profile row for user {}", self.user_id());
                Identity {
                    user_id: self.user_id().to_string(),
                    role: Default::default(),
                    display_name: "Unknown".to_string(),
                    avatar_url: None,
                }
            }
        };
        Ok(Some(identity))
    }
}
