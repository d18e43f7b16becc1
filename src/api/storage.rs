//! Attachment upload to the `chat-files` bucket

use anyhow::Result;
use async_trait::async_trait;

use super::client::BackendClient;
use crate::models::LocalFile;
use crate::store::FileUploadService;

pub const BUCKET: &str = "chat-files";

#[async_trait]
impl FileUploadService for BackendClient {
    async fn upload(&self, path: &str, file: &LocalFile) -> Result<String> {
        self.storage_upload(BUCKET, path, &file.mime_type, file.bytes.clone())
            .await?;
        tracing::info!("Uploaded {} ({} bytes)", path, file.bytes.len());
        Ok(self.public_object_url(BUCKET, path))
    }
}
