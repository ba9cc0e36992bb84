use crate::error::{CoordinatorError, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};

pub const CHAT_FILES_BUCKET: &str = "chat_files";
pub const TEACHING_DEMOS_BUCKET: &str = "teaching_demos";

pub const MAX_ATTACHMENT_BYTES: u64 = 5 * 1024 * 1024;
pub const MAX_DEMO_BYTES: u64 = 100 * 1024 * 1024;

const ALLOWED_ATTACHMENT_TYPES: &[&str] = &[
    "application/pdf",
    "image/jpeg",
    "image/png",
    "image/jpg",
];

/// Client-side check for chat attachments: PDF or JPEG/PNG/JPG images up to
/// 5 MB. A rejected file never leaves the caller; no store or upload call is
/// made for it.
pub fn validate_attachment(content_type: &str, size: u64) -> Result<()> {
    if !ALLOWED_ATTACHMENT_TYPES.contains(&content_type) {
        return Err(CoordinatorError::Attachment(
            "Only PDF and image files (JPEG, PNG, JPG) are allowed.".into(),
        ));
    }
    if size > MAX_ATTACHMENT_BYTES {
        return Err(CoordinatorError::Attachment(
            "Files must be smaller than 5MB.".into(),
        ));
    }
    Ok(())
}

/// Teaching-demo uploads accept any video type up to 100 MB.
pub fn validate_demo(content_type: &str, size: u64) -> Result<()> {
    if !content_type.starts_with("video/") {
        return Err(CoordinatorError::Attachment("Please upload a video file".into()));
    }
    if size > MAX_DEMO_BYTES {
        return Err(CoordinatorError::Attachment(
            "Video must be less than 100MB".into(),
        ));
    }
    Ok(())
}

/// Blob storage backed by a local directory, one subdirectory per bucket.
/// Uploaded objects are addressable under the daemon's public base URL.
#[derive(Debug, Clone)]
pub struct LocalBucket {
    root: PathBuf,
    public_base: String,
}

impl LocalBucket {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store bytes under `<bucket>/<owner>/<millis>.<ext>` and return the
    /// public URL of the object.
    pub async fn upload(
        &self,
        bucket: &str,
        owner: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<String> {
        let ext = file_name.rsplit('.').next().unwrap_or("bin");
        let object = format!("{owner}/{}.{ext}", Utc::now().timestamp_millis());

        let path = self.root.join(bucket).join(&object);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        Ok(format!(
            "{}/files/{bucket}/{object}",
            self.public_base.trim_end_matches('/')
        ))
    }
}
