//! Disk storage for uploaded profile images.
//! Files are named `{timestamp_millis}-{original_name}`.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex_lite::Regex;
use tokio::fs;
use tokio::io::AsyncWriteExt;

const FALLBACK_NAME: &str = "upload";

static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[/\\:*?"<>|\x00-\x1f]"#).expect("valid regex")
});

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("cannot write uploaded file: {0}")]
    Io(#[from] std::io::Error),
}

/// File received with a registration.
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub original_name: String,
    pub bytes: Vec<u8>,
}

/// Directory holding uploaded images.
#[derive(Debug, Clone)]
pub struct AssetStorage {
    directory: PathBuf,
}

impl AssetStorage {
    /// Create a new [`AssetStorage`].
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Create the directory if missing.
    pub async fn ensure_directory(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.directory).await?;
        Ok(())
    }

    /// Write upload on disk and return the generated file name.
    ///
    /// An existing file is never overwritten: a name collision is reported
    /// as [`std::io::ErrorKind::AlreadyExists`].
    pub async fn store(&self, upload: &Upload) -> Result<String, StorageError> {
        let name = generate_name(&upload.original_name);
        let path = self.directory.join(&name);

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(&upload.bytes).await?;
        file.flush().await?;

        tracing::debug!(file = %name, size = upload.bytes.len(), "stored upload");

        Ok(name)
    }

    /// Delete a stored file.
    pub async fn remove(&self, name: &str) -> Result<(), StorageError> {
        fs::remove_file(self.directory.join(name)).await?;
        Ok(())
    }
}

fn generate_name(original_name: &str) -> String {
    format!(
        "{}-{}",
        chrono::Utc::now().timestamp_millis(),
        sanitize(original_name)
    )
}

/// Keep the last path component and replace characters a filesystem
/// would interpret.
fn sanitize(original_name: &str) -> String {
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let base = UNSAFE_CHARS.replace_all(base, "_");

    match base.as_ref() {
        "" | "." | ".." => FALLBACK_NAME.to_owned(),
        name => name.to_owned(),
    }
}
