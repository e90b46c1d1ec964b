use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadOutcome {
    pub success: bool,
    pub url: Option<String>,
    pub filename: Option<String>,
    pub size: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteOutcome {
    pub success: bool,
    pub error: Option<String>,
}

/// Where uploaded image bytes live. The database only keeps the reference.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn upload(&self, bytes: &[u8], original_name: &str) -> UploadOutcome;
    async fn delete(&self, filename: &str) -> DeleteOutcome;
}

/// Stored names are `<unix seconds>_<8 hex chars>.<original extension>`.
pub fn generate_stored_filename(original_name: &str) -> String {
    let extension = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default();
    format!(
        "{}_{}{}",
        Utc::now().timestamp(),
        &Uuid::new_v4().simple().to_string()[..8],
        extension
    )
}

pub fn ensure_dirs(upload_folder: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(upload_folder)
}

/// Keeps uploads in a local directory; URLs are rooted at `/uploads`.
pub struct LocalStore {
    root: PathBuf,
    url_prefix: String,
}

impl LocalStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            url_prefix: "/uploads".to_string(),
        }
    }

    fn path_for(&self, filename: &str) -> Option<PathBuf> {
        if filename.is_empty() || filename.contains("..") || filename.contains('/') || filename.contains('\\') {
            return None;
        }
        Some(self.root.join(filename))
    }
}

#[async_trait]
impl FileStore for LocalStore {
    async fn upload(&self, bytes: &[u8], original_name: &str) -> UploadOutcome {
        let filename = generate_stored_filename(original_name);
        let Some(path) = self.path_for(&filename) else {
            return UploadOutcome {
                error: Some("invalid filename".to_string()),
                ..Default::default()
            };
        };

        match tokio::fs::write(&path, bytes).await {
            Ok(()) => UploadOutcome {
                success: true,
                url: Some(format!("{}/{}", self.url_prefix, filename)),
                filename: Some(filename),
                size: Some(bytes.len() as u64),
                error: None,
            },
            Err(e) => {
                tracing::error!("Failed to write upload {}: {}", path.display(), e);
                UploadOutcome {
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        }
    }

    async fn delete(&self, filename: &str) -> DeleteOutcome {
        let Some(path) = self.path_for(filename) else {
            return DeleteOutcome {
                success: false,
                error: Some("invalid filename".to_string()),
            };
        };

        match tokio::fs::remove_file(&path).await {
            Ok(()) => DeleteOutcome { success: true, error: None },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Upload {} already gone", filename);
                DeleteOutcome { success: true, error: None }
            }
            Err(e) => DeleteOutcome {
                success: false,
                error: Some(e.to_string()),
            },
        }
    }
}
