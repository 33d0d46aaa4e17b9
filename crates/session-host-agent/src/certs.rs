//! Installed certificate lookup
//!
//! Certificates are informational only: the server reports the thumbprint of
//! the installed game certificate but does not terminate TLS itself.

use async_trait::async_trait;
use session_host_core::{HostError, Result};
use std::path::PathBuf;
use tracing::debug;

/// Looks up installed certificates by thumbprint
#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Returns the normalized thumbprint if a matching certificate is installed
    async fn find_by_thumbprint(&self, thumbprint: &str) -> Result<Option<String>>;
}

/// Certificates installed as files named after their thumbprint
/// (`<THUMBPRINT>.pem`, `.crt`, `.pfx`, ...) in a single folder
#[derive(Debug, Clone)]
pub struct FolderCertificateStore {
    folder: PathBuf,
}

impl FolderCertificateStore {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }
}

#[async_trait]
impl CertificateStore for FolderCertificateStore {
    async fn find_by_thumbprint(&self, thumbprint: &str) -> Result<Option<String>> {
        let wanted = thumbprint.trim();
        if wanted.is_empty() {
            return Ok(None);
        }

        let unreadable = |e: std::io::Error| {
            HostError::Certificate(format!(
                "cannot read certificate folder {}: {}",
                self.folder.display(),
                e
            ))
        };
        let mut entries = tokio::fs::read_dir(&self.folder).await.map_err(unreadable)?;

        while let Some(entry) = entries.next_entry().await.map_err(unreadable)? {
            let path = entry.path();
            if !tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.eq_ignore_ascii_case(wanted) {
                debug!("Found certificate {}", path.display());
                return Ok(Some(wanted.to_ascii_uppercase()));
            }
        }

        Ok(None)
    }
}
