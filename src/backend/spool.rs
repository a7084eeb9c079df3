//! Spool-directory submitter: one numbered PNG per page.
//!
//! Useful as a dry run, and as a hot folder for printers that watch a
//! directory. Files are written to a temporary name and renamed into place,
//! so a watcher never sees a partial page.

use super::{Ack, PrintSubmitter};
use crate::error::SubmissionError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Writes `<device>/page-0001.png`, `<device>/page-0002.png`, ... under a root folder.
#[derive(Debug, Clone)]
pub struct SpoolDirSubmitter {
    root: PathBuf,
}

impl SpoolDirSubmitter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path of `page_index` on `device_id`.
    pub fn page_path(&self, device_id: &str, page_index: usize) -> PathBuf {
        self.root
            .join(sanitize(device_id))
            .join(format!("page-{:04}.png", page_index + 1))
    }
}

fn sanitize(device_id: &str) -> String {
    device_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl PrintSubmitter for SpoolDirSubmitter {
    async fn submit(
        &self,
        image: &[u8],
        device_id: &str,
        page_index: usize,
    ) -> Result<Ack, SubmissionError> {
        let rejected = |detail: String| SubmissionError::Rejected {
            device: device_id.to_string(),
            page: page_index,
            detail,
        };

        let path = self.page_path(device_id, page_index);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| rejected(format!("create {}: {e}", parent.display())))?;
        }

        let tmp_path = path.with_extension("png.tmp");
        tokio::fs::write(&tmp_path, image)
            .await
            .map_err(|e| rejected(format!("write {}: {e}", tmp_path.display())))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| rejected(format!("rename {}: {e}", path.display())))?;

        Ok(Ack {
            device_id: device_id.to_string(),
            page_index,
            reference: Some(path.display().to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_numbered_pages() {
        let dir = tempfile::tempdir().unwrap();
        let spool = SpoolDirSubmitter::new(dir.path());

        let ack = spool.submit(b"first", "front desk", 0).await.unwrap();
        spool.submit(b"second", "front desk", 1).await.unwrap();

        let first = dir.path().join("front_desk").join("page-0001.png");
        let second = dir.path().join("front_desk").join("page-0002.png");
        assert_eq!(std::fs::read(&first).unwrap(), b"first");
        assert_eq!(std::fs::read(&second).unwrap(), b"second");
        assert_eq!(ack.reference.as_deref(), Some(first.display().to_string().as_str()));
        assert!(!first.with_extension("png.tmp").exists());
    }

    #[tokio::test]
    async fn unwritable_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let spool = SpoolDirSubmitter::new(&blocker);
        let err = spool.submit(b"png", "office", 4).await.unwrap_err();
        assert!(matches!(err, SubmissionError::Rejected { page: 4, .. }));
    }
}
