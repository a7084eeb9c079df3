//! Document resolution: turn a submitted path or URL into a local PDF.
//!
//! Documents usually arrive as media links from the messaging layer. pdfium
//! needs a file-system path, so URLs are streamed into a `TempDir` that is
//! owned by the job and removed when the job ends. Local paths are checked
//! for existence, permissions and the `%PDF` magic before any worker starts.

use crate::error::DocumentError;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

/// A document ready for counting and rendering.
#[derive(Debug)]
pub enum ResolvedInput {
    Local(PathBuf),
    /// Downloaded copy; the directory lives as long as this value.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve `input` to a local, readable PDF.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, DocumentError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(DocumentError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download(input, timeout_secs).await
    } else {
        let path = PathBuf::from(input);
        check_local(&path).await?;
        debug!("Resolved local document: {}", path.display());
        Ok(ResolvedInput::Local(path))
    }
}

async fn check_local(path: &Path) -> Result<(), DocumentError> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(DocumentError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(_) => {
            return Err(DocumentError::NotFound {
                path: path.to_path_buf(),
            })
        }
    };

    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic).await {
        Ok(_) if &magic == b"%PDF" => Ok(()),
        Ok(_) => Err(DocumentError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        }),
        Err(e) => Err(DocumentError::Unreadable {
            path: path.to_path_buf(),
            detail: format!("too short to be a PDF: {e}"),
        }),
    }
}

async fn download(url: &str, timeout_secs: u64) -> Result<ResolvedInput, DocumentError> {
    info!("Downloading document from {}", url);

    let failed = |reason: String| DocumentError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let classify = |e: reqwest::Error| {
        if e.is_timeout() {
            DocumentError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(classify)?;
    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let temp_dir = TempDir::new().map_err(|e| failed(format!("temp dir: {e}")))?;
    let path = temp_dir.path().join(file_name(url));
    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| failed(format!("create {}: {e}", path.display())))?;

    let mut body = response.bytes_stream();
    let mut written = 0usize;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(classify)?;
        file.write_all(&chunk)
            .await
            .map_err(|e| failed(format!("write {}: {e}", path.display())))?;
        written += chunk.len();
    }
    file.flush()
        .await
        .map_err(|e| failed(format!("flush {}: {e}", path.display())))?;
    drop(file);

    check_local(&path).await?;
    info!("Downloaded {} bytes to {}", written, path.display());

    Ok(ResolvedInput::Downloaded {
        path,
        _temp_dir: temp_dir,
    })
}

/// Last path segment of `url` when it looks like a file name, else `document.pdf`.
fn file_name(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "document.pdf".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn file_name_from_url() {
        assert_eq!(file_name("https://cdn.example.com/media/invoice.pdf"), "invoice.pdf");
        assert_eq!(file_name("https://cdn.example.com/media/abc123"), "document.pdf");
        assert_eq!(file_name("not a url"), "document.pdf");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let err = resolve_input("/definitely/not/here.pdf", 5).await.unwrap_err();
        assert!(matches!(err, DocumentError::NotFound { .. }));
    }

    #[tokio::test]
    async fn non_pdf_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.pdf");
        std::fs::write(&path, b"hello world").unwrap();

        let err = resolve_input(path.to_str().unwrap(), 5).await.unwrap_err();
        assert!(matches!(err, DocumentError::NotAPdf { magic, .. } if &magic == b"hell"));
    }

    #[tokio::test]
    async fn pdf_magic_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.pdf");
        std::fs::write(&path, b"%PDF-1.7\n").unwrap();

        let resolved = resolve_input(path.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(resolved.path(), path.as_path());
    }

    #[tokio::test]
    async fn empty_input_is_invalid() {
        let err = resolve_input("   ", 5).await.unwrap_err();
        assert!(matches!(err, DocumentError::InvalidInput { .. }));
    }
}
