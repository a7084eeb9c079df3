//! CUPS print queue submitter.
//!
//! Each page is spooled into a temporary PNG and handed to `lp`. The call
//! returns once the spooler has accepted the request, which is the
//! acknowledgment the consumer waits for before sending the next page.
//! An `lp` process whose submission is abandoned is killed.

use super::{Ack, PrintSubmitter};
use crate::error::SubmissionError;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// Device id meaning "the system default printer" (no `-d` flag).
pub const DEFAULT_DEVICE: &str = "default";

/// Submits pages with the CUPS `lp` command.
#[derive(Debug, Clone)]
pub struct LpSubmitter {
    program: PathBuf,
    options: Vec<String>,
}

impl Default for LpSubmitter {
    fn default() -> Self {
        Self {
            program: PathBuf::from("lp"),
            options: vec!["fit-to-page".to_string()],
        }
    }
}

impl LpSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different `lp`-compatible executable.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Extra `-o` job options, e.g. `media=A4`.
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    fn command(&self, device_id: &str, page_index: usize, file: &std::path::Path) -> Command {
        let mut cmd = Command::new(&self.program);
        if device_id != DEFAULT_DEVICE {
            cmd.arg("-d").arg(device_id);
        }
        for option in &self.options {
            cmd.arg("-o").arg(option);
        }
        cmd.arg("-t").arg(format!("page {}", page_index + 1));
        cmd.arg(file);
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl PrintSubmitter for LpSubmitter {
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

        // Removed when dropped, after `lp` has copied the file into the spool.
        let spool = tempfile::Builder::new()
            .prefix("pagepress-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| rejected(format!("tempfile: {e}")))?;
        tokio::fs::write(spool.path(), image)
            .await
            .map_err(|e| rejected(format!("tempfile write: {e}")))?;

        // If the deadline drops this future, `lp` is killed while `spool`
        // still exists, so an abandoned request never prints a late copy.
        let mut lp = self.command(device_id, page_index, spool.path());
        let output = lp
            .output()
            .await
            .map_err(|e| rejected(format!("failed to run {}: {e}", self.program.display())))?;
        drop(spool);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(rejected(if stderr.is_empty() {
                format!("lp exited with {}", output.status)
            } else {
                stderr
            }));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let reference = parse_request_id(&stdout);
        debug!(
            "Page {} accepted by '{}' ({})",
            page_index + 1,
            device_id,
            reference.as_deref().unwrap_or("no request id")
        );

        Ok(Ack {
            device_id: device_id.to_string(),
            page_index,
            reference,
        })
    }
}

/// Extract `office-42` from `request id is office-42 (1 file(s))`.
fn parse_request_id(stdout: &str) -> Option<String> {
    let rest = stdout.split("request id is ").nth(1)?;
    rest.split_whitespace().next().map(str::to_string)
}
