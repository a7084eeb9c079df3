//! External collaborators consumed by the pipeline.
//!
//! The pipeline never rasterises or talks to a printer itself. It drives
//! three narrow async traits and leaves the work to whatever sits behind
//! them:
//!
//! ```text
//! PageCounter   count(path)               → total pages | DocumentError
//! Rasterizer    render(path, page, dpi)   → PNG bytes   | ConversionError
//! PrintSubmitter submit(png, device, page) → Ack         | SubmissionError
//! ```
//!
//! Cancellation never interrupts a call in progress: the pipeline awaits
//! every `render` and `submit` it has started, then discards the outcome if
//! the job was stopped meanwhile. A `submit` is dropped only when its
//! acknowledgment deadline elapses, so submitters must clean up on drop.
//!
//! Shipped implementations:
//! * [`pdfium::PdfiumBackend`] — page counter and rasteriser via pdfium
//! * [`lp::LpSubmitter`] — CUPS `lp` print queue
//! * [`spool::SpoolDirSubmitter`] — numbered PNG files in a folder

pub mod lp;
pub mod pdfium;
pub mod spool;

use crate::error::{ConversionError, DocumentError, SubmissionError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Authoritative page count prober.
#[async_trait]
pub trait PageCounter: Send + Sync {
    async fn count(&self, document: &Path) -> Result<usize, DocumentError>;
}

/// Renders one page to encoded image bytes.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn render(
        &self,
        document: &Path,
        page_index: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, ConversionError>;
}

/// Hands one rendered page to an output device.
///
/// The consumer calls this for one page at a time and imposes its own
/// timeout around the returned future.
#[async_trait]
pub trait PrintSubmitter: Send + Sync {
    async fn submit(
        &self,
        image: &[u8],
        device_id: &str,
        page_index: usize,
    ) -> Result<Ack, SubmissionError>;
}

/// Device acknowledgment for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub device_id: String,
    pub page_index: usize,
    /// Spooler request id, written file, or similar, when the device reports one.
    pub reference: Option<String>,
}

/// The three collaborators a [`crate::controller::PrintPipeline`] runs against.
#[derive(Clone)]
pub struct Backends {
    pub counter: Arc<dyn PageCounter>,
    pub rasterizer: Arc<dyn Rasterizer>,
    pub submitter: Arc<dyn PrintSubmitter>,
}

impl Backends {
    pub fn new(
        counter: Arc<dyn PageCounter>,
        rasterizer: Arc<dyn Rasterizer>,
        submitter: Arc<dyn PrintSubmitter>,
    ) -> Self {
        Self {
            counter,
            rasterizer,
            submitter,
        }
    }

    /// pdfium for counting and rendering, `submitter` for output.
    pub fn pdfium(pdfium: pdfium::PdfiumBackend, submitter: Arc<dyn PrintSubmitter>) -> Self {
        let pdfium = Arc::new(pdfium);
        Self {
            counter: pdfium.clone(),
            rasterizer: pdfium,
            submitter,
        }
    }
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends")
            .field("counter", &"<dyn PageCounter>")
            .field("rasterizer", &"<dyn Rasterizer>")
            .field("submitter", &"<dyn PrintSubmitter>")
            .finish()
    }
}
