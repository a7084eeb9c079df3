//! pdfium-backed page counter and rasteriser.
//!
//! pdfium keeps thread-local state and is not async-safe, so every call runs
//! inside `tokio::task::spawn_blocking`. With the `thread_safe` feature of
//! `pdfium-render` concurrent calls from several workers are serialised by
//! the binding itself; the pipeline's worker count still bounds how many
//! rendered bitmaps exist at once.
//!
//! The rendered bitmap is PNG-encoded before it leaves this module: PNG is
//! lossless, so small print and halftones survive, and the byte buffer is
//! what the print submitters spool.

use super::{PageCounter, Rasterizer};
use crate::error::{ConversionError, DocumentError};
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an existing pdfium shared library.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Counts and renders PDF pages with pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumBackend {
    library_path: Option<PathBuf>,
    max_rendered_pixels: u32,
}

impl PdfiumBackend {
    /// Bind to `$PDFIUM_LIB_PATH` when set, otherwise the system library.
    pub fn new(max_rendered_pixels: u32) -> Self {
        Self {
            library_path: std::env::var_os(PDFIUM_LIB_PATH_ENV).map(PathBuf::from),
            max_rendered_pixels: max_rendered_pixels.max(100),
        }
    }

    /// Bind to the pdfium library at `path`.
    pub fn with_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }
}

#[async_trait]
impl PageCounter for PdfiumBackend {
    async fn count(&self, document: &Path) -> Result<usize, DocumentError> {
        let path = document.to_path_buf();
        let library = self.library_path.clone();

        tokio::task::spawn_blocking(move || count_blocking(library.as_deref(), &path))
            .await
            .map_err(|e| DocumentError::Unreadable {
                path: document.to_path_buf(),
                detail: format!("page count task panicked: {e}"),
            })?
    }
}

#[async_trait]
impl Rasterizer for PdfiumBackend {
    async fn render(
        &self,
        document: &Path,
        page_index: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, ConversionError> {
        let path = document.to_path_buf();
        let library = self.library_path.clone();
        let max_pixels = self.max_rendered_pixels;

        tokio::task::spawn_blocking(move || {
            render_blocking(library.as_deref(), &path, page_index, dpi, max_pixels)
        })
        .await
        .map_err(|e| ConversionError::new(page_index, format!("render task panicked: {e}")))?
    }
}

fn bind(library: Option<&Path>) -> Result<Pdfium, String> {
    let bindings = match library {
        Some(path) => Pdfium::bind_to_library(path.to_string_lossy().to_string()),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| format!("failed to bind pdfium library: {e:?}"))?;
    Ok(Pdfium::new(bindings))
}

fn open<'a>(pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>, DocumentError> {
    pdfium.load_pdf_from_file(path, None).map_err(|e| {
        let detail = format!("{e:?}");
        if detail.to_lowercase().contains("password") {
            DocumentError::PasswordRequired {
                path: path.to_path_buf(),
            }
        } else {
            DocumentError::Corrupt {
                path: path.to_path_buf(),
                detail,
            }
        }
    })
}

fn count_blocking(library: Option<&Path>, path: &Path) -> Result<usize, DocumentError> {
    let pdfium = bind(library).map_err(|detail| DocumentError::Unreadable {
        path: path.to_path_buf(),
        detail,
    })?;
    let document = open(&pdfium, path)?;
    let pages = document.pages().len() as usize;
    info!("{}: {} pages", path.display(), pages);

    if pages == 0 {
        return Err(DocumentError::Unreadable {
            path: path.to_path_buf(),
            detail: "document has no pages".into(),
        });
    }
    Ok(pages)
}

fn render_blocking(
    library: Option<&Path>,
    path: &Path,
    page_index: usize,
    dpi: u32,
    max_pixels: u32,
) -> Result<Vec<u8>, ConversionError> {
    let fail = |detail: String| ConversionError::new(page_index, detail);

    let pdfium = bind(library).map_err(fail)?;
    let document = open(&pdfium, path).map_err(|e| fail(e.to_string()))?;
    let pages = document.pages();

    let index = u16::try_from(page_index)
        .map_err(|_| fail(format!("page index {page_index} exceeds pdfium limit")))?;
    let page = pages.get(index).map_err(|e| fail(format!("{e:?}")))?;

    let (width, height) = target_size(page.width().value, page.height().value, dpi, max_pixels);
    let render_config = PdfRenderConfig::new()
        .set_target_width(width)
        .set_maximum_height(height);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| fail(format!("{e:?}")))?;
    let image = bitmap.as_image();
    debug!(
        "Rendered page {} at {} dpi → {}x{} px",
        page_index + 1,
        dpi,
        image.width(),
        image.height()
    );

    encode_png(&image).map_err(|e| fail(format!("PNG encoding failed: {e}")))
}

/// Pixel size of a page of `width_pt × height_pt` points at `dpi`, with the
/// longest edge capped at `max_pixels` and the aspect ratio preserved.
fn target_size(width_pt: f32, height_pt: f32, dpi: u32, max_pixels: u32) -> (i32, i32) {
    let scale = dpi as f32 / 72.0;
    let mut width = (width_pt * scale).round().max(1.0);
    let mut height = (height_pt * scale).round().max(1.0);

    let longest = width.max(height);
    let cap = max_pixels as f32;
    if longest > cap {
        let shrink = cap / longest;
        width = (width * shrink).round().max(1.0);
        height = (height * shrink).round().max(1.0);
    }
    (width as i32, height as i32)
}

/// Encode a rendered page as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}
