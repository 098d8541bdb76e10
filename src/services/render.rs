//! PDF page rendering via pdfium.
//!
//! Renders each page to a PNG raster at a requested density. PDFs are laid
//! out in points at 72 per inch, so the zoom factor is `dpi / 72`.

use image::ImageFormat;
use pdfium_render::prelude::*;
use std::io::Cursor;
use tracing::debug;

use crate::domain::{PdfInfo, RenderedPage};
use crate::error::TakeoffError;

/// Native PDF resolution (points per inch).
const PDF_NATIVE_DPI: f32 = 72.0;

/// Decodes PDFs and rasterises their pages. Abstracted so the pipeline can
/// be exercised without a pdfium library on the host.
pub trait PageRenderer: Send + Sync {
    /// Render every page at the given density. A malformed PDF is fatal;
    /// there is no partial-page recovery.
    fn render(&self, pdf_bytes: &[u8], dpi: f32) -> Result<Vec<RenderedPage>, TakeoffError>;

    /// Page count plus first-page geometry at native resolution.
    fn info(&self, pdf_bytes: &[u8]) -> Result<PdfInfo, TakeoffError>;
}

/// pdfium-backed renderer. Binds to the system pdfium library per call;
/// callers run it under `spawn_blocking` since rasterisation is CPU-bound.
pub struct PdfiumRenderer;

impl PdfiumRenderer {
    fn bind() -> Result<Pdfium, TakeoffError> {
        Pdfium::bind_to_system_library()
            .or_else(|_| {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            })
            .map(Pdfium::new)
            .map_err(|e| TakeoffError::Decode(format!("pdfium unavailable: {e:?}")))
    }
}

impl PageRenderer for PdfiumRenderer {
    fn render(&self, pdf_bytes: &[u8], dpi: f32) -> Result<Vec<RenderedPage>, TakeoffError> {
        let pdfium = Self::bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(|e| TakeoffError::Decode(format!("failed to open PDF: {e:?}")))?;

        let zoom = dpi / PDF_NATIVE_DPI;
        let config = PdfRenderConfig::new().scale_page_by_factor(zoom);

        let mut pages = Vec::with_capacity(document.pages().len() as usize);
        for (index, page) in document.pages().iter().enumerate() {
            let bitmap = page
                .render_with_config(&config)
                .map_err(|e| TakeoffError::Decode(format!("failed to render page {}: {e:?}", index + 1)))?;

            let image = bitmap.as_image();
            let (width, height) = (image.width(), image.height());

            let mut png = Vec::new();
            image
                .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
                .map_err(|e| TakeoffError::Decode(format!("failed to encode page {}: {e}", index + 1)))?;

            pages.push(RenderedPage {
                png,
                number: index + 1,
                width_px: Some(width),
                height_px: Some(height),
            });
        }

        debug!(pages = pages.len(), dpi = dpi, "Rendered PDF");
        Ok(pages)
    }

    fn info(&self, pdf_bytes: &[u8]) -> Result<PdfInfo, TakeoffError> {
        let pdfium = Self::bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(|e| TakeoffError::Decode(format!("failed to open PDF: {e:?}")))?;

        let page_count = document.pages().len() as usize;
        let (width, height) = match document.pages().first() {
            Ok(first) => (first.width().value as u32, first.height().value as u32),
            Err(_) => (0, 0),
        };

        Ok(PdfInfo {
            page_count,
            width,
            height,
        })
    }
}
