//! PDF rasterisation: render every page to a size-bounded PNG on disk.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is CPU-bound. Rendering, resizing and PNG encoding all run on
//! the blocking pool so Tokio workers keep serving other requests.
//!
//! ## All or nothing
//!
//! Pages are written into a freshly reserved directory. If any page fails
//! the directory is removed before the error is returned; callers never see
//! a half-converted document.

use crate::config::{ExtractionConfig, ResizeLimits};
use crate::error::InvoiceError;
use crate::pipeline::{pages, resize};
use crate::storage::{reserve_unique_dir, secure_filename};
use image::ImageFormat;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Convert `pdf_path` into `output_root/<name>/Page_NN.png` files.
///
/// `<name>` is the sanitised PDF stem, suffixed `_1`, `_2`, … when taken.
/// Returns the directory holding the pages.
pub async fn convert_pdf(
    pdf_path: &Path,
    output_root: &Path,
    config: &ExtractionConfig,
) -> Result<PathBuf, InvoiceError> {
    let stem = pdf_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = secure_filename(&stem);
    let out_dir = reserve_unique_dir(output_root, &name).await?;

    let job = RenderJob {
        pdf_path: pdf_path.to_path_buf(),
        out_dir: out_dir.clone(),
        dpi: config.dpi,
        limits: config.resize,
        pdfium_lib_path: config.pdfium_lib_path.clone(),
    };

    let result = tokio::task::spawn_blocking(move || job.run())
        .await
        .map_err(|e| InvoiceError::Internal(format!("Render task panicked: {}", e)));

    match result.and_then(|r| r) {
        Ok(page_count) => {
            info!(
                "Converted '{}' → {} pages in {}",
                name,
                page_count,
                out_dir.display()
            );
            Ok(out_dir)
        }
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_dir_all(&out_dir).await {
                warn!("Failed to remove partial output {}: {}", out_dir.display(), rm);
            }
            Err(match e {
                InvoiceError::ConversionFailure { detail, .. } => {
                    InvoiceError::ConversionFailure { file: name, detail }
                }
                other => other,
            })
        }
    }
}

/// Bind to pdfium at `lib_dir`, or to the system library.
pub fn bind_pdfium(lib_dir: Option<&Path>) -> Result<Pdfium, InvoiceError> {
    let bindings = match lib_dir {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| InvoiceError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

struct RenderJob {
    pdf_path: PathBuf,
    out_dir: PathBuf,
    dpi: u32,
    limits: ResizeLimits,
    pdfium_lib_path: Option<PathBuf>,
}

impl RenderJob {
    /// Blocking implementation; returns the number of pages written.
    fn run(self) -> Result<usize, InvoiceError> {
        let failure = |detail: String| InvoiceError::ConversionFailure {
            file: self.pdf_path.display().to_string(),
            detail,
        };

        let pdfium = bind_pdfium(self.pdfium_lib_path.as_deref())?;
        let document = pdfium
            .load_pdf_from_file(&self.pdf_path, None)
            .map_err(|e| failure(format!("cannot open PDF: {:?}", e)))?;

        let doc_pages = document.pages();
        let total = doc_pages.len() as usize;
        if total == 0 {
            return Err(failure("document has no pages".into()));
        }
        info!("PDF loaded: {} pages", total);

        let render_config = PdfRenderConfig::new().scale_page_by_factor(self.dpi as f32 / 72.0);

        for (idx, page) in doc_pages.iter().enumerate() {
            let page_no = idx + 1;
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| failure(format!("page {page_no}: {:?}", e)))?;

            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                page_no,
                image.width(),
                image.height()
            );

            let image = resize::fit_to_limits(image, self.limits);
            let path = self.out_dir.join(pages::page_file_name(page_no, total));
            image
                .save_with_format(&path, ImageFormat::Png)
                .map_err(|e| failure(format!("page {page_no}: cannot write PNG: {e}")))?;
        }

        Ok(total)
    }
}
