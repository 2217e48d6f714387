//! Page image loading and encoding for the vision request.
//!
//! VLM APIs accept images as base64 data embedded in the JSON request body.
//! PNG is kept end to end because it is lossless; JPEG artefacts on rendered
//! text degrade transcription of small print such as GST numbers.

use crate::error::InvoiceError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// One page image handed to the extraction agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-based position of the page in the sorted image list.
    pub page_no: usize,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Read a page image from disk, re-encoding to PNG when it is not one.
pub async fn load_page_image(path: &Path, page_no: usize) -> Result<PageImage, InvoiceError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| InvoiceError::io(path, e))?;

    let bytes = match image::guess_format(&bytes) {
        Ok(ImageFormat::Png) => bytes,
        _ => {
            let img = image::load_from_memory(&bytes).map_err(|e| {
                InvoiceError::Internal(format!("cannot decode {}: {}", path.display(), e))
            })?;
            encode_png(&img).map_err(|e| {
                InvoiceError::Internal(format!("cannot re-encode {}: {}", path.display(), e))
            })?
        }
    };

    debug!("Loaded page {} ({} bytes)", page_no, bytes.len());
    Ok(PageImage {
        page_no,
        bytes,
        mime_type: "image/png".to_string(),
    })
}

/// Encode an image as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// Wrap a page image as base64 `ImageData` for the multimodal request.
///
/// `detail: "high"` lets GPT-4-class models tile the full page instead of a
/// single 512 px overview, which loses line-item tables.
pub fn to_image_data(page: &PageImage) -> ImageData {
    let b64 = STANDARD.encode(&page.bytes);
    debug!("Encoded page {} → {} bytes base64", page.page_no, b64.len());
    ImageData::new(b64, page.mime_type.clone()).with_detail("high")
}
