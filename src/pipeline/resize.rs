//! Constrained aspect-ratio scaling for rendered pages.
//!
//! Only the dominant side is checked: a portrait page is limited by
//! `max_height`, a landscape page by `max_width`. Square pages use the
//! tighter of the two. The other side follows the original aspect ratio,
//! rounded to the nearest pixel.

use crate::config::ResizeLimits;
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::debug;

/// Dimensions a `width × height` page must be scaled to, or `None` when it
/// already fits.
pub fn target_dimensions(width: u32, height: u32, limits: ResizeLimits) -> Option<(u32, u32)> {
    if width == 0 || height == 0 {
        return None;
    }

    if height > width {
        if height <= limits.max_height {
            return None;
        }
        let new_w = scale_side(width, limits.max_height, height);
        Some((new_w, limits.max_height))
    } else if width > height {
        if width <= limits.max_width {
            return None;
        }
        let new_h = scale_side(height, limits.max_width, width);
        Some((limits.max_width, new_h))
    } else {
        let limit = limits.max_width.min(limits.max_height);
        (width > limit).then_some((limit, limit))
    }
}

/// `side * new_dominant / old_dominant`, rounded, never below 1 px.
fn scale_side(side: u32, new_dominant: u32, old_dominant: u32) -> u32 {
    let scaled = (side as f64 * new_dominant as f64 / old_dominant as f64).round();
    (scaled as u32).max(1)
}

/// Scale `img` down to fit `limits`; returns it untouched when it fits.
pub fn fit_to_limits(img: DynamicImage, limits: ResizeLimits) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    match target_dimensions(w, h, limits) {
        Some((nw, nh)) => {
            debug!("Resizing page {}x{} → {}x{}", w, h, nw, nh);
            img.resize_exact(nw, nh, FilterType::Lanczos3)
        }
        None => img,
    }
}
