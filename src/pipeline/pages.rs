//! Page image naming and ordering.
//!
//! Rendered pages are written as `Page_NN.png`. The zero-padding width is
//! fixed per document (at least two digits, more for long documents), so
//! lexical and numeric order agree inside one output directory. Reading
//! back still sorts numerically, so directories produced elsewhere
//! (`Page_1.png`, `Page_10.png`) order correctly too.

use crate::error::InvoiceError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Sort key given to `.png` files that do not follow the `Page_<n>` pattern.
pub const UNNUMBERED_PAGE_KEY: u64 = 1_000_000;

static RE_PAGE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"Page_(\d+)\.png").unwrap());

/// File name for 1-based `page_no` in a document of `total_pages` pages.
pub fn page_file_name(page_no: usize, total_pages: usize) -> String {
    let width = total_pages.max(1).to_string().len().max(2);
    format!("Page_{page_no:0width$}.png")
}

/// Page number encoded in a file name, or [`UNNUMBERED_PAGE_KEY`].
pub fn page_sort_key(file_name: &str) -> u64 {
    RE_PAGE_NAME
        .captures(file_name)
        .and_then(|caps| caps[1].parse::<u64>().ok())
        .unwrap_or(UNNUMBERED_PAGE_KEY)
}

/// All `.png` files under `dir` (recursively), ordered by page number.
///
/// Files that do not match `Page_<n>.png` are kept and placed after the
/// numbered pages, ordered by name.
pub fn sorted_images(dir: &Path) -> Result<Vec<PathBuf>, InvoiceError> {
    let mut files = Vec::new();
    collect_pngs(dir, &mut files)?;

    let mut keyed: Vec<(u64, String, PathBuf)> = files
        .into_iter()
        .map(|p| {
            let name = p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            (page_sort_key(&name), name, p)
        })
        .collect();
    keyed.sort();

    Ok(keyed.into_iter().map(|(_, _, p)| p).collect())
}

fn collect_pngs(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), InvoiceError> {
    let entries = std::fs::read_dir(dir).map_err(|e| InvoiceError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| InvoiceError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| InvoiceError::io(&path, e))?;
        if file_type.is_dir() {
            collect_pngs(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "png") {
            out.push(path);
        }
    }
    Ok(())
}
