//! Error types for the invoice-extract library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`InvoiceError`] — **Fatal**: the run cannot produce a result at all
//!   (bad upload, rasterisation failure, LLM endpoint unreachable). Returned
//!   as `Err(InvoiceError)` from the pipeline entry points and mapped to an
//!   HTTP status by [`crate::server`].
//!
//! * [`PageError`] — **Non-fatal**: one page produced nothing usable (the
//!   structuring reply never matched the schema). The page is dropped from
//!   [`crate::invoice::InvoiceData`] and the run continues.

use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage, used to label agent failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Stage {
    /// Wave 1: page image → free text.
    Extraction,
    /// Wave 2: free text → `Invoice`.
    Structuring,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Extraction => f.write_str("extraction"),
            Stage::Structuring => f.write_str("structuring"),
        }
    }
}

/// All fatal errors returned by the invoice-extract library.
#[derive(Debug, Error)]
pub enum InvoiceError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Upload missing, unreadable, or rejected by the extension allow-list.
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// The uploaded bytes are not a PDF.
    #[error("File is not a valid PDF: '{file}'\nFirst bytes: {magic:?}")]
    NotAPdf { file: String, magic: Vec<u8> },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// Rasterisation, resize or PNG write failed; the run is aborted.
    #[error("PdfToImage error while processing '{file}': {detail}")]
    ConversionFailure { file: String, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH to the directory containing libpdfium, or install it system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// An agent call kept failing after all transport retries.
    #[error("{stage} agent failed on page {page} after {retries} retries: {detail}")]
    AgentFailure {
        stage: Stage,
        page: usize,
        retries: u32,
        detail: String,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Filesystem error outside page conversion (upload save, directory scan).
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl InvoiceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        InvoiceError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors caused by what the client sent (bad upload, PDF that
    /// cannot be rasterised) rather than by the service or its upstreams.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            InvoiceError::InvalidInput { .. }
                | InvoiceError::NotAPdf { .. }
                | InvoiceError::ConversionFailure { .. }
        )
    }
}

/// A non-fatal error for a single page.
///
/// Logged and dropped by the orchestrator; never part of the response.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The structuring reply never deserialised into an `Invoice`.
    #[error("Page {page}: structuring reply rejected after {attempts} attempts: {detail}")]
    SchemaRejected {
        page: usize,
        attempts: u32,
        detail: String,
    },
}
