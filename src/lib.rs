//! # invoice-extract
//!
//! Extract structured invoice data from PDF documents using Large Language
//! Models.
//!
//! ## Why two agents?
//!
//! Asking one vision model to read a scanned invoice *and* emit strict JSON
//! in a single call mixes two hard problems: the model misreads small print
//! while it is busy respecting the schema. This crate splits them. A vision
//! agent first transcribes each page into labelled plain text; a second,
//! text-only agent maps that transcription onto the [`Invoice`] schema, with
//! a bounded retry when its reply does not validate.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF upload
//!  │
//!  ├─ 1. Save     validate extension + %PDF signature, store under pdf/
//!  ├─ 2. Render   rasterise pages via pdfium (spawn_blocking), bounded resize
//!  ├─ 3. Collect  Page_NN.png in numeric page order
//!  ├─ 4. Extract  wave 1: page image → text, gated concurrency
//!  ├─ 5. Structure wave 2: text → Invoice, separately gated
//!  └─ 6. Assemble ordered InvoiceData, pages without invoices dropped
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use invoice_extract::{ExtractionConfig, InvoicePipeline};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider credentials come from OPENAI_API_KEY etc.
//!     let config = ExtractionConfig::builder().max_concurrent_calls(4).build()?;
//!     let pipeline = InvoicePipeline::from_config(config)?;
//!     let doc = pipeline
//!         .process_pdf(Path::new("invoice.pdf"), Path::new("uploads/pdf2img"))
//!         .await?;
//!     println!("{}", serde_json::to_string_pretty(&doc.data)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `invoice-server` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod invoice;
pub mod pipeline;
pub mod prompts;
pub mod server;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, ResizeLimits};
pub use error::{InvoiceError, PageError, Stage};
pub use extract::{InvoicePipeline, ProcessedDocument, RunStats};
pub use invoice::{CompanyDetails, Invoice, InvoiceData, Item, TaxComponents, NOT_AVAILABLE, NO_INVOICE};
pub use pipeline::agents::{
    ExtractionAgent, PageText, StructuringAgent, StructuringOutcome,
};
pub use pipeline::render::convert_pdf;
pub use server::{app, AppState, ServerConfig};
