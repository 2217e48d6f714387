//! Pipeline stages for PDF-to-invoice extraction.
//!
//! Each submodule implements one transformation step, so each can be tested
//! on its own and the agents can be swapped without touching rendering.
//!
//! ## Data Flow
//!
//! ```text
//! render ──▶ pages ──▶ encode ──▶ agents(extract) ──▶ agents(structure) ──▶ reply
//! (pdfium)   (order)   (base64)   (vision LLM)         (text LLM)            (JSON)
//! ```
//!
//! 1. [`render`] — rasterise every page to `Page_NN.png`, scaled by
//!    [`resize`]; runs in `spawn_blocking` because pdfium is not async-safe
//! 2. [`pages`]  — list page images in numeric page order
//! 3. [`encode`] — load each PNG and base64-wrap it for the multimodal request
//! 4. [`agents`] — the extraction and structuring agents with retry/backoff;
//!    the only stages with network I/O
//! 5. [`reply`]  — tolerant parsing of structuring replies
//!
//! [`gate`] bounds how many agent calls of one wave are in flight.

pub mod agents;
pub mod encode;
pub mod gate;
pub mod pages;
pub mod render;
pub mod reply;
pub mod resize;
