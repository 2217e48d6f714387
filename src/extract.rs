//! The invoice pipeline: page images in, ordered [`InvoiceData`] out.
//!
//! ## Why two waves?
//!
//! Every page is first transcribed by the vision agent, and only when all
//! transcriptions are back does structuring start. Each wave gets its own
//! [`AdmissionGate`] so a slow vision model never holds slots the text model
//! could use, and the number of calls of one kind in flight never exceeds
//! `max_concurrent_calls`.
//!
//! A run is all-or-nothing: a fatal error from either wave (transport
//! failure after retries, unreadable image) aborts it and no partial data is
//! returned. Pages that merely carry no invoice, or whose structuring reply
//! never validated, are dropped and the run continues.

use crate::config::ExtractionConfig;
use crate::error::InvoiceError;
use crate::invoice::InvoiceData;
use crate::pipeline::agents::{
    CallPolicy, ExtractionAgent, LlmStructuringAgent, PageText, ProviderBackend,
    StructuringAgent, StructuringOutcome, VisionExtractionAgent,
};
use crate::pipeline::encode::load_page_image;
use crate::pipeline::gate::AdmissionGate;
use crate::pipeline::{pages, render};
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::future::try_join_all;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Counters and timings for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Page images found in the directory.
    pub pages: usize,
    /// Invoices in the result.
    pub invoices: usize,
    /// Pages without an invoice (NO_INVOICE, `null` reply, or empty record).
    pub no_invoice_pages: usize,
    /// Pages whose structuring reply never validated.
    pub rejected_pages: usize,
    /// Highest number of extraction calls in flight at once.
    pub extraction_peak: usize,
    /// Highest number of structuring calls in flight at once.
    pub structuring_peak: usize,
    pub extraction_ms: u64,
    pub structuring_ms: u64,
    pub total_ms: u64,
}

/// Result of [`InvoicePipeline::process_pdf`].
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub data: InvoiceData,
    pub stats: RunStats,
    /// Directory holding the rendered `Page_NN.png` files.
    pub image_dir: PathBuf,
}

/// Two-wave extraction over a directory of page images.
///
/// Cheap to share: wrap in an `Arc` and call concurrently from many
/// requests. Each call builds its own gates.
pub struct InvoicePipeline {
    config: Arc<ExtractionConfig>,
    extractor: Arc<dyn ExtractionAgent>,
    structurer: Arc<dyn StructuringAgent>,
}

impl InvoicePipeline {
    /// Assemble a pipeline from explicit agents.
    pub fn new(
        config: ExtractionConfig,
        extractor: Arc<dyn ExtractionAgent>,
        structurer: Arc<dyn StructuringAgent>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            extractor,
            structurer,
        }
    }

    /// Build both agents from `config.provider_name` and the two model names.
    ///
    /// Provider credentials are read from the environment by
    /// [`ProviderFactory`] (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, …).
    pub fn from_config(config: ExtractionConfig) -> Result<Self, InvoiceError> {
        let policy = CallPolicy::from_config(&config);
        let vision = create_provider(&config.provider_name, &config.extraction_model)?;
        let text = create_provider(&config.provider_name, &config.structuring_model)?;
        info!(
            "LLM provider '{}': extraction={}, structuring={}",
            config.provider_name, config.extraction_model, config.structuring_model
        );

        let extractor = VisionExtractionAgent::new(Arc::new(ProviderBackend::new(vision)), policy);
        let structurer = LlmStructuringAgent::new(
            Arc::new(ProviderBackend::new(text)),
            policy,
            config.max_validation_retries,
        );
        Ok(Self::new(config, Arc::new(extractor), Arc::new(structurer)))
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract invoices from the page images in `image_dir`.
    pub async fn run(&self, image_dir: &Path) -> Result<InvoiceData, InvoiceError> {
        self.run_with_stats(image_dir).await.map(|(data, _)| data)
    }

    /// Convert `pdf_path` into `output_root/<name>/` and run on the result.
    ///
    /// The page directory is left in place; callers own its cleanup.
    pub async fn process_pdf(
        &self,
        pdf_path: &Path,
        output_root: &Path,
    ) -> Result<ProcessedDocument, InvoiceError> {
        let image_dir = render::convert_pdf(pdf_path, output_root, &self.config).await?;
        let (data, stats) = self.run_with_stats(&image_dir).await?;
        Ok(ProcessedDocument {
            data,
            stats,
            image_dir,
        })
    }

    /// Like [`run`](Self::run), also reporting [`RunStats`].
    pub async fn run_with_stats(
        &self,
        image_dir: &Path,
    ) -> Result<(InvoiceData, RunStats), InvoiceError> {
        let total_start = Instant::now();
        let mut stats = RunStats::default();

        // ── Step 1: Collect pages ────────────────────────────────────────
        let dir = image_dir.to_path_buf();
        let images = tokio::task::spawn_blocking(move || pages::sorted_images(&dir))
            .await
            .map_err(|e| InvoiceError::Internal(format!("Page scan panicked: {}", e)))??;
        stats.pages = images.len();
        info!("Found {} page images in {}", images.len(), image_dir.display());

        // ── Step 2: Extract text (wave 1) ────────────────────────────────
        let extraction_start = Instant::now();
        let (texts, peak) = self.extract_wave(&images).await?;
        stats.extraction_peak = peak;
        stats.extraction_ms = extraction_start.elapsed().as_millis() as u64;
        info!(
            "Extracted {} pages in {}ms (peak {} in flight)",
            texts.len(),
            stats.extraction_ms,
            peak
        );

        // ── Step 3: Structure (wave 2) ───────────────────────────────────
        let structuring_start = Instant::now();
        let (outcomes, peak) = self.structure_wave(&texts).await?;
        stats.structuring_peak = peak;
        stats.structuring_ms = structuring_start.elapsed().as_millis() as u64;

        // ── Step 4: Assemble ─────────────────────────────────────────────
        let mut data = InvoiceData::default();
        for outcome in outcomes {
            match outcome {
                StructuringOutcome::Invoice(invoice) if invoice.is_empty() => {
                    debug!("Page {}: empty invoice dropped", invoice.page_no);
                    stats.no_invoice_pages += 1;
                }
                StructuringOutcome::Invoice(invoice) => data.details.push(invoice),
                StructuringOutcome::NoInvoice => stats.no_invoice_pages += 1,
                StructuringOutcome::Rejected(e) => {
                    warn!("{}", e);
                    stats.rejected_pages += 1;
                }
            }
        }
        stats.invoices = data.len();
        stats.total_ms = total_start.elapsed().as_millis() as u64;

        info!(
            "Run complete: {} invoices from {} pages ({} without invoice, {} rejected) in {}ms",
            stats.invoices, stats.pages, stats.no_invoice_pages, stats.rejected_pages, stats.total_ms
        );
        Ok((data, stats))
    }

    /// One gated extraction task per page; results ordered by page number.
    async fn extract_wave(
        &self,
        images: &[PathBuf],
    ) -> Result<(Vec<PageText>, usize), InvoiceError> {
        let gate = AdmissionGate::new(self.config.max_concurrent_calls);
        let gate = &gate;
        let extractor = self.extractor.as_ref();

        let tasks = images.iter().enumerate().map(|(idx, path)| async move {
            let _permit = gate.admit().await?;
            // Page number is the 1-based position in sorted order, not the
            // `<n>` of `Page_<n>.png`. The two agree for rendered directories;
            // unnumbered files sort last and still get unique numbers.
            let page = load_page_image(path, idx + 1).await?;
            extractor.extract(&page).await
        });

        let mut texts = try_join_all(tasks).await?;
        texts.sort_by_key(|t| t.page_no);
        Ok((texts, gate.peak()))
    }

    /// One gated structuring task per page, in submission order.
    async fn structure_wave(
        &self,
        texts: &[PageText],
    ) -> Result<(Vec<StructuringOutcome>, usize), InvoiceError> {
        let gate = AdmissionGate::new(self.config.max_concurrent_calls);
        let gate = &gate;
        let structurer = self.structurer.as_ref();

        let tasks = texts.iter().map(|text| async move {
            let _permit = gate.admit().await?;
            structurer.structure(text).await
        });

        let outcomes = try_join_all(tasks).await?;
        Ok((outcomes, gate.peak()))
    }
}

/// Instantiate a named provider with the given model.
fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, InvoiceError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        InvoiceError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}
