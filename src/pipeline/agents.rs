//! The two LLM agents and the retry policy they share.
//!
//! * [`VisionExtractionAgent`] sends one page image to a vision model and
//!   returns its plain-text transcription.
//! * [`LlmStructuringAgent`] turns one transcription into an [`Invoice`].
//!
//! ## Two kinds of retry
//!
//! Transport failures (timeouts, 5xx, rate limits) are retried with
//! exponential backoff (`retry_backoff_ms * 2^(attempt-1)`). When they run
//! out the whole run fails with [`InvoiceError::AgentFailure`].
//!
//! A structuring reply that does arrive but does not match the schema is
//! different: the agent shows the model its own reply together with
//! [`FORMAT_RETRY_PROMPT`] and tries again, up to `max_validation_retries`
//! times. When that is exhausted only the page is lost
//! ([`StructuringOutcome::Rejected`]).
//!
//! ## Testing seam
//!
//! Both agents talk to the model through [`ChatBackend`], implemented for
//! real providers by [`ProviderBackend`]. Tests substitute scripted
//! backends.

use crate::config::ExtractionConfig;
use crate::error::{InvoiceError, PageError, Stage};
use crate::invoice::Invoice;
use crate::pipeline::encode::{to_image_data, PageImage};
use crate::pipeline::reply::parse_invoice_reply;
use crate::prompts::{
    is_no_invoice, page_message, EXTRACTION_SYSTEM_PROMPT, EXTRACTION_USER_PROMPT,
    FORMAT_RETRY_PROMPT, STRUCTURING_SYSTEM_PROMPT,
};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

// ── Agent interfaces ─────────────────────────────────────────────────────

/// Text read from one page by the extraction agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub page_no: usize,
    pub text: String,
}

impl PageText {
    /// True when the extraction agent reported no invoice on this page.
    pub fn is_no_invoice(&self) -> bool {
        is_no_invoice(&self.text)
    }
}

/// What the structuring agent made of one page.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuringOutcome {
    /// A schema-valid invoice, stamped with its page number.
    Invoice(Invoice),
    /// The page holds no invoice.
    NoInvoice,
    /// Every reply failed validation; the page is dropped.
    Rejected(PageError),
}

/// Wave 1: page image → free text.
#[async_trait]
pub trait ExtractionAgent: Send + Sync {
    async fn extract(&self, page: &PageImage) -> Result<PageText, InvoiceError>;
}

/// Wave 2: free text → structured invoice.
#[async_trait]
pub trait StructuringAgent: Send + Sync {
    async fn structure(&self, page: &PageText) -> Result<StructuringOutcome, InvoiceError>;
}

// ── Chat backend ─────────────────────────────────────────────────────────

/// A single chat completion round-trip.
///
/// Errors are plain strings: the agents only log and report them.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, String>;
}

/// [`ChatBackend`] over an `edgequake-llm` provider.
pub struct ProviderBackend {
    provider: Arc<dyn LLMProvider>,
}

impl ProviderBackend {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ChatBackend for ProviderBackend {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, String> {
        let start = Instant::now();
        let response = self
            .provider
            .chat(messages, Some(options))
            .await
            .map_err(|e| e.to_string())?;
        debug!(
            "{} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

// ── Retry policy ─────────────────────────────────────────────────────────

/// Per-call settings shared by both agents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallPolicy {
    pub temperature: f32,
    pub max_tokens: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl CallPolicy {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

/// Call `backend`, retrying transport failures with exponential backoff.
async fn chat_with_retry(
    backend: &dyn ChatBackend,
    messages: &[ChatMessage],
    policy: &CallPolicy,
    stage: Stage,
    page_no: usize,
) -> Result<String, InvoiceError> {
    let options = policy.options();
    let mut last_err = String::new();

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "Page {} ({}): retry {}/{} after {}ms",
                page_no, stage, attempt, policy.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match backend.complete(messages, &options).await {
            Ok(content) => return Ok(content),
            Err(e) => {
                warn!("Page {} ({}): attempt {} failed: {}", page_no, stage, attempt + 1, e);
                last_err = e;
            }
        }
    }

    Err(InvoiceError::AgentFailure {
        stage,
        page: page_no,
        retries: policy.max_retries,
        detail: last_err,
    })
}

// ── Extraction agent ─────────────────────────────────────────────────────

/// Vision-model transcription of one page image.
pub struct VisionExtractionAgent {
    backend: Arc<dyn ChatBackend>,
    policy: CallPolicy,
}

impl VisionExtractionAgent {
    pub fn new(backend: Arc<dyn ChatBackend>, policy: CallPolicy) -> Self {
        Self { backend, policy }
    }
}

#[async_trait]
impl ExtractionAgent for VisionExtractionAgent {
    async fn extract(&self, page: &PageImage) -> Result<PageText, InvoiceError> {
        let messages = vec![
            ChatMessage::system(EXTRACTION_SYSTEM_PROMPT),
            ChatMessage::user_with_images(EXTRACTION_USER_PROMPT, vec![to_image_data(page)]),
        ];

        let text = chat_with_retry(
            self.backend.as_ref(),
            &messages,
            &self.policy,
            Stage::Extraction,
            page.page_no,
        )
        .await?;

        debug!("Page {}: extracted {} chars", page.page_no, text.len());
        Ok(PageText {
            page_no: page.page_no,
            text,
        })
    }
}

// ── Structuring agent ────────────────────────────────────────────────────

/// Schema-constrained structuring of one page transcription.
pub struct LlmStructuringAgent {
    backend: Arc<dyn ChatBackend>,
    policy: CallPolicy,
    max_validation_retries: u32,
}

impl LlmStructuringAgent {
    pub fn new(backend: Arc<dyn ChatBackend>, policy: CallPolicy, max_validation_retries: u32) -> Self {
        Self {
            backend,
            policy,
            max_validation_retries,
        }
    }
}

#[async_trait]
impl StructuringAgent for LlmStructuringAgent {
    async fn structure(&self, page: &PageText) -> Result<StructuringOutcome, InvoiceError> {
        if page.is_no_invoice() {
            debug!("Page {}: NO_INVOICE, structuring skipped", page.page_no);
            return Ok(StructuringOutcome::NoInvoice);
        }

        let mut messages = vec![
            ChatMessage::system(STRUCTURING_SYSTEM_PROMPT),
            ChatMessage::user(page_message(page.page_no, &page.text)),
        ];
        let attempts = self.max_validation_retries + 1;
        let mut last_err = String::new();

        for attempt in 1..=attempts {
            let reply = chat_with_retry(
                self.backend.as_ref(),
                &messages,
                &self.policy,
                Stage::Structuring,
                page.page_no,
            )
            .await?;

            match parse_invoice_reply(&reply) {
                Ok(Some(invoice)) => {
                    return Ok(StructuringOutcome::Invoice(invoice.on_page(page.page_no)))
                }
                Ok(None) => return Ok(StructuringOutcome::NoInvoice),
                Err(e) => {
                    warn!(
                        "Page {}: structuring reply {}/{} invalid: {}",
                        page.page_no, attempt, attempts, e
                    );
                    last_err = e.to_string();
                    messages.push(ChatMessage::user(format!(
                        "Your previous reply was:\n{reply}\n\n{FORMAT_RETRY_PROMPT}"
                    )));
                }
            }
        }

        Ok(StructuringOutcome::Rejected(PageError::SchemaRejected {
            page: page.page_no,
            attempts,
            detail: last_err,
        }))
    }
}
