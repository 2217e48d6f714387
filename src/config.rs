//! Configuration for invoice extraction.
//!
//! Everything the pipeline needs is carried by one immutable
//! [`ExtractionConfig`] value, built via [`ExtractionConfigBuilder`] and
//! passed in at call time. Concurrent requests share it through an `Arc`;
//! nothing is stored in globals.

use crate::error::InvoiceError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Upper bounds for rendered page images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeLimits {
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for ResizeLimits {
    fn default() -> Self {
        Self {
            max_width: 1120,
            max_height: 1120,
        }
    }
}

/// Configuration for one extraction service instance.
///
/// # Example
/// ```rust
/// use invoice_extract::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .max_concurrent_calls(4)
///     .extraction_model("gpt-4o")
///     .structuring_model("gpt-4o-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.max_concurrent_calls, 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Rasterisation DPI. Range: 72–400. Default: 200.
    pub dpi: u32,

    /// Pages whose dominant side exceeds these limits are scaled down.
    pub resize: ResizeLimits,

    /// Directory containing the pdfium shared library. `None` binds to the
    /// system library.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Admission-gate size for each wave. Default: 10.
    ///
    /// Each wave builds its own gate, so at most this many extraction calls
    /// and, later, at most this many structuring calls are in flight.
    pub max_concurrent_calls: usize,

    /// LLM provider name passed to `ProviderFactory` (e.g. "openai").
    pub provider_name: String,

    /// Vision model used by the page extraction agent.
    pub extraction_model: String,

    /// Model used by the structuring agent.
    pub structuring_model: String,

    /// Sampling temperature for both agents. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens an agent may generate per page. Default: 4096.
    pub max_tokens: usize,

    /// Transport retries per agent call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Extra structuring attempts after a reply fails schema validation.
    /// Default: 1.
    pub max_validation_retries: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            resize: ResizeLimits::default(),
            pdfium_lib_path: None,
            max_concurrent_calls: 10,
            provider_name: "openai".to_string(),
            extraction_model: "gpt-4o".to_string(),
            structuring_model: "gpt-4o".to_string(),
            temperature: 0.0,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            max_validation_retries: 1,
        }
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_width(mut self, px: u32) -> Self {
        self.config.resize.max_width = px;
        self
    }

    pub fn max_height(mut self, px: u32) -> Self {
        self.config.resize.max_height = px;
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn max_concurrent_calls(mut self, n: usize) -> Self {
        self.config.max_concurrent_calls = n;
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = name.into();
        self
    }

    pub fn extraction_model(mut self, model: impl Into<String>) -> Self {
        self.config.extraction_model = model.into();
        self
    }

    pub fn structuring_model(mut self, model: impl Into<String>) -> Self {
        self.config.structuring_model = model.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_validation_retries(mut self, n: u32) -> Self {
        self.config.max_validation_retries = n;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, InvoiceError> {
        let c = &self.config;
        if c.max_concurrent_calls == 0 {
            return Err(InvoiceError::InvalidConfig(
                "max_concurrent_calls must be ≥ 1".into(),
            ));
        }
        if c.resize.max_width == 0 || c.resize.max_height == 0 {
            return Err(InvoiceError::InvalidConfig(format!(
                "image limits must be positive, got {}x{}",
                c.resize.max_width, c.resize.max_height
            )));
        }
        if c.extraction_model.trim().is_empty() || c.structuring_model.trim().is_empty() {
            return Err(InvoiceError::InvalidConfig(
                "model identifiers must not be empty".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(InvoiceError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}
