//! HTTP server binary for invoice-extract.
//!
//! A thin shim over the library crate that maps CLI flags and environment
//! variables to `ExtractionConfig` / `ServerConfig` and serves the router.

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use invoice_extract::{app, AppState, ExtractionConfig, InvoicePipeline, ServerConfig};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve on the default address with OpenAI models
  export OPENAI_API_KEY=sk-...
  invoice-server --uploads-dir ./uploads

  # Different models for the two agents, 4 calls in flight per wave
  invoice-server --uploads-dir ./uploads --model1 gpt-4o --model2 gpt-4o-mini --max-calls 4

  # Submit an invoice
  curl -F document=@invoice.pdf http://localhost:8000/process/

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  PDFIUM_LIB_PATH         Directory containing libpdfium (default: system library)
  RUST_LOG                Log filter (default: info)
"#;

/// Extract structured invoice data from uploaded PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "invoice-server",
    version,
    about = "HTTP service extracting structured invoice data from PDFs with LLM agents",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
    bind: SocketAddr,

    /// Upload root; must be an existing directory.
    #[arg(long = "uploads-dir", env = "UPLOADS_DEFAULT_DEST")]
    uploads_dir: PathBuf,

    /// Accepted upload extensions, comma-separated.
    #[arg(long, env = "UPLOADED_FILES_ALLOW", value_delimiter = ',', default_value = "pdf")]
    allow: Vec<String>,

    /// Remove uploads and page images after each request.
    #[arg(long, env = "CLEANUP_TEMP_FILES", action = ArgAction::Set, default_value_t = true)]
    cleanup: bool,

    /// Largest accepted upload in MiB.
    #[arg(long, env = "MAX_UPLOAD_MB", default_value_t = 20)]
    max_upload_mb: usize,

    /// Directory containing the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDF_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Maximum page image width in pixels.
    #[arg(long, env = "MAX_IMG_WIDTH", default_value_t = 1120)]
    max_width: u32,

    /// Maximum page image height in pixels.
    #[arg(long, env = "MAX_IMG_HEIGHT", default_value_t = 1120)]
    max_height: u32,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "LLM_PROVIDER", default_value = "openai")]
    provider: String,

    /// Vision model for the page extraction agent.
    #[arg(long, env = "MODEL1_NAME", default_value = "gpt-4o")]
    model1: String,

    /// Model for the structuring agent.
    #[arg(long, env = "MODEL2_NAME", default_value = "gpt-4o")]
    model2: String,

    /// Agent calls in flight per wave.
    #[arg(long = "max-calls", env = "MAX_CALL_MIN", default_value_t = 10)]
    max_calls: usize,

    /// Transport retries per agent call.
    #[arg(long, env = "MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Extra structuring attempts after a reply fails validation.
    #[arg(long, env = "MAX_VALIDATION_RETRIES", default_value_t = 1)]
    max_validation_retries: u32,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Validate upload root ─────────────────────────────────────────────
    if !cli.uploads_dir.is_dir() {
        bail!(
            "Upload root {} is not a directory (set UPLOADS_DEFAULT_DEST)",
            cli.uploads_dir.display()
        );
    }

    // ── Build config ─────────────────────────────────────────────────────
    let server_config = build_server_config(&cli);
    let pipeline = InvoicePipeline::from_config(build_config(&cli)?)
        .context("Failed to initialise LLM provider")?;
    let state = AppState::new(pipeline, server_config);

    // ── Serve ────────────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    info!("Listening on http://{}", cli.bind);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shut down");
    Ok(())
}

fn build_config(cli: &Cli) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .dpi(cli.dpi)
        .max_width(cli.max_width)
        .max_height(cli.max_height)
        .provider_name(&cli.provider)
        .extraction_model(&cli.model1)
        .structuring_model(&cli.model2)
        .max_concurrent_calls(cli.max_calls)
        .max_retries(cli.max_retries)
        .max_validation_retries(cli.max_validation_retries);

    if let Some(ref path) = cli.pdfium_lib_path {
        builder = builder.pdfium_lib_path(path);
    }

    builder.build().context("Invalid configuration")
}

fn build_server_config(cli: &Cli) -> ServerConfig {
    ServerConfig {
        uploads_root: cli.uploads_dir.clone(),
        allowed_extensions: cli
            .allow
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect(),
        cleanup_temp_files: cli.cleanup,
        max_upload_bytes: cli.max_upload_mb.saturating_mul(1024 * 1024),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
