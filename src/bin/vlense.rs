//! CLI binary for vlense.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use vlense::{
    extract, ExtractConfig, ExtractOutput, ExtractionProgressCallback, JsonSchema, OutputFormat,
    PageSeparator, PartialPagePolicy, ProgressCallback,
};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one bar counting documents, one log line per page.
/// Pages of different documents interleave, so every line names its document.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Start time per (document, page) for elapsed reporting.
    start_times: Mutex<HashMap<(String, usize), Instant>>,
    page_errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Resolving inputs…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            page_errors: AtomicUsize::new(0),
        })
    }

    fn elapsed(&self, document: &str, page: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(document.to_string(), page))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Last path or URL segment, for compact log lines.
fn short_name(document: &str) -> &str {
    document
        .trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(document)
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_documents as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Extracting");
        self.bar.set_message("");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting extraction of {total_documents} document(s)…"))
        ));
    }

    fn on_document_start(&self, document: &str, total_pages: usize) {
        self.bar.println(format!(
            "{} {}  {}",
            cyan("▸"),
            short_name(document),
            dim(&format!("{total_pages} page(s)"))
        ));
    }

    fn on_page_start(&self, document: &str, page_num: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((document.to_string(), page_num), Instant::now());
        self.bar
            .set_message(format!("{} p{page_num}", short_name(document)));
    }

    fn on_page_complete(&self, document: &str, page_num: usize, total: usize, content_len: usize) {
        let secs = self.elapsed(document, page_num);
        self.bar.println(format!(
            "  {} {} {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            short_name(document),
            page_num,
            total,
            dim(&format!("{content_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
    }

    fn on_page_error(&self, document: &str, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed(document, page_num);
        self.page_errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(['…']).collect()
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {} {:>3}/{:<3}  {}  {}",
            red("✗"),
            short_name(document),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
    }

    fn on_document_complete(&self, document: &str, success: bool) {
        if !success {
            self.bar
                .println(format!("  {} {}", red("✘"), short_name(document)));
        }
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_documents: usize, success_count: usize) {
        let failed = total_documents.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} document(s) extracted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} document(s) extracted  ({} failed, {} page error(s))",
                if failed == total_documents {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_documents,
                red(&failed.to_string()),
                self.page_errors.load(Ordering::SeqCst),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Markdown for a batch of documents, written to ./out
  vlense report.pdf scan.png -o out

  # HTML with a specific model
  vlense --format html --model gemini/gemini-2.0-flash slides.pdf -o out

  # Structured output constrained by a JSON schema
  vlense --format json --schema invoice.schema.json invoices/*.pdf -o out

  # Download and extract from URLs, five model calls at a time
  vlense --batch-size 5 https://example.org/a.pdf https://example.org/b.jpg

  # Keep the rendered page images for inspection
  vlense --temp-dir ./pages --keep-temp report.pdf

  # Machine-readable summary
  vlense --json report.pdf > result.json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  VLENSE_PROVIDER         Provider (openai, anthropic, gemini, ollama, …)
  VLENSE_MODEL            Model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium (skips auto-download)
  PDFIUM_AUTO_CACHE_DIR   Override the default pdfium cache directory
"#;

/// Extract Markdown, HTML or JSON from PDFs and images using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "vlense",
    version,
    about = "Extract Markdown, HTML or JSON from PDFs and images using Vision LLMs",
    long_about = "Batch-extract content from PDF documents and images (local files or URLs) \
using Vision Language Models. Every page is sent to the model as an image; pages are reassembled \
per document and written to the output directory.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file paths or HTTP/HTTPS URLs (PDF, PNG, JPEG, GIF, WebP, BMP, TIFF).
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Directory that receives one output file per document.
    #[arg(short, long, env = "VLENSE_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Model ID, optionally provider-qualified (gpt-4.1-nano, anthropic/claude-sonnet-4-20250514).
    #[arg(long, env = "VLENSE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "VLENSE_PROVIDER")]
    provider: Option<String>,

    /// Output format: markdown, html, json.
    #[arg(short, long, env = "VLENSE_FORMAT", default_value = "markdown")]
    format: String,

    /// JSON schema file (required with --format json).
    #[arg(long, env = "VLENSE_SCHEMA")]
    schema: Option<PathBuf>,

    /// Maximum number of model calls in flight.
    #[arg(short, long, env = "VLENSE_BATCH_SIZE", default_value_t = 3,
          value_parser = clap::value_parser!(u64).range(1..))]
    batch_size: u64,

    /// Working directory for page images (cleared before use).
    #[arg(long, env = "VLENSE_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Keep the working directory after the run.
    #[arg(long)]
    keep_temp: bool,

    /// Keep the pages that succeeded when other pages of a document fail.
    #[arg(long)]
    keep_partial: bool,

    /// Page separator: none, hr, comment, or custom string.
    #[arg(long, env = "VLENSE_SEPARATOR", default_value = "none")]
    separator: String,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "VLENSE_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "VLENSE_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per page.
    #[arg(long, env = "VLENSE_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "VLENSE_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per page on LLM failure.
    #[arg(long, env = "VLENSE_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Longest edge of a rendered PDF page, in pixels.
    #[arg(long, env = "VLENSE_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "VLENSE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-page LLM call timeout in seconds.
    #[arg(long, env = "VLENSE_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Abort the whole run after this many seconds.
    #[arg(long, env = "VLENSE_TIMEOUT")]
    timeout: Option<u64>,

    /// Print the full result as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "VLENSE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "VLENSE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "VLENSE_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Ensure PDFium engine is available ───────────────────────────────────
    // First run downloads the library (~30 MB) into the pdfium-auto cache;
    // later runs only check the path.
    if !pdfium_auto::is_pdfium_cached() {
        if show_progress {
            let dl_bar = ProgressBar::new(0);
            dl_bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.cyan} {prefix:.bold}  \
                     [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  ")
                .tick_strings(TICKS),
            );
            dl_bar.set_prefix("PDF engine");
            dl_bar.enable_steady_tick(Duration::from_millis(80));

            let bar = dl_bar.clone();
            tokio::task::block_in_place(|| {
                pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
                    if let Some(t) = total {
                        if bar.length().unwrap_or(0) != t {
                            bar.set_length(t);
                        }
                    }
                    bar.set_position(downloaded);
                }))
            })
            .context("Failed to download PDFium engine")?;

            dl_bar.finish_with_message("ready ✓");
        } else {
            tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
                .context("Failed to download PDFium engine")?;
        }
    }

    // ── Build config and run ─────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;
    let output = extract(&cli.inputs, &config)
        .await
        .context("Extraction failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if cli.output_dir.is_none() {
        print_contents(&output)?;
    }

    if !cli.quiet && !cli.json {
        print_summary(&output, show_progress);
    }

    if output.stats.failed_documents > 0 {
        anyhow::bail!(
            "{} of {} document(s) failed",
            output.stats.failed_documents,
            output.stats.total_documents
        );
    }
    Ok(())
}

/// Map CLI args to `ExtractConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractConfig> {
    let format: OutputFormat = cli.format.parse().context("Invalid --format")?;

    let mut builder = ExtractConfig::builder()
        .format(format)
        .batch_size(cli.batch_size as usize)
        .clean_temp_files(!cli.keep_temp)
        .page_separator(parse_separator(&cli.separator))
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .max_rendered_pixels(cli.max_pixels)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if cli.keep_partial {
        builder = builder.partial_policy(PartialPagePolicy::KeepSucceededPages);
    }
    if let Some(ref path) = cli.schema {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read schema from {:?}", path))?;
        builder = builder.schema(JsonSchema::parse(&text).context("Invalid --schema")?);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref dir) = cli.output_dir {
        builder = builder.output_dir(dir);
    }
    if let Some(ref dir) = cli.temp_dir {
        builder = builder.temp_dir(dir);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd);
    }
    if let Some(secs) = cli.timeout {
        builder = builder.run_timeout_secs(secs);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--separator` string into `PageSeparator`.
fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "none" => PageSeparator::None,
        "hr" | "---" => PageSeparator::HorizontalRule,
        "comment" => PageSeparator::Comment,
        _ => PageSeparator::Custom(s.to_string()),
    }
}

/// Without an output directory, contents go to stdout, one block per document.
fn print_contents(output: &ExtractOutput) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let multiple = output.responses.len() > 1;

    for (source, response) in &output.responses {
        let Some(content) = &response.content else {
            continue;
        };
        if multiple {
            writeln!(handle, "==> {source} <==").context("Failed to write to stdout")?;
        }
        let text = content.render();
        handle
            .write_all(text.as_bytes())
            .context("Failed to write to stdout")?;
        if !text.ends_with('\n') {
            handle.write_all(b"\n").context("Failed to write to stdout")?;
        }
    }
    Ok(())
}

fn print_summary(output: &ExtractOutput, show_progress: bool) {
    let stats = &output.stats;
    if !show_progress {
        eprintln!(
            "Extracted {}/{} document(s), {} page(s) in {}ms",
            stats.succeeded_documents, stats.total_documents, stats.total_pages, stats.total_duration_ms
        );
    }
    for response in output.failures() {
        for error in &response.errors {
            eprintln!("  {} {}: {}", red("✗"), response.source, error);
        }
    }
    for response in output.responses.values() {
        if let Some(path) = &response.output_path {
            eprintln!("  {} → {}", dim(&response.source), bold(&path.display().to_string()));
        }
    }
    if let Some(dir) = &output.retained_temp_dir {
        eprintln!("   page images kept in {}", bold(&dir.display().to_string()));
    }
    eprintln!(
        "   {} tokens in  /  {} tokens out  —  {}ms total",
        dim(&stats.total_input_tokens.to_string()),
        dim(&stats.total_output_tokens.to_string()),
        stats.total_duration_ms,
    );
}
