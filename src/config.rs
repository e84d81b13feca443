//! Configuration types for batch extraction.
//!
//! All extraction behaviour is controlled through [`ExtractConfig`], built
//! via its [`ExtractConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share a config across runs and to log exactly what a run
//! was asked to do.

use crate::client::ModelClient;
use crate::error::VlenseError;
use crate::pipeline::render::PageRasterizer;
use crate::progress::ProgressCallback;
use crate::schema::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Default model identifier when neither the config nor the environment
/// names one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Configuration for an extraction run.
///
/// Built via [`ExtractConfig::builder()`] or using
/// [`ExtractConfig::default()`].
///
/// # Example
/// ```rust
/// use vlense::{ExtractConfig, OutputFormat};
///
/// let config = ExtractConfig::builder()
///     .model("gemini/gemini-2.0-flash")
///     .batch_size(5)
///     .format(OutputFormat::Html)
///     .output_dir("out")
///     .build()
///     .unwrap();
/// assert_eq!(config.batch_size, 5);
/// ```
#[derive(Clone)]
pub struct ExtractConfig {
    /// Provider-model identifier. Either a bare model id (`gpt-4.1-nano`) or
    /// `provider/model` (`anthropic/claude-sonnet-4-20250514`).
    /// If None, the provider default is used.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "gemini", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed model backend. Takes precedence over `provider_name`
    /// and `model`.
    pub client: Option<Arc<dyn ModelClient>>,

    /// Pre-constructed PDF rasteriser. Defaults to pdfium.
    pub rasterizer: Option<Arc<dyn PageRasterizer>>,

    /// Directory that receives one output file per document. Created if
    /// missing. If None, results are only returned in memory.
    pub output_dir: Option<PathBuf>,

    /// Working directory for page images. If it already exists its contents
    /// are destroyed first. If None, a fresh system temp directory is used.
    pub temp_dir: Option<PathBuf>,

    /// Maximum number of model calls in flight across the whole batch. Default: 3.
    pub batch_size: usize,

    /// Requested output format. Default: Markdown.
    pub format: OutputFormat,

    /// Schema constraining `json` output. Required iff `format` is `Json`.
    pub schema: Option<Arc<JsonSchema>>,

    /// Remove the working directory when the run ends. Default: true.
    ///
    /// When false the directory survives the run and its path is returned in
    /// [`crate::output::ExtractOutput::retained_temp_dir`].
    pub clean_temp_files: bool,

    /// What to do with a document whose pages only partly succeeded.
    pub partial_policy: PartialPagePolicy,

    /// Page separator in assembled text output. Default: blank line.
    pub page_separator: PageSeparator,

    /// Longest edge of a rasterised PDF page in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 4096.
    pub max_tokens: usize,

    /// Maximum retry attempts on a failed provider call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled on each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Custom system prompt. If None, the built-in prompt for `format` is used.
    pub system_prompt: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Per-call provider timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Deadline for the whole run. Default: none.
    pub run_timeout_secs: Option<u64>,

    /// Receives batch, document and page events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            client: None,
            rasterizer: None,
            output_dir: None,
            temp_dir: None,
            batch_size: 3,
            format: OutputFormat::default(),
            schema: None,
            clean_temp_files: true,
            partial_policy: PartialPagePolicy::default(),
            page_separator: PageSeparator::default(),
            max_rendered_pixels: 2000,
            password: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            system_prompt: None,
            download_timeout_secs: 120,
            api_timeout_secs: 60,
            run_timeout_secs: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("client", &self.client.as_ref().map(|_| "<dyn ModelClient>"))
            .field(
                "rasterizer",
                &self.rasterizer.as_ref().map(|_| "<dyn PageRasterizer>"),
            )
            .field("output_dir", &self.output_dir)
            .field("temp_dir", &self.temp_dir)
            .field("batch_size", &self.batch_size)
            .field("format", &self.format)
            .field("schema", &self.schema.is_some())
            .field("clean_temp_files", &self.clean_temp_files)
            .field("partial_policy", &self.partial_policy)
            .field("page_separator", &self.page_separator)
            .field("max_retries", &self.max_retries)
            .field("run_timeout_secs", &self.run_timeout_secs)
            .finish()
    }
}

impl ExtractConfig {
    /// Create a new builder for `ExtractConfig`.
    pub fn builder() -> ExtractConfigBuilder {
        ExtractConfigBuilder {
            config: Self::default(),
        }
    }

    /// Check the call contract: the format/schema pairing and the batch size.
    ///
    /// Runs before any side effect of an extraction.
    pub fn validate(&self) -> Result<(), VlenseError> {
        if self.format == OutputFormat::Json && self.schema.is_none() {
            return Err(VlenseError::MissingSchema);
        }
        if self.batch_size == 0 {
            return Err(VlenseError::InvalidConfig("batch_size must be ≥ 1".into()));
        }
        Ok(())
    }
}

/// Builder for [`ExtractConfig`].
pub struct ExtractConfigBuilder {
    config: ExtractConfig,
}

impl fmt::Debug for ExtractConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ExtractConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn client(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.config.client = Some(client);
        self
    }

    pub fn rasterizer(mut self, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        self.config.rasterizer = Some(rasterizer);
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = Some(dir.into());
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n.max(1);
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn schema(mut self, schema: JsonSchema) -> Self {
        self.config.schema = Some(Arc::new(schema));
        self
    }

    pub fn clean_temp_files(mut self, v: bool) -> Self {
        self.config.clean_temp_files = v;
        self
    }

    pub fn partial_policy(mut self, policy: PartialPagePolicy) -> Self {
        self.config.partial_policy = policy;
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
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

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn run_timeout_secs(mut self, secs: u64) -> Self {
        self.config.run_timeout_secs = Some(secs);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractConfig, VlenseError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Output format requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Markdown text (default).
    #[default]
    Markdown,
    /// HTML fragment.
    Html,
    /// A JSON value conforming to the caller's schema.
    Json,
}

impl OutputFormat {
    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Html => "html",
            OutputFormat::Json => "json",
        }
    }

    /// File extension for persisted responses.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Html => "html",
            OutputFormat::Json => "json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = VlenseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "markdown" => Ok(OutputFormat::Markdown),
            "html" => Ok(OutputFormat::Html),
            "json" => Ok(OutputFormat::Json),
            other => Err(VlenseError::InvalidFormat {
                format: other.to_string(),
            }),
        }
    }
}

/// Treatment of a document whose pages did not all succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PartialPagePolicy {
    /// Any failed page fails the document; succeeded pages are discarded. (default)
    #[default]
    FailDocument,
    /// Keep the content of the pages that succeeded and report the rest as errors.
    KeepSucceededPages,
}

/// How to separate pages in assembled markdown/html output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSeparator {
    /// Pages joined with a blank line. (default)
    #[default]
    None,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// Comment with page number: "<!-- page N -->"
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator placed before the given page (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::None => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}
