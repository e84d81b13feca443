//! Model client: one page image in, extracted content out.
//!
//! [`ModelClient`] is the narrow seam between the pipeline and whatever
//! model answers the request. The scheduler only ever sees this trait, so a
//! vendor SDK, a local model, or a test stub are interchangeable.
//!
//! [`VlmClient`] is the production implementation. It wraps any
//! `edgequake_llm::LLMProvider` and owns prompt construction, retries and
//! response parsing for the three output formats.
//!
//! ## Retry Strategy
//!
//! Provider errors, timeouts and empty answers are retried with exponential
//! backoff (`retry_backoff_ms * 2^attempt`). A JSON answer that parses but
//! violates the schema is not retried: it fails the page with
//! [`PageError::SchemaValidation`].

use crate::config::{ExtractConfig, OutputFormat};
use crate::error::PageError;
use crate::output::Content;
use crate::pipeline::encode;
use crate::pipeline::normalize::PageUnit;
use crate::pipeline::postprocess;
use crate::prompts;
use crate::schema::JsonSchema;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::fmt;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// A single page to extract, with the format the caller wants back.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub page: PageUnit,
    pub format: OutputFormat,
    /// Present iff `format` is `Json`.
    pub schema: Option<Arc<JsonSchema>>,
}

/// What a backend returns for a successful page.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub content: Content,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub retries: u32,
}

impl Extraction {
    /// An extraction with no usage accounting.
    pub fn new(content: Content) -> Self {
        Self {
            content,
            input_tokens: 0,
            output_tokens: 0,
            retries: 0,
        }
    }
}

/// A model backend able to read one page image.
///
/// Implementations must be `Send + Sync`: the scheduler calls `extract`
/// concurrently from many tasks, up to the batch size.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Extract the page in `request.format`.
    ///
    /// Failures are returned as [`PageError`] and recorded against the page;
    /// they never abort the batch.
    async fn extract(&self, request: &ExtractionRequest) -> Result<Extraction, PageError>;
}

/// Tuning knobs for [`VlmClient`], usually taken from [`ExtractConfig`].
#[derive(Debug, Clone)]
pub struct VlmOptions {
    pub temperature: f32,
    pub max_tokens: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub api_timeout_secs: u64,
    pub system_prompt: Option<String>,
}

impl Default for VlmOptions {
    fn default() -> Self {
        Self::from(&ExtractConfig::default())
    }
}

impl From<&ExtractConfig> for VlmOptions {
    fn from(config: &ExtractConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout_secs: config.api_timeout_secs,
            system_prompt: config.system_prompt.clone(),
        }
    }
}

/// [`ModelClient`] backed by an `edgequake_llm` vision provider.
pub struct VlmClient {
    provider: Arc<dyn LLMProvider>,
    options: VlmOptions,
}

impl fmt::Debug for VlmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VlmClient")
            .field("provider", &"<dyn LLMProvider>")
            .field("options", &self.options)
            .finish()
    }
}

impl VlmClient {
    pub fn new(provider: Arc<dyn LLMProvider>, options: VlmOptions) -> Self {
        Self { provider, options }
    }

    pub fn from_config(provider: Arc<dyn LLMProvider>, config: &ExtractConfig) -> Self {
        Self::new(provider, VlmOptions::from(config))
    }

    fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.options.temperature),
            max_tokens: Some(self.options.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ModelClient for VlmClient {
    async fn extract(&self, request: &ExtractionRequest) -> Result<Extraction, PageError> {
        let page = &request.page;
        let image = encode::encode_page(&page.path)
            .await
            .map_err(|e| PageError::DocumentRead {
                document: page.document.clone(),
                detail: format!("cannot read page {} image: {e}", page.index),
            })?;

        let system = prompts::system_prompt(
            request.format,
            request.schema.as_deref(),
            self.options.system_prompt.as_deref(),
        );
        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user_with_images(prompts::user_instruction(request.format), vec![image]),
        ];
        let options = self.completion_options();
        let call_timeout = Duration::from_secs(self.options.api_timeout_secs);

        let mut last_err: Option<String> = None;

        for attempt in 0..=self.options.max_retries {
            if attempt > 0 {
                let backoff = self.options.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "{} page {}: retry {}/{} after {}ms",
                    page.document, page.index, attempt, self.options.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let response = match timeout(call_timeout, self.provider.chat(&messages, Some(&options))).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    warn!("{} page {}: attempt {} failed: {}", page.document, page.index, attempt + 1, e);
                    last_err = Some(e.to_string());
                    continue;
                }
                Err(_) => {
                    warn!("{} page {}: attempt {} timed out", page.document, page.index, attempt + 1);
                    last_err = Some(format!("timed out after {}s", self.options.api_timeout_secs));
                    continue;
                }
            };

            debug!(
                "{} page {}: {} input tokens, {} output tokens",
                page.document, page.index, response.prompt_tokens, response.completion_tokens
            );

            match parse_response(&response.content, request) {
                Ok(content) => {
                    return Ok(Extraction {
                        content,
                        input_tokens: response.prompt_tokens,
                        output_tokens: response.completion_tokens,
                        retries: attempt,
                    });
                }
                Err(ParseFailure::Empty) => {
                    warn!("{} page {}: empty response", page.document, page.index);
                    last_err = Some("model returned an empty response".into());
                }
                Err(ParseFailure::Invalid(e)) => return Err(e),
            }
        }

        Err(PageError::Provider {
            page: page.index,
            retries: self.options.max_retries,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

/// Why a raw answer could not become [`Content`].
#[derive(Debug)]
pub(crate) enum ParseFailure {
    /// Nothing usable came back; worth retrying.
    Empty,
    /// A definitive answer that does not satisfy the request.
    Invalid(PageError),
}

/// Turn a raw model answer into content for `request.format`.
pub(crate) fn parse_response(raw: &str, request: &ExtractionRequest) -> Result<Content, ParseFailure> {
    match request.format {
        OutputFormat::Markdown | OutputFormat::Html => {
            let text = postprocess::clean_text(raw, request.format);
            if text.is_empty() {
                Err(ParseFailure::Empty)
            } else {
                Ok(Content::Text(text))
            }
        }
        OutputFormat::Json => {
            let text = postprocess::extract_json_text(raw);
            if text.is_empty() {
                return Err(ParseFailure::Empty);
            }
            let invalid = |detail: String| {
                ParseFailure::Invalid(PageError::SchemaValidation {
                    page: request.page.index,
                    detail,
                })
            };
            let value: serde_json::Value =
                serde_json::from_str(&text).map_err(|e| invalid(format!("response is not JSON: {e}")))?;
            if let Some(schema) = &request.schema {
                schema.validate(&value).map_err(invalid)?;
            }
            Ok(Content::Json(value))
        }
    }
}
