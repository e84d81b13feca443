//! Batch extraction entry points.
//!
//! [`extract`] is the whole public contract in one call: validate the
//! request, resolve the model backend, prepare the working area, run every
//! document through the [`BatchScheduler`], and hand back one response per
//! input. Only contract violations and working-area failures are returned as
//! `Err`; anything that goes wrong with an individual document is recorded in
//! its [`VlenseResponse`].

use crate::client::{ModelClient, VlmClient};
use crate::config::{ExtractConfig, DEFAULT_MODEL};
use crate::error::VlenseError;
use crate::output::{BatchStats, ExtractOutput, VlenseResponse};
use crate::pipeline::render::{PageRasterizer, PdfiumRasterizer};
use crate::scheduler::BatchScheduler;
use crate::workspace::TempWorkspace;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Extract every input document with a vision model.
///
/// Each input is a local path or an HTTP(S) URL to a PDF or an image.
/// Duplicate inputs are processed once.
///
/// # Returns
/// `Ok(ExtractOutput)` with exactly one response per distinct input, even if
/// some documents failed (check [`ExtractOutput::failures`]).
///
/// # Errors
/// Returns `Err(VlenseError)` only for fatal errors, all raised before any
/// model call is made:
/// - `json` format without a schema
/// - no model provider could be configured
/// - the output or working directory could not be prepared
/// - the run exceeded `run_timeout_secs`
///
/// # Example
/// ```rust,no_run
/// use vlense::{extract, ExtractConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ExtractConfig::builder().output_dir("out").build()?;
/// let output = extract(["scan.png", "report.pdf"], &config).await?;
/// for (source, response) in &output.responses {
///     println!("{source}: {} page(s)", response.stats.processed_pages);
/// }
/// # Ok(())
/// # }
/// ```
pub async fn extract<I, S>(inputs: I, config: &ExtractConfig) -> Result<ExtractOutput, VlenseError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let total_start = Instant::now();
    config.validate()?;

    let documents = dedupe(inputs);
    info!(
        "Starting extraction: {} document(s), format={}, batch_size={}",
        documents.len(),
        config.format,
        config.batch_size
    );

    let client = resolve_client(config)?;
    let rasterizer: Arc<dyn PageRasterizer> = match &config.rasterizer {
        Some(r) => Arc::clone(r),
        None => Arc::new(PdfiumRasterizer::from_config(config)),
    };

    if let Some(dir) = &config.output_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| VlenseError::OutputDir {
                path: dir.clone(),
                source: e,
            })?;
    }

    let workspace = TempWorkspace::acquire(config.temp_dir.as_deref(), config.clean_temp_files).await?;
    debug!("Working directory: {}", workspace.path().display());

    if let Some(cb) = &config.progress_callback {
        cb.on_batch_start(documents.len());
    }

    let scheduler = BatchScheduler::new(client, rasterizer, config);
    let responses = match config.run_timeout_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), scheduler.run(&documents, &workspace))
            .await
            .map_err(|_| VlenseError::Timeout { secs })?,
        None => scheduler.run(&documents, &workspace).await,
    };

    let retained_temp_dir = workspace.finish();
    let stats = batch_stats(&responses, total_start.elapsed().as_millis() as u64);

    info!(
        "Extraction complete: {}/{} document(s) succeeded, {} page(s), {}ms total",
        stats.succeeded_documents, stats.total_documents, stats.total_pages, stats.total_duration_ms
    );
    if let Some(cb) = &config.progress_callback {
        cb.on_batch_complete(stats.total_documents, stats.succeeded_documents);
    }

    Ok(ExtractOutput {
        responses,
        retained_temp_dir,
        stats,
    })
}

/// Extract a single document. Same contract as [`extract`].
pub async fn extract_one(
    input: impl AsRef<str>,
    config: &ExtractConfig,
) -> Result<ExtractOutput, VlenseError> {
    extract([input.as_ref()], config).await
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally; do not call it from inside
/// an async context.
pub fn extract_sync<I, S>(inputs: I, config: &ExtractConfig) -> Result<ExtractOutput, VlenseError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tokio::runtime::Runtime::new()
        .map_err(|e| VlenseError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(inputs, config))
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Keep the first occurrence of each input, preserving order.
fn dedupe<I, S>(inputs: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    inputs
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

fn batch_stats(responses: &BTreeMap<String, VlenseResponse>, total_duration_ms: u64) -> BatchStats {
    let succeeded = responses.values().filter(|r| r.is_success()).count();
    BatchStats {
        total_documents: responses.len(),
        succeeded_documents: succeeded,
        failed_documents: responses.len() - succeeded,
        total_pages: responses.values().map(|r| r.stats.total_pages).sum(),
        failed_pages: responses.values().map(|r| r.stats.failed_pages).sum(),
        total_input_tokens: responses.values().map(|r| r.stats.total_input_tokens).sum(),
        total_output_tokens: responses.values().map(|r| r.stats.total_output_tokens).sum(),
        total_duration_ms,
    }
}

fn resolve_client(config: &ExtractConfig) -> Result<Arc<dyn ModelClient>, VlenseError> {
    if let Some(client) = &config.client {
        return Ok(Arc::clone(client));
    }
    let provider = resolve_provider(config)?;
    Ok(Arc::new(VlmClient::from_config(provider, config)))
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, VlenseError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        VlenseError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Split `provider/model` into its parts. Bare model ids return `None`.
fn split_model(model: &str) -> Option<(&str, &str)> {
    match model.split_once('/') {
        Some((provider, name)) if !provider.is_empty() && !name.is_empty() => Some((provider, name)),
        _ => None,
    }
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Named provider** (`config.provider_name`) with `config.model` or the
///    default model.
/// 2. **Qualified model** (`config.model` = `provider/model`), e.g.
///    `gemini/gemini-2.0-flash`.
/// 3. **Environment pair** (`VLENSE_PROVIDER` + `VLENSE_MODEL`), both set.
/// 4. **OpenAI key** (`OPENAI_API_KEY`) with `config.model` or the default.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
fn resolve_provider(config: &ExtractConfig) -> Result<Arc<dyn LLMProvider>, VlenseError> {
    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let Some((provider, model)) = config.model.as_deref().and_then(split_model) {
        return create_vision_provider(provider, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("VLENSE_PROVIDER"),
        std::env::var("VLENSE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| VlenseError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, GEMINI_API_KEY, or pass a provider/model.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let docs = dedupe(["b.pdf", "a.png", "b.pdf", "c.jpg", "a.png"]);
        assert_eq!(docs, vec!["b.pdf", "a.png", "c.jpg"]);
    }

    #[test]
    fn qualified_model_is_split() {
        assert_eq!(
            split_model("gemini/gemini-2.0-flash"),
            Some(("gemini", "gemini-2.0-flash"))
        );
        assert_eq!(split_model("gpt-4.1-nano"), None);
        assert_eq!(split_model("/model"), None);
        assert_eq!(split_model("openai/"), None);
    }

    #[test]
    fn stats_sum_over_documents() {
        let mut responses = BTreeMap::new();
        let mut ok = VlenseResponse::failed("a", Default::default(), crate::error::PageError::DocumentRead {
            document: "a".into(),
            detail: "x".into(),
        });
        ok.errors.clear();
        ok.content = Some(crate::output::Content::Text("hi".into()));
        ok.stats.total_pages = 2;
        ok.stats.total_input_tokens = 30;
        responses.insert("a".to_string(), ok);
        responses.insert(
            "b".to_string(),
            VlenseResponse::failed("b", Default::default(), crate::error::PageError::DocumentRead {
                document: "b".into(),
                detail: "missing".into(),
            }),
        );

        let stats = batch_stats(&responses, 7);
        assert_eq!(stats.total_documents, 2);
        assert_eq!(stats.succeeded_documents, 1);
        assert_eq!(stats.failed_documents, 1);
        assert_eq!(stats.total_pages, 2);
        assert_eq!(stats.total_input_tokens, 30);
        assert_eq!(stats.total_duration_ms, 7);
    }
}
