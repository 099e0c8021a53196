//! Story drafting: prompt the story model and parse its answer into pages.
//!
//! The model call itself is thin; prompt text lives in [`crate::prompts`] and
//! every formatting rule the model may ignore is handled by
//! [`super::parse`]. No retries: a failed call fails the job.

use super::parse::{parse_story, ParseResult};
use crate::config::ForgeConfig;
use crate::error::{BookError, Stage};
use crate::job::BookSpecs;
use crate::prompts::{story_system_prompt, story_user_prompt, truncate_source};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Model used when a provider is named without a model.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Collaborator that turns a prompt into raw completion text.
#[async_trait]
pub trait StoryWriter: Send + Sync {
    async fn write(&self, system_prompt: &str, user_prompt: &str) -> Result<String, BookError>;
}

/// Draft stage: build the prompts, call the writer, parse its output.
pub async fn draft(
    writer: &dyn StoryWriter,
    source: &str,
    specs: &BookSpecs,
    config: &ForgeConfig,
) -> Result<ParseResult, BookError> {
    let system = story_system_prompt(specs);
    let user = story_user_prompt(&truncate_source(source, config.source_char_limit));

    let raw = super::with_timeout(
        Stage::Draft,
        config.collaborator_timeout(),
        writer.write(&system, &user),
    )
    .await?;
    if raw.trim().is_empty() {
        warn!("Story model returned an empty completion; using fallback page");
    }

    let mut parsed = parse_story(&raw, &specs.theme);
    parsed.pages.truncate(config.max_pages);
    debug!(title = %parsed.title, pages = parsed.pages.len(), "Story parsed");
    Ok(parsed)
}

// ── edgequake-llm implementation ─────────────────────────────────────────

/// [`StoryWriter`] backed by an edgequake-llm chat provider.
pub struct LlmStoryWriter {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
}

impl LlmStoryWriter {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ForgeConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// Resolve the provider from the config and environment.
    pub fn from_config(config: &ForgeConfig) -> Result<Self, BookError> {
        Ok(Self::new(resolve_provider(config)?, config))
    }
}

#[async_trait]
impl StoryWriter for LlmStoryWriter {
    async fn write(&self, system_prompt: &str, user_prompt: &str) -> Result<String, BookError> {
        let start = Instant::now();
        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_prompt),
        ];
        let options = build_options(self.temperature, self.max_tokens);

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| BookError::collaborator(Stage::Draft, e))?;

        debug!(
            "Story: {} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

fn build_options(temperature: f32, max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, BookError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        BookError::InvalidConfig(format!("LLM provider '{name}' is not configured: {e}"))
    })
}

/// Resolve the story provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) plus `config.model`.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set.
/// 4. **OpenAI** when `OPENAI_API_KEY` is present.
/// 5. Whatever [`ProviderFactory::from_env`] can auto-detect.
pub fn resolve_provider(config: &ForgeConfig) -> Result<Arc<dyn LLMProvider>, BookError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
    if let Some(ref name) = config.provider_name {
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_provider(&prov, &env_model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create_provider("openai", model);
    }

    let (llm_provider, _embedding) = ProviderFactory::from_env().map_err(|e| {
        BookError::InvalidConfig(format!(
            "No LLM provider could be auto-detected from environment. \
             Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider. Error: {e}"
        ))
    })?;
    Ok(llm_provider)
}
