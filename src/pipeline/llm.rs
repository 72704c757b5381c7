//! Chat-completion calls: story analysis and script generation.
//!
//! The pipeline talks to a [`ChatClient`], a one-method seam that takes a
//! system + user prompt and returns text. [`LlmChatClient`] implements it on
//! top of any `edgequake_llm` provider; tests substitute a fake.
//!
//! Both calls run through [`with_retry`] with their own [`RetryPolicy`]. An
//! empty completion counts as a failed attempt, so it is retried too.

use crate::config::{ComicConfig, RetryPolicy, VisualStyle};
use crate::error::ComicError;
use crate::output::Scene;
use crate::pipeline::retry::with_retry;
use crate::pipeline::script::parse_script;
use crate::prompts::{analysis_prompt, script_prompt, STORYTELLER_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// One chat-completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// Prompt in, text out. An empty string means "no content".
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ComicError>;
}

/// [`ChatClient`] backed by an `edgequake_llm` provider.
#[derive(Clone)]
pub struct LlmChatClient {
    provider: Arc<dyn LLMProvider>,
}

impl LlmChatClient {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    /// Build a client from the config's provider settings.
    pub fn from_config(config: &ComicConfig) -> Result<Self, ComicError> {
        resolve_provider(config).map(Self::new)
    }
}

#[async_trait]
impl ChatClient for LlmChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ComicError> {
        let messages = vec![
            ChatMessage::system(request.system.as_str()),
            ChatMessage::user(request.user.as_str()),
        ];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let start = Instant::now();
        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ComicError::LlmApiError {
                message: e.to_string(),
            })?;
        debug!(
            "Chat: {} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `config.chat_model`.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI key present** → `openai` with `config.chat_model`.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &ComicConfig) -> Result<Arc<dyn LLMProvider>, ComicError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        return create_chat_provider(name, &config.chat_model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_chat_provider(&prov, &model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create_chat_provider("openai", &config.chat_model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ComicError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {e}"
            ),
        })?;
    Ok(llm_provider)
}

fn create_chat_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ComicError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        ComicError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Send one prompt through the retry helper; empty replies count as failures.
async fn complete_text(
    client: &dyn ChatClient,
    stage: &'static str,
    request: ChatRequest,
    policy: RetryPolicy,
) -> Result<String, ComicError> {
    with_retry(stage, policy, |_| {
        let request = &request;
        async move {
            let text = client.complete(request).await?;
            let text = text.trim();
            if text.is_empty() {
                return Err(ComicError::EmptyCompletion { stage });
            }
            Ok(text.to_string())
        }
    })
    .await
}

/// Summarise the story into characters, setting, conflict and beats.
pub async fn analyze_story(
    client: &dyn ChatClient,
    story: &str,
    panel_count: usize,
    config: &ComicConfig,
) -> Result<String, ComicError> {
    let request = ChatRequest {
        system: STORYTELLER_SYSTEM_PROMPT.to_string(),
        user: analysis_prompt(story, panel_count),
        temperature: config.temperature,
        max_tokens: config.analysis_max_tokens,
    };
    let summary = complete_text(client, "story analysis", request, config.analysis_retry).await?;
    info!("Story summary: {} chars", summary.len());
    Ok(summary)
}

/// Produce exactly `panel_count` scenes.
///
/// Only the chat call is retried. A response that parses but has the wrong
/// shape or count fails immediately.
pub async fn generate_script(
    client: &dyn ChatClient,
    story: &str,
    summary: &str,
    style: VisualStyle,
    panel_count: usize,
    config: &ComicConfig,
) -> Result<Vec<Scene>, ComicError> {
    let request = ChatRequest {
        system: STORYTELLER_SYSTEM_PROMPT.to_string(),
        user: script_prompt(story, summary, style, panel_count),
        temperature: config.temperature,
        max_tokens: config.script_max_tokens,
    };
    let raw = complete_text(client, "script generation", request, config.script_retry).await?;
    let scenes = parse_script(&raw, panel_count)?;
    info!("Script ready: {} scenes", scenes.len());
    Ok(scenes)
}
