use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use secrecy::SecretString;

use crate::config::Config;
use crate::error::{ClassplanError, CoreResult};
use crate::http_client::HttpClient;

/// Boxed stream of generated text fragments. The stream ends with natural
/// completion or a single terminal `Err`; nothing is emitted after an error.
pub type FragmentStream = futures::stream::BoxStream<'static, CoreResult<String>>;

/// An upstream text generator. Constructed once at process start and passed
/// by reference into the components that need it.
#[async_trait]
pub trait GenerationSource: Send + Sync {
    fn name(&self) -> &str;

    /// Single-shot completion.
    async fn complete(&self, prompt: &str) -> CoreResult<String>;

    /// Incremental fragments. Sources without native streaming fall back to
    /// one fragment from `complete`.
    async fn stream(&self, prompt: &str) -> CoreResult<FragmentStream> {
        let text = self.complete(prompt).await?;
        Ok(futures::stream::once(async move { Ok(text) }).boxed())
    }
}

/// A source that replays canned fragments. Useful for tests and for running
/// the server without a provider key.
pub struct CannedSource {
    fragments: Vec<String>,
    fail_with: Option<String>,
}

impl CannedSource {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            fail_with: None,
        }
    }

    /// Emits the fragments, then fails with `message`.
    pub fn failing<I, S>(fragments: I, message: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            fail_with: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl GenerationSource for CannedSource {
    fn name(&self) -> &str {
        "canned"
    }

    async fn complete(&self, _prompt: &str) -> CoreResult<String> {
        if let Some(msg) = &self.fail_with {
            return Err(ClassplanError::Generation(msg.clone()));
        }
        Ok(self.fragments.concat())
    }

    async fn stream(&self, _prompt: &str) -> CoreResult<FragmentStream> {
        let mut items: Vec<CoreResult<String>> =
            self.fragments.iter().cloned().map(Ok).collect();
        if let Some(msg) = &self.fail_with {
            items.push(Err(ClassplanError::Generation(msg.clone())));
        }
        Ok(futures::stream::iter(items).boxed())
    }
}

/// Build the configured generation source.
///
/// "gemini" requires the API key env var named in config; "canned" needs
/// nothing and answers with a fixed placeholder plan.
pub fn source_from_config(
    cfg: &Config,
    http: HttpClient,
) -> CoreResult<Arc<dyn GenerationSource>> {
    match cfg.generation.provider.as_str() {
        "gemini" => {
            let key = std::env::var(&cfg.generation.api_key_env).map_err(|_| {
                ClassplanError::Validation(format!(
                    "environment variable {} is not set",
                    cfg.generation.api_key_env
                ))
            })?;
            Ok(Arc::new(crate::providers::gemini::Gemini::new(
                http,
                SecretString::new(key.into()),
                cfg.generation.base_url.clone(),
                cfg.generation.model.clone(),
                cfg.generation.max_output_tokens,
                cfg.generation.temperature,
            )))
        }
        "canned" => Ok(Arc::new(CannedSource::new([
            "Monday: revise counting with grade 1.\n",
            "Tuesday: water cycle demonstration for grade 2.\n",
        ]))),
        other => Err(ClassplanError::Validation(format!(
            "unknown generation provider: {other}"
        ))),
    }
}
