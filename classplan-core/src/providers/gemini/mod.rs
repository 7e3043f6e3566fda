use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{ClassplanError, CoreResult};
use crate::generate::{FragmentStream, GenerationSource};
use crate::http_client::{HttpClient, RequestCtx};
use crate::normalizer::clamp_round_f32;
use crate::sse::DATA_PREFIX;

/// Generative Language API client. `complete` uses `generateContent`;
/// `stream` uses `streamGenerateContent?alt=sse` and re-fragments the SSE
/// body into plain text pieces.
#[derive(Debug, Clone)]
pub struct Gemini {
    http: HttpClient,
    api_key: SecretString,
    base: String,
    model: String,
    max_output_tokens: u32,
    temperature: Option<f32>,
    name: String,
}

impl Gemini {
    pub fn new(
        http: HttpClient,
        api_key: SecretString,
        base: String,
        model: String,
        max_output_tokens: u32,
        temperature: Option<f32>,
    ) -> Self {
        Self {
            http,
            api_key,
            base,
            model,
            max_output_tokens,
            temperature,
            name: "gemini".into(),
        }
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![(
            "x-goog-api-key".to_string(),
            self.api_key.expose_secret().to_string(),
        )]
    }

    fn payload(&self, prompt: &str) -> GGenReq {
        GGenReq {
            contents: vec![GContent {
                parts: vec![GPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GGenConfig {
                max_output_tokens: self.max_output_tokens,
                // The API accepts 0.0..=2.0; configs are clamped, not rejected.
                temperature: self.temperature.map(|t| clamp_round_f32(t, 0.0, 2.0, 2)),
            },
        }
    }
}

// ===== Gemini wire types =====

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GGenReq {
    contents: Vec<GContent>,
    generation_config: GGenConfig,
}

#[derive(Serialize, Deserialize)]
struct GContent {
    parts: Vec<GPart>,
}

#[derive(Serialize, Deserialize)]
struct GPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GGenConfig {
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct GGenResp {
    #[serde(default)]
    candidates: Vec<GCandidate>,
}

#[derive(Deserialize)]
struct GCandidate {
    content: Option<GContent>,
}

fn candidate_text(resp: &GGenResp) -> String {
    resp.candidates
        .iter()
        .filter_map(|c| c.content.as_ref())
        .flat_map(|c| c.parts.iter())
        .map(|p| p.text.as_str())
        .collect()
}

/// One SSE line from `streamGenerateContent` -> the text it carries, if any.
/// Lines that are not data lines, or whose JSON does not parse, yield None.
fn fragment_from_line(line: &str) -> Option<String> {
    let json = line.trim().strip_prefix(DATA_PREFIX)?.trim();
    if json.is_empty() {
        return None;
    }
    match serde_json::from_str::<GGenResp>(json) {
        Ok(resp) => {
            let text = candidate_text(&resp);
            if text.is_empty() { None } else { Some(text) }
        }
        Err(err) => {
            tracing::warn!(%err, "skipping unparseable gemini stream line");
            None
        }
    }
}

#[async_trait]
impl GenerationSource for Gemini {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &str) -> CoreResult<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base, self.model
        );
        let owned = self.headers();
        let hdrs: Vec<(&str, &str)> = owned.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let ctx = RequestCtx::default();

        let (resp, latency_ms) = self
            .http
            .post_json::<_, GGenResp>(&url, &self.payload(prompt), &hdrs, &ctx)
            .await
            .map_err(upstream_error)?;

        let text = candidate_text(&resp);
        tracing::debug!(latency_ms, chars = text.len(), "gemini completion");
        if text.is_empty() {
            return Err(ClassplanError::Generation(
                "model returned no candidates".into(),
            ));
        }
        Ok(text)
    }

    async fn stream(&self, prompt: &str) -> CoreResult<FragmentStream> {
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base, self.model
        );
        let owned = self.headers();
        let hdrs: Vec<(&str, &str)> = owned.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let ctx = RequestCtx::default();

        let lines = self
            .http
            .post_sse_lines(&url, &self.payload(prompt), &hdrs, &ctx)
            .await
            .map_err(upstream_error)?;

        let fragments = lines
            .filter_map(|item| {
                futures_util::future::ready(match item {
                    Ok(line) => fragment_from_line(&line).map(Ok),
                    Err(err) => Some(Err(upstream_error(err))),
                })
            })
            .boxed();
        Ok(fragments)
    }
}

/// Provider transport failures surface to callers as generation failures;
/// the consumer-facing transport taxonomy is reserved for our own API.
fn upstream_error(err: ClassplanError) -> ClassplanError {
    match err {
        ClassplanError::ServerStatus { status, message } => {
            ClassplanError::Generation(format!("gemini rejected request ({status}): {message}"))
        }
        ClassplanError::NoResponse => {
            ClassplanError::Generation("gemini did not respond".into())
        }
        other => other,
    }
}
