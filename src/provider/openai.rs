//! OpenAI API Backend
//!
//! Chat Completions in JSON mode. Serves as a translation tier and as the
//! refinement backend. Token usage is taken from the API response, with a
//! character-based estimate when the response omits it.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{
    BackendResult, BackendTranslation, BackendUsage, RefineInput, RefinementBackend, Refinement,
    TranslateInput, TranslationBackend, error_from_response, estimate_tokens, http_client,
};
use crate::config::BackendConfig;
use crate::constants::models;
use crate::types::{BrokerError, ProviderError, ProviderKind, Result};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

const TRANSLATE_TEMPERATURE: f32 = 0.1;
const REFINE_TEMPERATURE: f32 = 0.3;

/// Lower bound on the completion budget of one call
const MIN_MAX_TOKENS: u64 = 1000;

const TRANSLATE_SYSTEM_PROMPT: &str = "You are a professional translator. \
Translate the \"text\" field of the user message into {target}{source}. \
Preserve HTML tags, placeholders and template variables such as {name}, {{name}} and ${name} exactly as they appear. \
Respond ONLY with a JSON object of the form {\"translation\": \"...\"}.";

const REFINE_SYSTEM_PROMPT: &str = "You are a senior translation editor. \
You receive the original text and a draft translation. Improve the draft for accuracy, fluency and natural phrasing \
in the target language without changing its meaning. \
Preserve HTML tags, placeholders and template variables exactly as they appear. \
Respond ONLY with a JSON object of the form {\"refined\": \"...\"}.";

/// OpenAI API backend with secure API key handling
pub struct OpenAiBackend {
    /// Never exposed in logs or debug output
    api_key: SecretString,
    api_base: String,
    model: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                BrokerError::Config(
                    "OpenAI API key not found. Set OPENAI_API_KEY or providers.openai.api_key"
                        .to_string(),
                )
            })?;

        let api_base = config
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let model = config
            .model
            .clone()
            .unwrap_or_else(|| models::OPENAI_TRANSLATION_MODEL.to_string());

        Ok(Self {
            api_key: SecretString::from(api_key),
            api_base: api_base.trim_end_matches('/').to_string(),
            model,
            client: http_client()?,
        })
    }

    fn translate_request(&self, input: &TranslateInput) -> ChatCompletionRequest {
        let source = input
            .source_lang
            .as_deref()
            .map(|s| format!(" from {}", s))
            .unwrap_or_default();
        let system = TRANSLATE_SYSTEM_PROMPT
            .replacen("{target}", &input.target_lang, 1)
            .replacen("{source}", &source, 1);
        let user = json!({ "text": input.text }).to_string();

        ChatCompletionRequest::json_mode(
            &self.model,
            system,
            user,
            TRANSLATE_TEMPERATURE,
            max_tokens_for(&input.text),
        )
    }

    fn refine_request(input: &RefineInput) -> ChatCompletionRequest {
        let user = json!({
            "source_lang": input.source_lang.as_deref().unwrap_or("auto"),
            "target_lang": input.target_lang,
            "original": input.original,
            "draft_translation": input.draft,
        })
        .to_string();
        let budget_basis = format!("{}{}", input.original, input.draft);

        ChatCompletionRequest::json_mode(
            &input.model,
            REFINE_SYSTEM_PROMPT.to_string(),
            user,
            REFINE_TEMPERATURE,
            max_tokens_for(&budget_basis),
        )
    }

    async fn complete(&self, request: &ChatCompletionRequest) -> BackendResult<Completion> {
        let url = format!("{}/chat/completions", self.api_base);
        debug!(model = %request.model, "Sending request to OpenAI API");

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, ProviderKind::OpenAi).await);
        }

        let body: ChatCompletionResponse = response.json().await?;
        Completion::from_response(body, request)
    }
}

#[async_trait]
impl TranslationBackend for OpenAiBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn translate(&self, input: &TranslateInput) -> BackendResult<BackendTranslation> {
        let request = self.translate_request(input);
        let completion = self.complete(&request).await?;

        Ok(BackendTranslation {
            text: extract_field(&completion.content, "translation"),
            usage: BackendUsage::tokens(
                input.text.chars().count() as u64,
                completion.input_tokens,
                completion.output_tokens,
            ),
        })
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/models", self.api_base);

        let response = self
            .client
            .get(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                info!("OpenAI API is available");
                true
            }
            Ok(resp) => {
                warn!("OpenAI API check failed: {}", resp.status());
                false
            }
            Err(e) => {
                warn!("OpenAI API check failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl RefinementBackend for OpenAiBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn refine(&self, input: &RefineInput) -> BackendResult<Refinement> {
        let request = Self::refine_request(input);
        let completion = self.complete(&request).await?;

        Ok(Refinement {
            text: extract_field(&completion.content, "refined"),
            model: input.model.clone(),
            usage: BackendUsage::tokens(
                input.original.chars().count() as u64,
                completion.input_tokens,
                completion.output_tokens,
            ),
        })
    }

    async fn health_check(&self) -> bool {
        TranslationBackend::health_check(self).await
    }
}

/// Completion budget: twice the estimated input, never below the floor
fn max_tokens_for(text: &str) -> u64 {
    (estimate_tokens(text) * 2).max(MIN_MAX_TOKENS)
}

/// Pull `field` out of a JSON-mode reply; a reply that is not the expected
/// object is taken verbatim.
fn extract_field(content: &str, field: &str) -> String {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    match serde_json::from_str::<Value>(unfenced) {
        Ok(Value::Object(map)) => match map.get(field) {
            Some(Value::String(s)) => s.clone(),
            _ => {
                debug!(field, "JSON reply missing expected field; using raw content");
                trimmed.to_string()
            }
        },
        _ => {
            debug!(field, "Reply is not a JSON object; using raw content");
            trimmed.to_string()
        }
    }
}

struct Completion {
    content: String,
    input_tokens: u64,
    output_tokens: u64,
}

impl Completion {
    fn from_response(
        body: ChatCompletionResponse,
        request: &ChatCompletionRequest,
    ) -> BackendResult<Self> {
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Transient("No content in OpenAI response".to_string()))?;

        let (input_tokens, output_tokens) = match body.usage {
            Some(u) => (u.prompt_tokens, u.completion_tokens),
            None => {
                let prompt: String = request.messages.iter().map(|m| m.content.as_str()).collect();
                (estimate_tokens(&prompt), estimate_tokens(&content))
            }
        };

        Ok(Self {
            content,
            input_tokens,
            output_tokens,
        })
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

impl ChatCompletionRequest {
    fn json_mode(
        model: &str,
        system: String,
        user: String,
        temperature: f32,
        max_tokens: u64,
    ) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user,
                },
            ],
            temperature,
            max_tokens: Some(max_tokens),
            response_format: Some(ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OutputFormat;

    fn backend() -> OpenAiBackend {
        OpenAiBackend::new(&BackendConfig {
            api_key: Some("sk-test".to_string()),
            ..BackendConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_default_model() {
        let request = backend().translate_request(&TranslateInput {
            text: "Hi".to_string(),
            source_lang: None,
            target_lang: "fr".to_string(),
            format: OutputFormat::Plain,
        });
        assert_eq!(request.model, models::OPENAI_TRANSLATION_MODEL);
    }

    #[test]
    fn test_translate_request_shape() {
        let input = TranslateInput {
            text: "Hello {name}".to_string(),
            source_lang: Some("en".to_string()),
            target_lang: "ja".to_string(),
            format: OutputFormat::Plain,
        };
        let request = backend().translate_request(&input);
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["max_tokens"], MIN_MAX_TOKENS);
        let system = body["messages"][0]["content"].as_str().unwrap();
        assert!(system.contains("into ja from en"));
        let user: Value =
            serde_json::from_str(body["messages"][1]["content"].as_str().unwrap()).unwrap();
        assert_eq!(user["text"], "Hello {name}");
    }

    #[test]
    fn test_refine_request_carries_draft_and_model() {
        let input = RefineInput {
            original: "Hello".to_string(),
            draft: "Bonjour".to_string(),
            source_lang: None,
            target_lang: "fr".to_string(),
            model: "gpt-4o".to_string(),
        };
        let request = OpenAiBackend::refine_request(&input);
        assert_eq!(request.model, "gpt-4o");
        let user: Value = serde_json::from_str(&request.messages[1].content).unwrap();
        assert_eq!(user["draft_translation"], "Bonjour");
        assert_eq!(user["source_lang"], "auto");
    }

    #[test]
    fn test_max_tokens_scales_with_input() {
        let long = "a".repeat(8000);
        assert_eq!(max_tokens_for(&long), 4000);
        assert_eq!(max_tokens_for("short"), MIN_MAX_TOKENS);
    }

    #[test]
    fn test_extract_field() {
        assert_eq!(extract_field(r#"{"translation":"Hola"}"#, "translation"), "Hola");
        assert_eq!(
            extract_field("```json\n{\"refined\":\"Salut\"}\n```", "refined"),
            "Salut"
        );
        assert_eq!(extract_field("  plain reply \n", "translation"), "plain reply");
        assert_eq!(
            extract_field(r#"{"other":"x"}"#, "translation"),
            r#"{"other":"x"}"#
        );
    }

    #[test]
    fn test_usage_falls_back_to_estimate() {
        let request = ChatCompletionRequest::json_mode("m", "abcd".into(), "efgh".into(), 0.1, 10);
        let body: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"{\"translation\":\"ok\"}"}}]}"#,
        )
        .unwrap();
        let completion = Completion::from_response(body, &request).unwrap();
        assert_eq!(completion.input_tokens, 2);
        assert!(completion.output_tokens > 0);

        let reported: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"x"}}],"usage":{"prompt_tokens":12,"completion_tokens":3}}"#,
        )
        .unwrap();
        let completion = Completion::from_response(reported, &request).unwrap();
        assert_eq!((completion.input_tokens, completion.output_tokens), (12, 3));
    }

    #[test]
    fn test_empty_choices_is_transient() {
        let request = ChatCompletionRequest::json_mode("m", "s".into(), "u".into(), 0.1, 10);
        let body: ChatCompletionResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(
            Completion::from_response(body, &request),
            Err(ProviderError::Transient(_))
        ));
    }
}
