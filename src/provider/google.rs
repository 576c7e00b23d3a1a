//! Google Cloud Translation Backend
//!
//! Basic edition (v2) REST API authenticated with an API key. Billed per
//! character, so usage is the input character count.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    BackendResult, BackendTranslation, BackendUsage, TranslateInput, TranslationBackend,
    error_from_response, http_client,
};
use crate::config::BackendConfig;
use crate::types::{BrokerError, ProviderError, ProviderKind, Result};

const DEFAULT_API_BASE: &str = "https://translation.googleapis.com/language/translate/v2";

pub struct GoogleBackend {
    api_key: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for GoogleBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleBackend")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl GoogleBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                BrokerError::Config(
                    "Google API key not found. Set GOOGLE_API_KEY or providers.google.api_key"
                        .to_string(),
                )
            })?;

        let api_base = config
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        Ok(Self {
            api_key: SecretString::from(api_key),
            api_base: api_base.trim_end_matches('/').to_string(),
            client: http_client()?,
        })
    }

    fn build_request(input: &TranslateInput) -> GoogleRequest {
        GoogleRequest {
            q: vec![input.text.clone()],
            target: map_lang(&input.target_lang),
            source: input.source_lang.as_deref().map(map_lang),
            format: if input.format.has_markup() { "html" } else { "text" },
        }
    }

    fn parse_response(body: GoogleResponse) -> BackendResult<String> {
        body.data
            .translations
            .into_iter()
            .next()
            .map(|t| t.translated_text)
            .ok_or_else(|| ProviderError::Transient("Google returned no translations".to_string()))
    }
}

#[async_trait]
impl TranslationBackend for GoogleBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    async fn translate(&self, input: &TranslateInput) -> BackendResult<BackendTranslation> {
        let request = Self::build_request(input);
        debug!(target_lang = %request.target, "Sending request to Google Translate");

        let response = self
            .client
            .post(&self.api_base)
            .query(&[("key", self.api_key.expose_secret())])
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, ProviderKind::Google).await);
        }

        let body: GoogleResponse = response.json().await?;
        Ok(BackendTranslation {
            text: Self::parse_response(body)?,
            usage: BackendUsage::chars(input.text.chars().count() as u64),
        })
    }

    async fn health_check(&self) -> bool {
        let response = self
            .client
            .get(format!("{}/languages", self.api_base))
            .query(&[("key", self.api_key.expose_secret())])
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                info!("Google Translate API is available");
                true
            }
            Ok(resp) => {
                warn!("Google Translate API check failed: {}", resp.status());
                false
            }
            Err(e) => {
                warn!("Google Translate API check failed: {}", e.without_url());
                false
            }
        }
    }
}

/// Google expects lowercase codes except for Chinese script and Brazilian
/// Portuguese variants
pub(crate) fn map_lang(lang: &str) -> String {
    match lang.trim().to_lowercase().replace('_', "-").as_str() {
        "zh" | "zh-cn" | "zh-hans" => "zh-CN".to_string(),
        "zh-tw" | "zh-hant" | "zh-hk" => "zh-TW".to_string(),
        "pt-br" => "pt-BR".to_string(),
        other => other.to_string(),
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct GoogleRequest {
    q: Vec<String>,
    target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    data: GoogleData,
}

#[derive(Debug, Deserialize)]
struct GoogleData {
    translations: Vec<GoogleTranslation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleTranslation {
    translated_text: String,
}
