//! DeepL API Backend
//!
//! Primary translation tier. Exhausted character quota is reported with
//! HTTP 456 and latches the tier for the day.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    BackendResult, BackendTranslation, BackendUsage, TranslateInput, TranslationBackend,
    error_from_response, http_client,
};
use crate::config::BackendConfig;
use crate::types::{BrokerError, ProviderError, ProviderKind, Result};

const PRO_API_BASE: &str = "https://api.deepl.com/v2";
const FREE_API_BASE: &str = "https://api-free.deepl.com/v2";

/// Keys for the free plan carry this suffix and use a separate host
const FREE_KEY_SUFFIX: &str = ":fx";

pub struct DeepLBackend {
    api_key: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for DeepLBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepLBackend")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl DeepLBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                BrokerError::Config(
                    "DeepL API key not found. Set DEEPL_API_KEY or providers.deepl.api_key"
                        .to_string(),
                )
            })?;

        let api_base = config.api_base.clone().unwrap_or_else(|| {
            if api_key.ends_with(FREE_KEY_SUFFIX) {
                FREE_API_BASE.to_string()
            } else {
                PRO_API_BASE.to_string()
            }
        });

        Ok(Self {
            api_key: SecretString::from(api_key),
            api_base: api_base.trim_end_matches('/').to_string(),
            client: http_client()?,
        })
    }

    fn auth_header(&self) -> String {
        format!("DeepL-Auth-Key {}", self.api_key.expose_secret())
    }

    fn build_request(input: &TranslateInput) -> DeepLRequest {
        DeepLRequest {
            text: vec![input.text.clone()],
            target_lang: map_target_lang(&input.target_lang),
            source_lang: input.source_lang.as_deref().map(map_source_lang),
            preserve_formatting: true,
            tag_handling: input.format.has_markup().then(|| "html".to_string()),
        }
    }

    fn parse_response(body: DeepLResponse) -> BackendResult<String> {
        body.translations
            .into_iter()
            .next()
            .map(|t| t.text)
            .ok_or_else(|| ProviderError::Transient("DeepL returned no translations".to_string()))
    }

    /// Character usage for the current billing period
    pub async fn account_usage(&self) -> BackendResult<DeepLUsage> {
        let response = self
            .client
            .get(format!("{}/usage", self.api_base))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, ProviderKind::DeepL).await);
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl TranslationBackend for DeepLBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::DeepL
    }

    async fn translate(&self, input: &TranslateInput) -> BackendResult<BackendTranslation> {
        let request = Self::build_request(input);
        debug!(
            target_lang = %request.target_lang,
            source_lang = ?request.source_lang,
            "Sending request to DeepL"
        );

        let response = self
            .client
            .post(format!("{}/translate", self.api_base))
            .header("Authorization", self.auth_header())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, ProviderKind::DeepL).await);
        }

        let body: DeepLResponse = response.json().await?;
        let text = Self::parse_response(body)?;

        Ok(BackendTranslation {
            text,
            usage: BackendUsage::chars(input.text.chars().count() as u64),
        })
    }

    async fn health_check(&self) -> bool {
        match self.account_usage().await {
            Ok(usage) => {
                debug!(
                    used = usage.character_count,
                    limit = usage.character_limit,
                    "DeepL API is available"
                );
                true
            }
            Err(e) => {
                warn!("DeepL API check failed: {}", e);
                false
            }
        }
    }
}

/// DeepL target codes carry regional variants where DeepL requires them
pub(crate) fn map_target_lang(lang: &str) -> String {
    match lang.trim().to_lowercase().replace('_', "-").as_str() {
        "en" => "EN-US".to_string(),
        "zh-tw" | "zh-hant" | "zh-hk" => "ZH-HANT".to_string(),
        "zh" | "zh-cn" | "zh-hans" => "ZH-HANS".to_string(),
        "pt" => "PT-PT".to_string(),
        other => other.to_uppercase(),
    }
}

/// DeepL source codes are bare language codes
pub(crate) fn map_source_lang(lang: &str) -> String {
    let lang = lang.trim();
    lang.split(['-', '_'])
        .next()
        .unwrap_or(lang)
        .to_uppercase()
}

// Request/Response types

#[derive(Debug, Serialize)]
struct DeepLRequest {
    text: Vec<String>,
    target_lang: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_lang: Option<String>,
    preserve_formatting: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag_handling: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeepLResponse {
    translations: Vec<DeepLTranslation>,
}

#[derive(Debug, Deserialize)]
struct DeepLTranslation {
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeepLUsage {
    #[serde(default)]
    pub character_count: u64,
    #[serde(default)]
    pub character_limit: u64,
}
