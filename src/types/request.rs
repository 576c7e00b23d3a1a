//! Request and response types for the orchestrator

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Provider Identity
// =============================================================================

/// Translation backend identity, plus the `cache` pseudo-provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(rename = "deepl")]
    DeepL,
    #[serde(rename = "openai")]
    OpenAi,
    Google,
    Cache,
}

impl ProviderKind {
    /// External backends in default priority order
    pub const BACKENDS: [ProviderKind; 3] = [Self::DeepL, Self::OpenAi, Self::Google];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeepL => "deepl",
            Self::OpenAi => "openai",
            Self::Google => "google",
            Self::Cache => "cache",
        }
    }

    pub fn is_backend(&self) -> bool {
        !matches!(self, Self::Cache)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deepl" => Ok(Self::DeepL),
            "openai" => Ok(Self::OpenAi),
            "google" => Ok(Self::Google),
            "cache" => Ok(Self::Cache),
            other => Err(format!(
                "Unknown provider '{}'. Valid values: deepl, openai, google",
                other
            )),
        }
    }
}

// =============================================================================
// Output Format
// =============================================================================

/// Content format of the text being translated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Plain,
    Html,
    Markdown,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Html => "html",
            Self::Markdown => "markdown",
        }
    }

    /// Whether markup tags in the text must survive translation
    pub fn has_markup(&self) -> bool {
        matches!(self, Self::Html)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "plain" | "text" => Ok(Self::Plain),
            "html" => Ok(Self::Html),
            "markdown" | "md" => Ok(Self::Markdown),
            other => Err(format!(
                "Invalid format '{}'. Valid values: plain, html, markdown",
                other
            )),
        }
    }
}

// =============================================================================
// Request
// =============================================================================

/// Inbound translation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub text: String,
    /// `None` asks the backend to detect the source language
    #[serde(default)]
    pub source_lang: Option<String>,
    pub target_lang: String,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub enable_refinement: bool,
    /// Overrides the configured refinement model for this request
    #[serde(default)]
    pub refinement_model: Option<String>,
    #[serde(default)]
    pub preferred_provider: Option<ProviderKind>,
}

impl TranslationRequest {
    pub fn new(text: impl Into<String>, target_lang: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_lang: None,
            target_lang: target_lang.into(),
            output_format: OutputFormat::Plain,
            enable_refinement: false,
            refinement_model: None,
            preferred_provider: None,
        }
    }

    pub fn from_lang(mut self, source_lang: impl Into<String>) -> Self {
        self.source_lang = Some(source_lang.into());
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn with_refinement(mut self, enabled: bool) -> Self {
        self.enable_refinement = enabled;
        self
    }

    pub fn with_refinement_model(mut self, model: impl Into<String>) -> Self {
        self.refinement_model = Some(model.into());
        self
    }

    pub fn prefer(mut self, provider: ProviderKind) -> Self {
        self.preferred_provider = Some(provider);
        self
    }
}

// =============================================================================
// Response
// =============================================================================

/// Payload of a successful translation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationData {
    pub text: String,
    pub provider: ProviderKind,
    pub is_refined: bool,
    pub is_cached: bool,
    pub char_count: usize,
    pub processing_time_ms: u64,
}

/// Standardized orchestrator response
///
/// On failure `data` is absent; the original text is never substituted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<TranslationData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TranslationResponse {
    pub fn ok(data: TranslationData) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}
