//! Cache key derivation
//!
//! A key is a versioned SHA-256 digest over the normalized request fields.
//! Each field is length-prefixed so no two field tuples share an encoding.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::constants::key::{AUTO_SOURCE_LANG, KEY_VERSION, MAX_LINE_BREAKS};
use crate::types::{OutputFormat, TranslationRequest};

/// Spans copied verbatim by normalization: `<pre>` blocks, markup tags,
/// `{{...}}`, `${...}` and `{name}` placeholders.
static PROTECTED_SPANS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<pre\b[\s\S]*?</pre>|<[^>]+>|\{\{.*?\}\}|\$\{[^}]*\}|\{[^{}\s]*\}")
        .expect("protected span pattern is valid")
});

/// 64-char lowercase hex cache identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalized request fields that feed the key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub format: OutputFormat,
}

impl KeyMaterial {
    pub fn new(
        text: &str,
        source_lang: Option<&str>,
        target_lang: &str,
        format: OutputFormat,
    ) -> Self {
        Self {
            text: normalize_text(text),
            source_lang: normalize_source_lang(source_lang),
            target_lang: normalize_lang(target_lang),
            format,
        }
    }

    pub fn from_request(request: &TranslationRequest) -> Self {
        Self::new(
            &request.text,
            request.source_lang.as_deref(),
            &request.target_lang,
            request.output_format,
        )
    }

    /// Source language to pass to a backend; `None` means auto-detect
    pub fn backend_source_lang(&self) -> Option<&str> {
        (self.source_lang != AUTO_SOURCE_LANG).then_some(self.source_lang.as_str())
    }

    pub fn key(&self) -> CacheKey {
        let mut hasher = Sha256::new();
        for field in [
            KEY_VERSION,
            self.text.as_str(),
            self.source_lang.as_str(),
            self.target_lang.as_str(),
            self.format.as_str(),
        ] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        CacheKey(format!("{:x}", hasher.finalize()))
    }
}

/// Deterministic cache identifier for a request's content
pub fn compute_key(
    text: &str,
    source_lang: Option<&str>,
    target_lang: &str,
    format: OutputFormat,
) -> CacheKey {
    KeyMaterial::new(text, source_lang, target_lang, format).key()
}

/// Trim, lowercase and use `-` as the subtag separator
pub fn normalize_lang(lang: &str) -> String {
    lang.trim().to_lowercase().replace('_', "-")
}

fn normalize_source_lang(lang: Option<&str>) -> String {
    match lang.map(normalize_lang) {
        Some(lang) if !lang.is_empty() => lang,
        _ => AUTO_SOURCE_LANG.to_string(),
    }
}

/// Canonical text form used for keying and storage.
///
/// Line endings become LF. Outside protected spans, a whitespace run
/// without line breaks becomes one space and a run with line breaks keeps
/// at most two. Leading and trailing whitespace is removed. Case and
/// protected spans are preserved byte for byte.
pub fn normalize_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for span in PROTECTED_SPANS.find_iter(&text) {
        collapse_whitespace(&text[last..span.start()], &mut out);
        out.push_str(span.as_str());
        last = span.end();
    }
    collapse_whitespace(&text[last..], &mut out);

    out.trim_matches(|c: char| c.is_ascii_whitespace()).to_string()
}

fn collapse_whitespace(segment: &str, out: &mut String) {
    let mut run_breaks: Option<usize> = None;

    for ch in segment.chars() {
        if ch.is_ascii_whitespace() {
            let breaks = run_breaks.get_or_insert(0);
            if ch == '\n' {
                *breaks += 1;
            }
            continue;
        }
        if let Some(breaks) = run_breaks.take() {
            push_run(breaks, out);
        }
        out.push(ch);
    }

    if let Some(breaks) = run_breaks {
        push_run(breaks, out);
    }
}

fn push_run(breaks: usize, out: &mut String) {
    if breaks == 0 {
        out.push(' ');
    } else {
        out.extend(std::iter::repeat_n('\n', breaks.min(MAX_LINE_BREAKS)));
    }
}
