//! Wraps the external LLM with the fixed translation prompt, a model
//! fallback chain, a per-attempt timeout, the most permissive safety
//! thresholds the provider allows, and the mandatory tag-integrity check
//! (§4.4).
//!
//! The wire format modelled here is the Gemini `generateContent` REST
//! shape (system instruction + contents + safety settings + a
//! `finishReason` on the candidate) since that's the reference
//! provider for the reference case (English -> Arabic literary
//! fiction); any provider that fits the same `{prompt} -> {text}`
//! contract can be wrapped the same way.

pub mod tags;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::Snafu;
use tracing::{instrument, warn};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(context(suffix(Error)))]
pub enum Error {
    #[snafu(display("translation quota exceeded"))]
    QuotaError,
    #[snafu(display("translation blocked by the provider's safety filter"))]
    SafetyBlockedError,
    #[snafu(display("translation request timed out"))]
    TimeoutError,
    #[snafu(display("translator returned an empty response"))]
    EmptyResponseError,
    #[snafu(display("translated markup's tag multiset does not match the original"))]
    IntegrityMismatchError,
    #[snafu(display("transport error calling translator: {message}"))]
    TransportError { message: String },
}

impl Error {
    /// §4.3/§7: quota errors are the one failure kind that doesn't
    /// consume retry budget and instead pauses the whole engine.
    pub fn is_quota(&self) -> bool {
        matches!(self, Error::QuotaError)
    }
}

/// Configuration recognised in §6: the ordered model fallback chain, the
/// per-attempt timeout, and the target language the fixed prompt names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    pub models: Vec<String>,
    pub api_base: String,
    pub timeout_ms: u64,
    pub target_language_name: String,
    pub target_language_code: String,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        TranslatorConfig {
            models: vec!["gemini-1.5-pro".to_owned(), "gemini-1.5-flash".to_owned()],
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_owned(),
            timeout_ms: 600_000,
            target_language_name: "Arabic".to_owned(),
            target_language_code: "ar".to_owned(),
        }
    }
}

fn system_instruction(target_language_name: &str) -> String {
    format!(
        "You are a professional literary translator. Translate the text content of the \
         given HTML/XHTML fragment into {target_language_name}. Rules, in order of \
         priority:\n\
         1. Translate only text content; preserve every tag identically, including its \
         attributes and nesting.\n\
         2. Do not introduce, remove, or reorder any tag.\n\
         3. Return raw markup only: no wrapping code fence, no preamble, no commentary.\n\
         4. Preserve numerals verbatim.\n\
         5. Keep technical terms in the source language when that is the idiomatic choice.",
    )
}

/// `translate(markup) -> translatedMarkup` (§4.4, §6). Implemented by
/// [`GeminiTranslator`] for the reference provider; a stub implementation
/// in `mtj_engine`'s tests exercises the scheduler without network access.
#[async_trait::async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, markup: &str) -> Result<String>;
}

/// The reference provider client: Gemini-shaped `generateContent`, tried
/// across `config.models` in order with a short-circuit on quota.
pub struct GeminiTranslator {
    http: reqwest::Client,
    api_key: String,
    config: TranslatorConfig,
}

impl GeminiTranslator {
    pub fn new(api_key: String, config: TranslatorConfig) -> Self {
        GeminiTranslator { http: reqwest::Client::new(), api_key, config }
    }

    #[instrument(skip(self, markup), fields(model, len = markup.len()))]
    async fn try_model(&self, model: &str, markup: &str) -> Result<String> {
        let url = format!("{}/models/{model}:generateContent", self.config.api_base);
        let body = GenerateRequest {
            system_instruction: Content {
                parts: vec![Part { text: system_instruction(&self.config.target_language_name) }],
            },
            contents: vec![Content { parts: vec![Part { text: markup.to_owned() }] }],
            safety_settings: permissive_safety_settings(),
        };

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .send()
            .await
            .map_err(request_error_to_error)?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return QuotaError.fail();
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::FORBIDDEN && text.contains("RESOURCE_EXHAUSTED") {
                return QuotaError.fail();
            }
            return TransportError { message: format!("HTTP {status}: {text}") }.fail();
        }

        let parsed: GenerateResponse = response.json().await.map_err(request_error_to_error)?;
        let candidate = parsed.candidates.into_iter().next();
        let Some(candidate) = candidate else {
            return EmptyResponseError.fail();
        };

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().map(|p| p.text).collect::<String>())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return match candidate.finish_reason.as_deref() {
                Some("STOP") | None => EmptyResponseError.fail(),
                _ => SafetyBlockedError.fail(),
            };
        }

        let cleaned = tags::strip_code_fence(&text);
        if !tags::integrity_holds(markup, cleaned) {
            return IntegrityMismatchError.fail();
        }
        Ok(cleaned.to_owned())
    }
}

#[async_trait::async_trait]
impl Translator for GeminiTranslator {
    /// Try each model in the fallback chain in order; any non-quota
    /// failure moves on to the next model, a quota failure short-circuits
    /// the whole chain and surfaces immediately (§4.4).
    #[instrument(skip(self, markup))]
    async fn translate(&self, markup: &str) -> Result<String> {
        let mut last_err: Option<Error> = None;
        for model in &self.config.models {
            match self.try_model(model, markup).await {
                Ok(translated) => return Ok(translated),
                Err(err) if err.is_quota() => return Err(err),
                Err(err) => {
                    warn!(model, %err, "model attempt failed, trying next in fallback chain");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or(Error::EmptyResponseError))
    }
}

fn request_error_to_error(source: reqwest::Error) -> Error {
    if source.is_timeout() {
        Error::TimeoutError
    } else {
        Error::TransportError { message: source.to_string() }
    }
}

const HAZARD_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// The corpus here is literary fiction, which otherwise trips generic
/// safety filters (§4.4), so request the least restrictive threshold the
/// provider exposes for every hazard category it defines.
fn permissive_safety_settings() -> Vec<SafetySetting> {
    HAZARD_CATEGORIES
        .iter()
        .map(|category| SafetySetting { category: (*category).to_owned(), threshold: "BLOCK_NONE".to_owned() })
        .collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: String,
    threshold: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubTranslator {
        response: Result<String>,
    }

    #[async_trait::async_trait]
    impl Translator for StubTranslator {
        async fn translate(&self, _markup: &str) -> Result<String> {
            match &self.response {
                Ok(s) => Ok(s.clone()),
                Err(_) => Err(Error::EmptyResponseError),
            }
        }
    }

    #[tokio::test]
    async fn trait_object_is_usable_behind_a_box() {
        let stub: Box<dyn Translator> = Box::new(StubTranslator { response: Ok("<p>hi</p>".into()) });
        assert_eq!(stub.translate("<p>hi</p>").await.unwrap(), "<p>hi</p>");
    }

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = TranslatorConfig::default();
        assert_eq!(config.timeout_ms, 600_000);
    }

    #[test]
    fn is_quota_only_true_for_quota_variant() {
        assert!(Error::QuotaError.is_quota());
        assert!(!Error::TimeoutError.is_quota());
    }
}
