//! Title translation and slug normalization.
//!
//! Issue titles may be written in any language; branch names, worktree
//! directories and database names need a short ASCII slug. Titles are
//! translated to English through the DeepL API, then slugified.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::{Result, WorkflowError};

const DEEPL_FREE_URL: &str = "https://api-free.deepl.com/v2/translate";
const DEEPL_PRO_URL: &str = "https://api.deepl.com/v2/translate";
const TARGET_LANG: &str = "EN";

/// Convert text to a lowercase, hyphen-separated ASCII slug.
///
/// Runs of anything other than ASCII letters and digits collapse into a
/// single hyphen; the result never starts or ends with a hyphen.
pub fn slugify(text: &str) -> String {
    text.to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` into English.
    async fn translate(&self, text: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct DeepLResponse {
    translations: Vec<DeepLTranslation>,
}

#[derive(Debug, Deserialize)]
struct DeepLTranslation {
    text: String,
    #[serde(default)]
    detected_source_language: Option<String>,
}

/// DeepL REST client.
pub struct DeepLTranslator {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl DeepLTranslator {
    /// Keys issued for the free tier end in `:fx` and must use the free host.
    pub fn new(api_key: impl Into<String>, endpoint: Option<String>) -> Self {
        let api_key = api_key.into();
        let endpoint = endpoint.unwrap_or_else(|| Self::endpoint_for_key(&api_key).to_string());
        Self {
            client: reqwest::Client::new(),
            api_key,
            endpoint,
        }
    }

    pub fn endpoint_for_key(api_key: &str) -> &'static str {
        if api_key.ends_with(":fx") {
            DEEPL_FREE_URL
        } else {
            DEEPL_PRO_URL
        }
    }
}

#[async_trait]
impl Translator for DeepLTranslator {
    async fn translate(&self, text: &str) -> Result<String> {
        let resp = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("DeepL-Auth-Key {}", self.api_key))
            .form(&[("text", text), ("target_lang", TARGET_LANG)])
            .send()
            .await
            .map_err(|e| WorkflowError::Translation(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(WorkflowError::Translation(format!(
                "translation API returned {status}: {}",
                body.trim()
            )));
        }

        let parsed: DeepLResponse = resp
            .json()
            .await
            .map_err(|e| WorkflowError::Translation(format!("unexpected response: {e}")))?;
        let first = parsed
            .translations
            .into_iter()
            .next()
            .ok_or_else(|| WorkflowError::Translation("response contained no translations".into()))?;
        debug!(
            source_language = first.detected_source_language.as_deref().unwrap_or("?"),
            "translated title"
        );
        Ok(first.text)
    }
}

/// Translator that returns a fixed text regardless of input.
pub struct StaticTranslator(pub String);

#[async_trait]
impl Translator for StaticTranslator {
    async fn translate(&self, _text: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Produces slugs for issue titles.
pub struct SlugService {
    translator: Box<dyn Translator>,
}

impl SlugService {
    pub fn new(translator: Box<dyn Translator>) -> Self {
        Self { translator }
    }

    /// Translate (when the title is not already ASCII) and slugify.
    pub async fn slug_for_title(&self, title: &str) -> Result<String> {
        let english = if title.is_ascii() {
            title.to_string()
        } else {
            self.translator.translate(title).await?
        };
        let slug = slugify(&english);
        if slug.is_empty() {
            return Err(WorkflowError::Translation(format!(
                "title '{title}' produced an empty slug (translated: '{english}')"
            )));
        }
        info!(title, slug = %slug, "derived slug");
        Ok(slug)
    }
}
