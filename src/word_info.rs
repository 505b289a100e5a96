//! Word information payload and the outbound provider seam.

use crate::error::FetchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// AI-generated study information for one word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordInfo {
    pub word: String,
    /// Pronunciation or reading (kana, pinyin, IPA), when the language has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reading: Option<String>,
    pub meaning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_of_speech: Option<String>,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl WordInfo {
    /// Decode a provider payload.
    ///
    /// Anything that does not decode, or decodes with an empty `word` or
    /// `meaning`, is a [`FetchError::MalformedResponse`].
    pub fn from_raw(raw: serde_json::Value) -> Result<Self, FetchError> {
        let info: WordInfo = serde_json::from_value(raw)
            .map_err(|e| FetchError::MalformedResponse(e.to_string()))?;
        if info.word.trim().is_empty() {
            return Err(FetchError::MalformedResponse("missing word".into()));
        }
        if info.meaning.trim().is_empty() {
            return Err(FetchError::MalformedResponse("missing meaning".into()));
        }
        Ok(info)
    }
}

/// Cache key for a user-entered word: trimmed and lowercased.
pub fn cache_key(word: &str) -> String {
    word.trim().to_lowercase()
}

/// The AI provider behind the service.
///
/// Implementations own prompt construction and response extraction, and
/// return the extracted JSON payload. Throttling must be reported as
/// [`FetchError::RateLimited`] (see [`FetchError::from_status`]) so the retry
/// policy can tell it apart from fatal failures.
#[async_trait]
pub trait WordSource: Send + Sync + 'static {
    async fn fetch(&self, word: &str, language: &str) -> Result<serde_json::Value, FetchError>;
}

#[async_trait]
impl<S: WordSource + ?Sized> WordSource for std::sync::Arc<S> {
    async fn fetch(&self, word: &str, language: &str) -> Result<serde_json::Value, FetchError> {
        (**self).fetch(word, language).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_camel_case_payload() {
        let info = WordInfo::from_raw(json!({
            "word": "りんご",
            "reading": "ringo",
            "meaning": "apple",
            "partOfSpeech": "noun",
            "examples": ["りんごを食べる"],
        }))
        .unwrap();

        assert_eq!(info.reading.as_deref(), Some("ringo"));
        assert_eq!(info.part_of_speech.as_deref(), Some("noun"));
        assert_eq!(info.examples.len(), 1);
        assert_eq!(info.notes, None);
    }

    #[test]
    fn rejects_payloads_without_meaning() {
        let err = WordInfo::from_raw(json!({ "word": "xyz" })).unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse(_)));

        let err = WordInfo::from_raw(json!({ "word": "xyz", "meaning": "  " })).unwrap_err();
        assert_eq!(err, FetchError::MalformedResponse("missing meaning".into()));

        let err = WordInfo::from_raw(json!("just a string")).unwrap_err();
        assert!(!err.is_retriable());
    }

    #[test]
    fn cache_key_trims_and_lowercases() {
        assert_eq!(cache_key("  Hello "), "hello");
        assert_eq!(cache_key("APPLE"), "apple");
        assert_eq!(cache_key("りんご"), "りんご");
    }
}
