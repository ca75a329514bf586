//! AI text-extraction oracle client
//!
//! The oracle is a black box: it takes free text plus prior conversation
//! turns and returns structured fields, a self-reported confidence, the
//! required fields it could not resolve, and a suggested next action. Each
//! call is stateless; the caller supplies the conversation history.

use crate::models::GeoPoint;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Oracle client errors
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Extraction timed out")]
    Timeout,

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl OracleError {
    /// Timeouts and transport failures are worth another attempt within the
    /// conversation round cap; API and parse errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OracleError::Timeout | OracleError::Network(_))
    }
}

/// Next action the oracle suggests for this extraction
///
/// Closed set so normalizer branching is exhaustive; unknown wire values
/// fail parsing rather than silently degrading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Extraction is usable as-is
    Accept,
    /// Ask the submitter one clarifying question
    AskClarify,
    /// Ask the submitter to pick from choices
    AskChoice,
    /// Oracle wants a web search before it can answer
    RequestWebSearch,
    /// Oracle gives up; a human should fill the fields in
    RequestManualInput,
}

/// One prior exchange turn, supplied back to the oracle on follow-up calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// Fields the oracle extracted; every field is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub name: Option<String>,
    pub address: Option<String>,
    pub coordinates: Option<GeoPoint>,
    pub category: Option<String>,
    pub service_type: Option<String>,
    pub hours: Option<String>,
    /// Raw price signal, clamped to the 1-4 domain by the normalizer
    pub price_range: Option<f64>,
    #[serde(default)]
    pub images: Vec<String>,
}

/// Full oracle response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResponse {
    pub fields: ExtractedFields,
    /// Self-reported confidence in [0,1]
    pub confidence: f64,
    /// Required field names the oracle could not resolve
    #[serde(default)]
    pub missing_fields: Vec<String>,
    pub suggested_action: SuggestedAction,
    /// Question to relay to the submitter for AskClarify/AskChoice
    #[serde(default)]
    pub follow_up: Option<String>,
    /// Choices to offer for AskChoice
    #[serde(default)]
    pub choices: Vec<String>,
}

/// Narrow interface the pipeline consumes
#[async_trait::async_trait]
pub trait ExtractionOracle: Send + Sync {
    async fn extract(
        &self,
        text: &str,
        context: &[ConversationTurn],
    ) -> Result<ExtractionResponse, OracleError>;
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
    text: &'a str,
    context: &'a [ConversationTurn],
}

/// HTTP oracle client
pub struct HttpOracleClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpOracleClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, OracleError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| OracleError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into(),
            api_key,
        })
    }
}

#[async_trait::async_trait]
impl ExtractionOracle for HttpOracleClient {
    async fn extract(
        &self,
        text: &str,
        context: &[ConversationTurn],
    ) -> Result<ExtractionResponse, OracleError> {
        let url = format!("{}/v1/extract", self.base_url);

        tracing::debug!(
            text_len = text.len(),
            context_turns = context.len(),
            "Calling extraction oracle"
        );

        let mut request = self
            .http_client
            .post(&url)
            .json(&ExtractRequest { text, context });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                OracleError::Timeout
            } else {
                OracleError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(OracleError::Api(status.as_u16(), error_text));
        }

        let extraction: ExtractionResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Parse(e.to_string()))?;

        tracing::debug!(
            confidence = extraction.confidence,
            missing = extraction.missing_fields.len(),
            action = ?extraction.suggested_action,
            "Oracle extraction complete"
        );

        Ok(extraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suggested_action_wire_format() {
        let action: SuggestedAction = serde_json::from_str("\"ask_clarify\"").unwrap();
        assert_eq!(action, SuggestedAction::AskClarify);

        // Unknown discriminators are a parse error, not a silent default
        let unknown = serde_json::from_str::<SuggestedAction>("\"askClarify\"");
        assert!(unknown.is_err());
    }

    #[test]
    fn test_response_defaults_for_optional_fields() {
        let json = r#"{
            "fields": {"name": "Amala Spot"},
            "confidence": 0.6,
            "suggested_action": "accept"
        }"#;
        let response: ExtractionResponse = serde_json::from_str(json).unwrap();
        assert!(response.missing_fields.is_empty());
        assert!(response.follow_up.is_none());
        assert!(response.choices.is_empty());
        assert_eq!(response.fields.name.as_deref(), Some("Amala Spot"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(OracleError::Timeout.is_retryable());
        assert!(OracleError::Network("reset".into()).is_retryable());
        assert!(!OracleError::Api(500, "boom".into()).is_retryable());
        assert!(!OracleError::Parse("bad json".into()).is_retryable());
    }
}
