//! Extraction normalizer
//!
//! Turns raw source payloads or free-form text into canonical records.
//! Structured candidates map deterministically with no external calls; the
//! mapping is pure, so normalizing the same candidate twice yields identical
//! output. Free text goes through the extraction oracle, which may ask for
//! more input; the exchange is capped at a fixed number of rounds, after
//! which the normalizer degrades to a low-confidence record with its
//! unresolved required fields listed for moderator review.

use crate::clients::{
    ConversationTurn, ExtractedFields, ExtractionOracle, SuggestedAction, TurnRole,
};
use crate::models::{normalize_whitespace, CandidateRecord, CanonicalRecord, REQUIRED_FIELDS};
use std::sync::Arc;

/// Maximum clarification rounds before degrading, bounds oracle latency/cost
pub const MAX_ROUNDS: u32 = 3;

/// Retries for a retryable oracle failure within one normalize call
const MAX_ORACLE_RETRIES: u32 = 2;

/// Price band domain
const PRICE_MIN: f64 = 1.0;
const PRICE_MAX: f64 = 4.0;

/// Outcome of normalizing one candidate
#[derive(Debug, Clone)]
pub enum NormalizeOutcome {
    /// Terminal record, ready for dedup and persistence
    Complete(CanonicalRecord),
    /// The oracle needs one more turn of submitter input
    NeedsInput {
        question: String,
        /// Non-empty for multiple-choice questions
        choices: Vec<String>,
        /// Conversation to hand back on the follow-up call
        context: Vec<ConversationTurn>,
        /// Rounds consumed so far
        round: u32,
    },
}

/// Extraction normalizer
pub struct Normalizer {
    oracle: Arc<dyn ExtractionOracle>,
    max_rounds: u32,
}

impl Normalizer {
    pub fn new(oracle: Arc<dyn ExtractionOracle>) -> Self {
        Self {
            oracle,
            max_rounds: MAX_ROUNDS,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Normalize a candidate, consulting the oracle for free-text input
    ///
    /// `context` carries prior exchange turns when resuming a clarification
    /// conversation; pass an empty slice for a fresh candidate.
    pub async fn normalize(
        &self,
        candidate: &CandidateRecord,
        context: &[ConversationTurn],
    ) -> NormalizeOutcome {
        match &candidate.free_text {
            Some(text) => self.normalize_free_text(candidate, text, context).await,
            None => NormalizeOutcome::Complete(self.normalize_structured(candidate)),
        }
    }

    /// Deterministic field mapping for structured candidates
    ///
    /// Pure: no oracle call, no hidden state.
    pub fn normalize_structured(&self, candidate: &CandidateRecord) -> CanonicalRecord {
        let name = candidate
            .name
            .as_deref()
            .map(normalize_whitespace)
            .unwrap_or_default();
        let address = candidate
            .address
            .as_deref()
            .map(normalize_whitespace)
            .unwrap_or_default();
        let category = candidate.categories.first().cloned().unwrap_or_default();
        let service_type = candidate
            .raw
            .get("extra")
            .and_then(|extra| extra.get("service_type"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_default();

        let record = CanonicalRecord {
            name,
            address,
            coordinates: candidate.coordinates,
            category,
            service_type,
            hours: candidate
                .raw
                .get("extra")
                .and_then(|extra| extra.get("hours"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
            price_range: candidate
                .raw
                .get("extra")
                .and_then(|extra| extra.get("price_range"))
                .and_then(|v| v.as_f64())
                .map(clamp_price),
            images: vec![],
            confidence: 1.0,
            missing_fields: vec![],
        };

        let missing = missing_required(&record);
        CanonicalRecord {
            confidence: if missing.is_empty() { 1.0 } else { 0.8 },
            missing_fields: missing,
            ..record
        }
        .enforce_invariants()
    }

    async fn normalize_free_text(
        &self,
        candidate: &CandidateRecord,
        text: &str,
        context: &[ConversationTurn],
    ) -> NormalizeOutcome {
        // Rounds already consumed equal the questions we previously asked
        let round = context
            .iter()
            .filter(|t| t.role == TurnRole::Assistant)
            .count() as u32;

        let mut last_error = None;
        for attempt in 0..=MAX_ORACLE_RETRIES {
            match self.oracle.extract(text, context).await {
                Ok(extraction) => {
                    let wants_input = matches!(
                        extraction.suggested_action,
                        SuggestedAction::AskClarify | SuggestedAction::AskChoice
                    );

                    if wants_input && round < self.max_rounds {
                        let question = extraction
                            .follow_up
                            .clone()
                            .unwrap_or_else(|| "Can you provide more detail?".to_string());

                        tracing::debug!(
                            round = round + 1,
                            max_rounds = self.max_rounds,
                            action = ?extraction.suggested_action,
                            "Oracle requested another input round"
                        );

                        let mut next_context = context.to_vec();
                        next_context.push(ConversationTurn {
                            role: TurnRole::User,
                            content: text.to_string(),
                        });
                        next_context.push(ConversationTurn {
                            role: TurnRole::Assistant,
                            content: question.clone(),
                        });

                        return NormalizeOutcome::NeedsInput {
                            question,
                            choices: extraction.choices,
                            context: next_context,
                            round: round + 1,
                        };
                    }

                    if wants_input {
                        tracing::info!(
                            round,
                            "Round cap reached, degrading to partial record"
                        );
                    }

                    return NormalizeOutcome::Complete(self.build_record(
                        candidate,
                        &extraction.fields,
                        extraction.confidence,
                    ));
                }
                Err(e) if e.is_retryable() && attempt < MAX_ORACLE_RETRIES => {
                    tracing::warn!(attempt, error = %e, "Oracle call failed, retrying");
                    last_error = Some(e);
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Oracle extraction failed, degrading to low-confidence record"
                    );
                    last_error = Some(e);
                    break;
                }
            }
        }

        // Total extraction failure: keep whatever the source supplied and let
        // the moderator fill the rest.
        tracing::debug!(error = ?last_error, "Building fallback record without oracle fields");
        NormalizeOutcome::Complete(self.build_record(candidate, &ExtractedFields::default(), 0.0))
    }

    /// Merge oracle fields over candidate-supplied fields into a record
    fn build_record(
        &self,
        candidate: &CandidateRecord,
        fields: &ExtractedFields,
        confidence: f64,
    ) -> CanonicalRecord {
        let name = fields
            .name
            .as_deref()
            .or(candidate.name.as_deref())
            .map(normalize_whitespace)
            .unwrap_or_default();
        let address = fields
            .address
            .as_deref()
            .or(candidate.address.as_deref())
            .map(normalize_whitespace)
            .unwrap_or_default();

        let record = CanonicalRecord {
            name,
            address,
            coordinates: fields.coordinates.or(candidate.coordinates),
            category: fields
                .category
                .clone()
                .or_else(|| candidate.categories.first().cloned())
                .unwrap_or_default(),
            service_type: fields.service_type.clone().unwrap_or_default(),
            hours: fields.hours.clone(),
            price_range: fields.price_range.map(clamp_price),
            images: fields.images.clone(),
            confidence,
            missing_fields: vec![],
        };

        let missing = missing_required(&record);
        CanonicalRecord {
            missing_fields: missing,
            ..record
        }
        .enforce_invariants()
    }
}

/// Clamp a raw price signal to the 1-4 band
fn clamp_price(raw: f64) -> u8 {
    raw.clamp(PRICE_MIN, PRICE_MAX).round() as u8
}

/// Required fields the record does not carry
fn missing_required(record: &CanonicalRecord) -> Vec<String> {
    let mut missing = Vec::new();
    for field in REQUIRED_FIELDS {
        let absent = match field {
            "name" => record.name.is_empty(),
            "address" => record.address.is_empty(),
            "coordinates" => record.coordinates.is_none(),
            "category" => record.category.is_empty(),
            "service_type" => record.service_type.is_empty(),
            _ => false,
        };
        if absent {
            missing.push(field.to_string());
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{ExtractionResponse, OracleError};
    use crate::models::{GeoPoint, SourceKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted oracle: returns canned responses in order, repeats the last
    struct ScriptedOracle {
        responses: Vec<Result<ExtractionResponse, ()>>,
        calls: AtomicUsize,
    }

    impl ScriptedOracle {
        fn new(responses: Vec<Result<ExtractionResponse, ()>>) -> Arc<Self> {
            Arc::new(Self { responses, calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait::async_trait]
    impl ExtractionOracle for ScriptedOracle {
        async fn extract(
            &self,
            _text: &str,
            _context: &[ConversationTurn],
        ) -> Result<ExtractionResponse, OracleError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            let idx = idx.min(self.responses.len() - 1);
            self.responses[idx]
                .clone()
                .map_err(|_| OracleError::Timeout)
        }
    }

    fn structured_candidate() -> CandidateRecord {
        CandidateRecord {
            name: Some("Joe's   Diner".to_string()),
            address: Some("12  Main St".to_string()),
            coordinates: Some(GeoPoint { lat: 6.6, lng: 3.35 }),
            categories: vec!["restaurant".to_string()],
            source: "places_search".to_string(),
            source_kind: SourceKind::StructuredSearch,
            raw: serde_json::json!({ "extra": { "service_type": "dine_in", "price_range": 7.0 } }),
            free_text: None,
            from_cache: false,
        }
    }

    fn free_text_candidate(text: &str) -> CandidateRecord {
        CandidateRecord {
            name: None,
            address: None,
            coordinates: None,
            categories: vec![],
            source: "web_harvest".to_string(),
            source_kind: SourceKind::TextHarvest,
            raw: serde_json::Value::Null,
            free_text: Some(text.to_string()),
            from_cache: false,
        }
    }

    fn accept_response(name: Option<&str>, confidence: f64) -> ExtractionResponse {
        ExtractionResponse {
            fields: ExtractedFields {
                name: name.map(str::to_string),
                address: Some("Allen Avenue, Ikeja".to_string()),
                coordinates: None,
                category: Some("restaurant".to_string()),
                service_type: Some("dine_in".to_string()),
                hours: None,
                price_range: Some(2.0),
                images: vec![],
            },
            confidence,
            missing_fields: if name.is_none() { vec!["name".to_string()] } else { vec![] },
            suggested_action: SuggestedAction::Accept,
            follow_up: None,
            choices: vec![],
        }
    }

    fn oracle_unused() -> Arc<ScriptedOracle> {
        ScriptedOracle::new(vec![Err(())])
    }

    #[test]
    fn test_structured_mapping_is_idempotent() {
        let normalizer = Normalizer::new(oracle_unused());
        let candidate = structured_candidate();

        let first = normalizer.normalize_structured(&candidate);
        let second = normalizer.normalize_structured(&candidate);
        assert_eq!(first, second);

        assert_eq!(first.name, "Joe's Diner");
        assert_eq!(first.address, "12 Main St");
        assert_eq!(first.service_type, "dine_in");
        // 7.0 clamps into the 1-4 band
        assert_eq!(first.price_range, Some(4));
        assert!(first.missing_fields.is_empty());
        assert_eq!(first.confidence, 1.0);
    }

    #[test]
    fn test_structured_missing_fields_lower_confidence() {
        let normalizer = Normalizer::new(oracle_unused());
        let mut candidate = structured_candidate();
        candidate.coordinates = None;
        candidate.categories.clear();

        let record = normalizer.normalize_structured(&candidate);
        assert!(record.missing_fields.contains(&"coordinates".to_string()));
        assert!(record.missing_fields.contains(&"category".to_string()));
        assert!(record.confidence < 1.0);
    }

    #[test]
    fn test_address_case_preserved() {
        let normalizer = Normalizer::new(oracle_unused());
        let mut candidate = structured_candidate();
        candidate.address = Some("12 McAllister  St".to_string());

        let record = normalizer.normalize_structured(&candidate);
        // Whitespace collapsed, proper-noun casing untouched
        assert_eq!(record.address, "12 McAllister St");
    }

    #[tokio::test]
    async fn test_free_text_missing_name_surfaces_in_record() {
        let oracle = ScriptedOracle::new(vec![Ok(accept_response(None, 0.7))]);
        let normalizer = Normalizer::new(oracle);
        let candidate = free_text_candidate("amala spot on Allen Avenue, great food");

        match normalizer.normalize(&candidate, &[]).await {
            NormalizeOutcome::Complete(record) => {
                assert!(record.missing_fields.contains(&"name".to_string()));
                assert!(record.confidence < 1.0);
                assert_eq!(record.address, "Allen Avenue, Ikeja");
            }
            other => panic!("Expected Complete, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ask_clarify_emits_needs_input_with_context() {
        let ask = ExtractionResponse {
            follow_up: Some("What is the place called?".to_string()),
            suggested_action: SuggestedAction::AskClarify,
            ..accept_response(None, 0.5)
        };
        let oracle = ScriptedOracle::new(vec![Ok(ask)]);
        let normalizer = Normalizer::new(oracle);
        let candidate = free_text_candidate("amala spot on Allen Avenue");

        match normalizer.normalize(&candidate, &[]).await {
            NormalizeOutcome::NeedsInput { question, context, round, .. } => {
                assert_eq!(question, "What is the place called?");
                assert_eq!(round, 1);
                // Context carries the user text and our question for the next call
                assert_eq!(context.len(), 2);
                assert_eq!(context[0].role, TurnRole::User);
                assert_eq!(context[1].role, TurnRole::Assistant);
            }
            other => panic!("Expected NeedsInput, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_round_cap_degrades_to_partial_record() {
        let ask = ExtractionResponse {
            follow_up: Some("Which one?".to_string()),
            suggested_action: SuggestedAction::AskChoice,
            choices: vec!["A".to_string(), "B".to_string()],
            ..accept_response(None, 0.4)
        };
        let oracle = ScriptedOracle::new(vec![Ok(ask)]);
        let normalizer = Normalizer::new(oracle);
        let candidate = free_text_candidate("somewhere on Allen Avenue");

        // Context showing MAX_ROUNDS questions already asked
        let mut context = Vec::new();
        for _ in 0..MAX_ROUNDS {
            context.push(ConversationTurn {
                role: TurnRole::User,
                content: "…".to_string(),
            });
            context.push(ConversationTurn {
                role: TurnRole::Assistant,
                content: "Which one?".to_string(),
            });
        }

        match normalizer.normalize(&candidate, &context).await {
            NormalizeOutcome::Complete(record) => {
                assert!(record.missing_fields.contains(&"name".to_string()));
                // Confidence is the oracle's last reported value
                assert!((record.confidence - 0.4).abs() < f64::EPSILON);
            }
            other => panic!("Expected Complete after round cap, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retryable_failure_then_success() {
        let oracle = ScriptedOracle::new(vec![
            Err(()),
            Ok(accept_response(Some("Amala Spot"), 0.9)),
        ]);
        let normalizer = Normalizer::new(oracle.clone());
        let candidate = free_text_candidate("amala spot on Allen Avenue");

        match normalizer.normalize(&candidate, &[]).await {
            NormalizeOutcome::Complete(record) => {
                assert_eq!(record.name, "Amala Spot");
            }
            other => panic!("Expected Complete, got {:?}", other),
        }
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_degrade_to_zero_confidence() {
        let oracle = ScriptedOracle::new(vec![Err(()), Err(()), Err(())]);
        let normalizer = Normalizer::new(oracle);
        let candidate = free_text_candidate("amala spot on Allen Avenue");

        match normalizer.normalize(&candidate, &[]).await {
            NormalizeOutcome::Complete(record) => {
                assert_eq!(record.confidence, 0.0);
                assert_eq!(record.missing_fields.len(), REQUIRED_FIELDS.len());
            }
            other => panic!("Expected degraded Complete, got {:?}", other),
        }
    }

    #[test]
    fn test_price_clamping() {
        assert_eq!(clamp_price(0.0), 1);
        assert_eq!(clamp_price(2.4), 2);
        assert_eq!(clamp_price(9.9), 4);
    }
}
