//! Core data model for the discovery pipeline
//!
//! Candidates are the ephemeral output of source adapters; canonical records
//! are the normalized form handed to persistence; verdicts fold into the
//! moderation decision and are not persisted on their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Geography
// ============================================================================

/// WGS84 coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Great-circle distance to another point in meters (haversine)
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos()
                * other.lat.to_radians().cos()
                * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// Geographic granularity of a discovery run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "name")]
pub enum Scope {
    Global,
    Continent(String),
    Country(String),
    Region(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Continent(name) => write!(f, "continent:{}", name),
            Scope::Country(name) => write!(f, "country:{}", name),
            Scope::Region(name) => write!(f, "region:{}", name),
        }
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("global") {
            return Ok(Scope::Global);
        }
        match s.split_once(':') {
            Some(("continent", name)) if !name.is_empty() => {
                Ok(Scope::Continent(name.to_string()))
            }
            Some(("country", name)) if !name.is_empty() => Ok(Scope::Country(name.to_string())),
            Some(("region", name)) if !name.is_empty() => Ok(Scope::Region(name.to_string())),
            _ => Err(format!(
                "Invalid scope '{}', expected global|continent:NAME|country:NAME|region:NAME",
                s
            )),
        }
    }
}

// ============================================================================
// Candidates
// ============================================================================

/// Adapter kind; structured sources produce directly mappable fields,
/// harvesters produce free text for the extraction oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    StructuredSearch,
    TextHarvest,
}

/// Raw or partially-normalized location data produced by a source adapter
///
/// Ephemeral: consumed by the normalizer and discarded after conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Place name, when the source provides one
    pub name: Option<String>,
    /// Free-text address, when the source provides one
    pub address: Option<String>,
    pub coordinates: Option<GeoPoint>,
    pub categories: Vec<String>,
    /// Adapter identifier ("places_search", "web_harvest", ...)
    pub source: String,
    pub source_kind: SourceKind,
    /// Source-specific raw payload, kept for the moderator view
    pub raw: serde_json::Value,
    /// Unstructured text routed through the extraction oracle
    pub free_text: Option<String>,
    /// Served from cache rather than a fresh external call
    pub from_cache: bool,
}

impl CandidateRecord {
    /// Derived identity key over name + address tokens + coordinates
    pub fn fingerprint(&self) -> String {
        fingerprint(
            self.name.as_deref(),
            self.address.as_deref(),
            self.coordinates.as_ref(),
        )
    }
}

/// Derived cache/comparison key over a candidate's identity-relevant fields
///
/// Coordinates are rounded to 5 decimal places (~1 m) so that jitter in
/// source data does not defeat cache and dedup lookups.
pub fn fingerprint(
    name: Option<&str>,
    address: Option<&str>,
    coordinates: Option<&GeoPoint>,
) -> String {
    let mut hasher = Sha256::new();
    if let Some(name) = name {
        hasher.update(name.to_lowercase().trim().as_bytes());
    }
    hasher.update(b"|");
    if let Some(address) = address {
        hasher.update(address_tokens(address).join(" ").as_bytes());
    }
    hasher.update(b"|");
    if let Some(coords) = coordinates {
        hasher.update(format!("{:.5},{:.5}", coords.lat, coords.lng).as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// Canonical records
// ============================================================================

/// Required fields of a canonical record, by name
pub const REQUIRED_FIELDS: [&str; 5] = ["name", "address", "coordinates", "category", "service_type"];

/// Normalized, schema-conformant representation of a location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub name: String,
    /// Whitespace-normalized, case-preserved address
    pub address: String,
    pub coordinates: Option<GeoPoint>,
    pub category: String,
    pub service_type: String,
    pub hours: Option<String>,
    /// Price band 1-4 (clamped)
    pub price_range: Option<u8>,
    pub images: Vec<String>,
    /// Extraction confidence in [0,1]
    pub confidence: f64,
    /// Required fields the extraction could not resolve
    pub missing_fields: Vec<String>,
}

impl CanonicalRecord {
    /// Clamp confidence into [0,1] and enforce the completeness invariant:
    /// a record with missing required fields can never carry confidence 1.0.
    pub fn enforce_invariants(mut self) -> Self {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        if !self.missing_fields.is_empty() && self.confidence >= 1.0 {
            self.confidence = 0.99;
        }
        self
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields.is_empty()
    }
}

/// Moderation lifecycle of a persisted location
///
/// The pipeline only ever creates records in `Pending`; transitions out of
/// it are moderator actions handled elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationState {
    Pending,
    Approved,
    Rejected,
}

impl ModerationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationState::Pending => "pending",
            ModerationState::Approved => "approved",
            ModerationState::Rejected => "rejected",
        }
    }
}

impl FromStr for ModerationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ModerationState::Pending),
            "approved" => Ok(ModerationState::Approved),
            "rejected" => Ok(ModerationState::Rejected),
            other => Err(format!("Unknown moderation state '{}'", other)),
        }
    }
}

/// Persisted location record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPlace {
    pub id: Uuid,
    pub record: CanonicalRecord,
    pub state: ModerationState,
    /// Adapter that discovered this place
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Duplicate verdicts
// ============================================================================

/// Field that agreed between a candidate and an existing record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    Name,
    Address,
    Proximity,
}

/// Outcome of checking one candidate against the existing record set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateVerdict {
    pub is_duplicate: bool,
    pub matched_record_id: Option<Uuid>,
    /// Best similarity observed in [0,1]
    pub similarity: f64,
    pub matched_fields: BTreeSet<MatchField>,
}

impl DuplicateVerdict {
    pub fn not_duplicate(similarity: f64) -> Self {
        Self {
            is_duplicate: false,
            matched_record_id: None,
            similarity,
            matched_fields: BTreeSet::new(),
        }
    }
}

// ============================================================================
// Enrichment queue items
// ============================================================================

/// Enrichment priority; ordering is High > Medium > Low
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePriority {
    Low,
    Medium,
    High,
}

/// Unit of asynchronous enrichment work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub record_id: Uuid,
    pub priority: QueuePriority,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl QueueItem {
    pub fn new(record_id: Uuid, priority: QueuePriority) -> Self {
        Self {
            record_id,
            priority,
            enqueued_at: Utc::now(),
            attempts: 0,
            last_error: None,
        }
    }
}

// ============================================================================
// Text helpers shared by fingerprinting and dedup
// ============================================================================

/// Collapse runs of whitespace to single spaces, preserving case
///
/// Addresses are never title-cased; that would corrupt proper nouns.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercased address tokens with punctuation stripped and common street
/// abbreviations expanded
pub fn address_tokens(address: &str) -> Vec<String> {
    address
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| match t {
            "st" => "street".to_string(),
            "ave" | "av" => "avenue".to_string(),
            "rd" => "road".to_string(),
            "blvd" => "boulevard".to_string(),
            "dr" => "drive".to_string(),
            "ln" => "lane".to_string(),
            other => other.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_known_distance() {
        // Two points ~111 m apart along a meridian (0.001 degrees latitude)
        let a = GeoPoint { lat: 6.6000, lng: 3.3500 };
        let b = GeoPoint { lat: 6.6010, lng: 3.3500 };
        let d = a.distance_m(&b);
        assert!((d - 111.2).abs() < 1.0, "Expected ~111m, got {}", d);
    }

    #[test]
    fn test_scope_roundtrip() {
        for s in ["global", "continent:africa", "country:nigeria", "region:lagos"] {
            let scope: Scope = s.parse().unwrap();
            assert_eq!(scope.to_string(), s);
        }
        assert!("region:".parse::<Scope>().is_err());
        assert!("city:lagos".parse::<Scope>().is_err());
    }

    #[test]
    fn test_fingerprint_stable_under_jitter_and_case() {
        let base = CandidateRecord {
            name: Some("Joe's Diner".to_string()),
            address: Some("12 Main St".to_string()),
            coordinates: Some(GeoPoint { lat: 6.600001, lng: 3.350001 }),
            categories: vec![],
            source: "places_search".to_string(),
            source_kind: SourceKind::StructuredSearch,
            raw: serde_json::Value::Null,
            free_text: None,
            from_cache: false,
        };
        let mut jittered = base.clone();
        jittered.name = Some("JOE'S DINER".to_string());
        jittered.address = Some("12 Main Street".to_string());
        jittered.coordinates = Some(GeoPoint { lat: 6.6000012, lng: 3.3500008 });

        assert_eq!(base.fingerprint(), jittered.fingerprint());

        let mut moved = base.clone();
        moved.coordinates = Some(GeoPoint { lat: 6.601, lng: 3.350 });
        assert_ne!(base.fingerprint(), moved.fingerprint());
    }

    #[test]
    fn test_canonical_invariant_caps_confidence() {
        let record = CanonicalRecord {
            name: "Amala Spot".to_string(),
            address: "Allen Avenue".to_string(),
            coordinates: None,
            category: "restaurant".to_string(),
            service_type: "dine_in".to_string(),
            hours: None,
            price_range: None,
            images: vec![],
            confidence: 1.0,
            missing_fields: vec!["coordinates".to_string()],
        }
        .enforce_invariants();

        assert!(record.confidence < 1.0);

        let complete = CanonicalRecord {
            missing_fields: vec![],
            confidence: 1.0,
            ..record.clone()
        }
        .enforce_invariants();
        assert_eq!(complete.confidence, 1.0);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(QueuePriority::High > QueuePriority::Medium);
        assert!(QueuePriority::Medium > QueuePriority::Low);
    }

    #[test]
    fn test_address_tokens_expand_abbreviations() {
        assert_eq!(
            address_tokens("12 Main St."),
            vec!["12", "main", "street"]
        );
        assert_eq!(
            address_tokens("Allen Ave, Ikeja"),
            vec!["allen", "avenue", "ikeja"]
        );
    }

    #[test]
    fn test_normalize_whitespace_preserves_case() {
        assert_eq!(
            normalize_whitespace("  12   Main\tSt  "),
            "12 Main St"
        );
    }
}
