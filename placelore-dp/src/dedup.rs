//! Duplicate detector
//!
//! Scores a candidate against existing records using name, address, and geo
//! similarity, cheapest check first. Pure with respect to its inputs; the
//! only state is an optional verdict cache keyed by candidate fingerprint
//! and a digest of the existing-record set, so repeated checks against an
//! unchanged set cost one hash lookup.

use crate::models::{
    address_tokens, fingerprint, CanonicalRecord, DuplicateVerdict, GeoPoint, MatchField,
    StoredPlace,
};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

/// Radius inside which existing records are considered for comparison
pub const PROXIMITY_RADIUS_M: f64 = 150.0;

/// Name similarity that alone calls a duplicate
pub const NAME_STRONG_THRESHOLD: f64 = 0.85;

/// Name similarity sufficient when the address also matches
pub const NAME_MODERATE_THRESHOLD: f64 = 0.6;

/// Address similarity counted as a match
pub const ADDRESS_MATCH_THRESHOLD: f64 = 0.8;

const NAME_WEIGHT: f64 = 0.6;
const ADDRESS_WEIGHT: f64 = 0.4;

/// Verdict cache ceiling; the map is cleared rather than evicted piecewise
const CACHE_MAX_ENTRIES: usize = 10_000;

/// Identity-relevant view of a record being compared
#[derive(Debug, Clone)]
pub struct DedupSubject {
    pub id: Option<Uuid>,
    pub name: String,
    pub address: String,
    pub coordinates: Option<GeoPoint>,
}

impl DedupSubject {
    pub fn from_record(record: &CanonicalRecord) -> Self {
        Self {
            id: None,
            name: record.name.clone(),
            address: record.address.clone(),
            coordinates: record.coordinates,
        }
    }

    pub fn from_place(place: &StoredPlace) -> Self {
        Self {
            id: Some(place.id),
            name: place.record.name.clone(),
            address: place.record.address.clone(),
            coordinates: place.record.coordinates,
        }
    }

    fn fingerprint(&self) -> String {
        fingerprint(
            Some(&self.name),
            Some(&self.address),
            self.coordinates.as_ref(),
        )
    }
}

/// Duplicate detector with optional verdict caching
pub struct DuplicateDetector {
    /// Name similarity that alone calls a duplicate (default 0.85)
    strong_name_threshold: f64,
    /// Name similarity sufficient when the address also matches (default 0.6)
    moderate_name_threshold: f64,
    /// Address similarity counted as a match (default 0.8)
    address_match_threshold: f64,
    verdict_cache: Mutex<HashMap<String, DuplicateVerdict>>,
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl DuplicateDetector {
    pub fn new() -> Self {
        Self {
            strong_name_threshold: NAME_STRONG_THRESHOLD,
            moderate_name_threshold: NAME_MODERATE_THRESHOLD,
            address_match_threshold: ADDRESS_MATCH_THRESHOLD,
            verdict_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Check one candidate against the existing record set
    pub fn check(&self, subject: &DedupSubject, existing: &[DedupSubject]) -> DuplicateVerdict {
        let cache_key = format!("{}@{}", subject.fingerprint(), set_digest(existing));

        if let Ok(cache) = self.verdict_cache.lock() {
            if let Some(verdict) = cache.get(&cache_key) {
                tracing::trace!("Dedup verdict served from fingerprint cache");
                return verdict.clone();
            }
        }

        let verdict = self.check_uncached(subject, existing);

        if let Ok(mut cache) = self.verdict_cache.lock() {
            if cache.len() >= CACHE_MAX_ENTRIES {
                cache.clear();
            }
            cache.insert(cache_key, verdict.clone());
        }
        verdict
    }

    fn check_uncached(
        &self,
        subject: &DedupSubject,
        existing: &[DedupSubject],
    ) -> DuplicateVerdict {
        let subject_tokens: HashSet<String> =
            address_tokens(&subject.address).into_iter().collect();

        // Stage 1: geo-proximity filter bounds the comparison set. Without
        // coordinates, fall back to identical normalized address token sets.
        let comparison_set: Vec<(&DedupSubject, bool)> = existing
            .iter()
            .filter_map(|record| match (subject.coordinates, record.coordinates) {
                (Some(a), Some(b)) => {
                    (a.distance_m(&b) <= PROXIMITY_RADIUS_M).then_some((record, true))
                }
                _ => {
                    let record_tokens: HashSet<String> =
                        address_tokens(&record.address).into_iter().collect();
                    (!subject_tokens.is_empty() && subject_tokens == record_tokens)
                        .then_some((record, false))
                }
            })
            .collect();

        if comparison_set.is_empty() {
            return DuplicateVerdict::not_duplicate(0.0);
        }

        let mut best_score = 0.0f64;
        let mut best_match: Option<(&DedupSubject, f64, BTreeSet<MatchField>)> = None;

        for (record, proximate) in comparison_set {
            // Stage 2: name similarity
            let name_sim = name_similarity(&subject.name, &record.name);
            // Stage 3: address similarity
            let addr_sim = address_similarity(&subject.address, &record.address);

            let combined = name_sim * NAME_WEIGHT + addr_sim * ADDRESS_WEIGHT;
            best_score = best_score.max(combined);

            let strong_name = name_sim >= self.strong_name_threshold;
            let name_plus_address = name_sim >= self.moderate_name_threshold
                && addr_sim >= self.address_match_threshold;

            if !(strong_name || name_plus_address) {
                continue;
            }

            let mut fields = BTreeSet::new();
            fields.insert(MatchField::Name);
            if addr_sim >= self.address_match_threshold {
                fields.insert(MatchField::Address);
            }
            if proximate {
                fields.insert(MatchField::Proximity);
            }

            // Tie-break across passing records: highest combined score wins
            let better = match &best_match {
                Some((_, score, _)) => combined > *score,
                None => true,
            };
            if better {
                best_match = Some((record, combined, fields));
            }
        }

        match best_match {
            Some((record, score, fields)) => {
                tracing::debug!(
                    matched = ?record.id,
                    similarity = score,
                    "Duplicate detected"
                );
                DuplicateVerdict {
                    is_duplicate: true,
                    matched_record_id: record.id,
                    similarity: score,
                    matched_fields: fields,
                }
            }
            None => DuplicateVerdict::not_duplicate(best_score),
        }
    }
}

/// Case-insensitive fuzzy name similarity (Jaro-Winkler)
fn name_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    strsim::jaro_winkler(a.trim(), b.trim())
}

/// Address similarity over normalized tokens
///
/// Street numbers are decisive: if both addresses carry numbers and none is
/// shared, they are different buildings no matter how similar the street
/// names read.
fn address_similarity(a: &str, b: &str) -> f64 {
    let tokens_a: HashSet<String> = address_tokens(a).into_iter().collect();
    let tokens_b: HashSet<String> = address_tokens(b).into_iter().collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let numbers_a: HashSet<&String> = tokens_a
        .iter()
        .filter(|t| t.chars().all(|c| c.is_ascii_digit()))
        .collect();
    let numbers_b: HashSet<&String> = tokens_b
        .iter()
        .filter(|t| t.chars().all(|c| c.is_ascii_digit()))
        .collect();
    if !numbers_a.is_empty() && !numbers_b.is_empty() && numbers_a.is_disjoint(&numbers_b) {
        return 0.0;
    }

    let intersection = tokens_a.intersection(&tokens_b).count() as f64;
    let union = tokens_a.union(&tokens_b).count() as f64;
    intersection / union
}

/// Digest of the existing-record set for verdict cache keys
fn set_digest(existing: &[DedupSubject]) -> String {
    let mut hasher = Sha256::new();
    for record in existing {
        match record.id {
            Some(id) => hasher.update(id.as_bytes()),
            None => hasher.update(record.fingerprint().as_bytes()),
        }
    }
    format!("{:x}", hasher.finalize())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(name: &str, address: &str, coords: Option<(f64, f64)>) -> DedupSubject {
        DedupSubject {
            id: Some(Uuid::new_v4()),
            name: name.to_string(),
            address: address.to_string(),
            coordinates: coords.map(|(lat, lng)| GeoPoint { lat, lng }),
        }
    }

    #[test]
    fn test_near_identical_names_within_radius_is_duplicate() {
        let detector = DuplicateDetector::new();
        let a = subject("Joe's Diner", "12 Main St", Some((6.60000, 3.35000)));
        // ~10 m away, trivially different spelling
        let b = subject("Joes Diner", "12 Main Street", Some((6.60009, 3.35000)));

        let verdict = detector.check(&a, std::slice::from_ref(&b));
        assert!(verdict.is_duplicate);
        assert_eq!(verdict.matched_record_id, b.id);
        assert!(verdict.matched_fields.contains(&MatchField::Name));
        assert!(verdict.matched_fields.contains(&MatchField::Address));
        assert!(verdict.matched_fields.contains(&MatchField::Proximity));
    }

    #[test]
    fn test_symmetry_for_identical_records() {
        let detector = DuplicateDetector::new();
        let a = subject("Joe's Diner", "12 Main St", Some((6.60000, 3.35000)));
        let b = subject("Joe's Diner", "12 Main St", Some((6.60005, 3.35000)));

        let ab = detector.check(&a, std::slice::from_ref(&b));
        let ba = detector.check(&b, std::slice::from_ref(&a));

        assert!(ab.is_duplicate && ba.is_duplicate);
        assert_eq!(ab.matched_fields, ba.matched_fields);
    }

    #[test]
    fn test_outside_radius_is_not_compared() {
        let detector = DuplicateDetector::new();
        let a = subject("Joe's Diner", "12 Main St", Some((6.6000, 3.3500)));
        // Same name, ~1.1 km north
        let b = subject("Joe's Diner", "500 North Rd", Some((6.6100, 3.3500)));

        let verdict = detector.check(&a, std::slice::from_ref(&b));
        assert!(!verdict.is_duplicate);
        assert_eq!(verdict.similarity, 0.0);
    }

    #[test]
    fn test_no_coordinates_falls_back_to_address_token_set() {
        let detector = DuplicateDetector::new();
        let a = subject("Joe's Diner", "12 Main St", None);
        let b = subject("Joes Diner", "12 Main Street", Some((6.6, 3.35)));

        let verdict = detector.check(&a, std::slice::from_ref(&b));
        assert!(verdict.is_duplicate);
        assert!(!verdict.matched_fields.contains(&MatchField::Proximity));
    }

    #[test]
    fn test_moderate_name_needs_address_agreement() {
        // Raise the strong-name bar so only the name+address path can fire
        let detector = DuplicateDetector {
            strong_name_threshold: 0.99,
            ..DuplicateDetector::new()
        };
        let a = subject("Joe's Diner", "12 Main St", Some((6.60000, 3.35000)));

        // Matching address: moderate name similarity suffices
        let same_address = subject("Joes Diner", "12 Main Street", Some((6.60005, 3.35000)));
        let verdict = detector.check(&a, std::slice::from_ref(&same_address));
        assert!(verdict.is_duplicate);

        // Different street number: address similarity collapses to zero and
        // the moderate path cannot fire
        let other_address = subject("Joes Diner", "98 Main Street", Some((6.60005, 3.35000)));
        let verdict = detector.check(&a, std::slice::from_ref(&other_address));
        assert!(!verdict.is_duplicate);
        // Best observed score is still reported
        assert!(verdict.similarity > 0.0);
    }

    #[test]
    fn test_tie_break_picks_highest_combined_score() {
        let detector = DuplicateDetector::new();
        let a = subject("Joe's Diner", "12 Main St", Some((6.60000, 3.35000)));
        let weaker = subject("Joes Dinner", "14 Main St", Some((6.60004, 3.35000)));
        let stronger = subject("Joe's Diner", "12 Main Street", Some((6.60002, 3.35000)));

        let verdict = detector.check(&a, &[weaker.clone(), stronger.clone()]);
        assert!(verdict.is_duplicate);
        assert_eq!(verdict.matched_record_id, stronger.id);
    }

    #[test]
    fn test_street_number_mismatch_zeroes_address_similarity() {
        assert_eq!(address_similarity("12 Main St", "98 Main St"), 0.0);
        assert!(address_similarity("12 Main St", "12 Main Street") > 0.99);
    }

    #[test]
    fn test_verdict_cache_hit_on_repeat_check() {
        let detector = DuplicateDetector::new();
        let a = subject("Joe's Diner", "12 Main St", Some((6.60000, 3.35000)));
        let b = subject("Joes Diner", "12 Main Street", Some((6.60009, 3.35000)));
        let existing = vec![b];

        let first = detector.check(&a, &existing);
        let second = detector.check(&a, &existing);
        assert_eq!(first.is_duplicate, second.is_duplicate);
        assert_eq!(first.matched_record_id, second.matched_record_id);
        assert_eq!(detector.verdict_cache.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_changed_existing_set_misses_cache() {
        let detector = DuplicateDetector::new();
        let a = subject("Joe's Diner", "12 Main St", Some((6.60000, 3.35000)));
        let b = subject("Joes Diner", "12 Main Street", Some((6.60009, 3.35000)));

        let verdict = detector.check(&a, std::slice::from_ref(&b));
        assert!(verdict.is_duplicate);

        // Record removed: the verdict must not be served stale
        let verdict = detector.check(&a, &[]);
        assert!(!verdict.is_duplicate);
    }
}
