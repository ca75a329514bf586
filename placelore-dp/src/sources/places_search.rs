//! Structured-search source adapter
//!
//! Queries the maps/places platform for each configured category query within
//! the requested scope and maps results directly into candidate records.
//! Every (query, scope) lookup is checked against the cache first; hits skip
//! the network entirely and return candidates stamped `from_cache`.

use crate::cache::TtlCache;
use crate::clients::{MapsPlatform, RawPlaceResult};
use crate::models::{CandidateRecord, GeoPoint, Scope, SourceKind};
use crate::sources::{DiscoveryOutput, SourceAdapter};
use std::sync::Arc;

pub const ADAPTER_NAME: &str = "places_search";

/// Adapter over the platform's geographic search API
pub struct PlacesSearchAdapter {
    maps: Arc<dyn MapsPlatform>,
    cache: TtlCache<Vec<CandidateRecord>>,
    /// Category queries issued per discovery run
    queries: Vec<String>,
}

impl PlacesSearchAdapter {
    pub fn new(
        maps: Arc<dyn MapsPlatform>,
        cache: TtlCache<Vec<CandidateRecord>>,
        queries: Vec<String>,
    ) -> Self {
        Self { maps, cache, queries }
    }

    fn to_candidate(&self, raw: RawPlaceResult) -> CandidateRecord {
        let coordinates = match (raw.lat, raw.lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
            _ => None,
        };
        let payload = serde_json::json!({
            "name": raw.name,
            "address": raw.address,
            "categories": raw.categories,
            "extra": raw.extra,
        });

        CandidateRecord {
            name: Some(raw.name),
            address: raw.address,
            coordinates,
            categories: raw.categories,
            source: ADAPTER_NAME.to_string(),
            source_kind: SourceKind::StructuredSearch,
            raw: payload,
            free_text: None,
            from_cache: false,
        }
    }
}

#[async_trait::async_trait]
impl SourceAdapter for PlacesSearchAdapter {
    fn name(&self) -> &'static str {
        ADAPTER_NAME
    }

    fn kind(&self) -> SourceKind {
        SourceKind::StructuredSearch
    }

    async fn discover(&self, scope: &Scope) -> DiscoveryOutput {
        let scope_str = scope.to_string();
        let mut output = DiscoveryOutput::default();
        let mut errors = Vec::new();

        for query in &self.queries {
            let cache_key = TtlCache::<Vec<CandidateRecord>>::key(
                ADAPTER_NAME,
                &[&scope_str, query],
            );

            if let Some(cached) = self.cache.get(&cache_key).await {
                tracing::debug!(query = %query, scope = %scope_str, "Search served from cache");
                output.candidates.extend(cached.into_iter().map(|mut c| {
                    c.from_cache = true;
                    c
                }));
                continue;
            }

            match self.maps.search_nearby(query, scope).await {
                Ok(results) => {
                    let candidates: Vec<CandidateRecord> = results
                        .into_iter()
                        .map(|raw| self.to_candidate(raw))
                        .collect();
                    tracing::debug!(
                        query = %query,
                        scope = %scope_str,
                        candidates = candidates.len(),
                        "Search complete"
                    );
                    self.cache.insert(cache_key, candidates.clone()).await;
                    output.candidates.extend(candidates);
                }
                Err(e) => {
                    tracing::warn!(
                        query = %query,
                        scope = %scope_str,
                        error = %e,
                        "Search query failed, continuing with remaining queries"
                    );
                    errors.push(format!("{}: {}", query, e));
                }
            }
        }

        if !errors.is_empty() {
            output.error = Some(format!("{}: {}", ADAPTER_NAME, errors.join("; ")));
        }
        output
    }
}
