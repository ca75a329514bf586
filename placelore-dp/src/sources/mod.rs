//! Source adapters for discovery
//!
//! Each adapter wraps one external discovery source behind a uniform
//! interface. Adapters own their external calls, rate limiting, and error
//! translation; a failing adapter reports an error tag alongside whatever
//! partial results it gathered and never aborts the overall run.

pub mod places_search;
pub mod web_harvest;

pub use places_search::PlacesSearchAdapter;
pub use web_harvest::{HttpPageFetcher, PageFetcher, WebHarvestAdapter};

use crate::models::{CandidateRecord, Scope, SourceKind};

/// Result of one adapter's discovery pass
///
/// `candidates` may be partial when `error` is set.
#[derive(Debug, Default)]
pub struct DiscoveryOutput {
    pub candidates: Vec<CandidateRecord>,
    /// Error tag for the run summary; the run itself continues
    pub error: Option<String>,
}

/// Uniform interface over heterogeneous discovery sources
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Adapter identifier, stamped on every candidate it produces
    fn name(&self) -> &'static str;

    fn kind(&self) -> SourceKind;

    /// Stable merge priority; lower sorts earlier in the batch
    ///
    /// Gives the in-batch "first processed wins" rule a deterministic order
    /// independent of fan-in arrival timing. Structured sources outrank
    /// text harvesters.
    fn priority(&self) -> u8 {
        match self.kind() {
            SourceKind::StructuredSearch => 10,
            SourceKind::TextHarvest => 50,
        }
    }

    /// Discover candidate records within a scope
    async fn discover(&self, scope: &Scope) -> DiscoveryOutput;
}
