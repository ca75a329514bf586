//! Text-harvesting source adapter
//!
//! Fetches unstructured text from configured web sources and emits free-text
//! candidates. Field mapping is left to the extraction normalizer's oracle
//! path; this adapter only segments page text into plausible listing blocks.

use crate::cache::TtlCache;
use crate::models::{CandidateRecord, Scope, SourceKind};
use crate::sources::{DiscoveryOutput, SourceAdapter};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const ADAPTER_NAME: &str = "web_harvest";

/// Minimum block length worth sending to the oracle
const MIN_BLOCK_LEN: usize = 40;
/// Cap on candidates per page, bounds oracle cost for link-farm pages
const MAX_BLOCKS_PER_PAGE: usize = 20;

/// Harvest fetch errors
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Fetch timed out")]
    Timeout,

    #[error("HTTP error {0}")]
    Http(u16),
}

/// Page fetching seam, mocked in tests
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, HarvestError>;
}

/// reqwest-backed page fetcher
pub struct HttpPageFetcher {
    http_client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self, HarvestError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| HarvestError::Network(e.to_string()))?;
        Ok(Self { http_client })
    }
}

#[async_trait::async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<String, HarvestError> {
        let response = self.http_client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                HarvestError::Timeout
            } else {
                HarvestError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Http(status.as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| HarvestError::Network(e.to_string()))
    }
}

/// One configured harvest source: a URL plus the scopes it covers
#[derive(Debug, Clone)]
pub struct HarvestSource {
    pub url: String,
    /// Empty means the source covers every scope
    pub scopes: Vec<Scope>,
}

impl HarvestSource {
    fn covers(&self, scope: &Scope) -> bool {
        self.scopes.is_empty() || self.scopes.contains(scope)
    }
}

/// Adapter harvesting free text from web sources
pub struct WebHarvestAdapter {
    fetcher: Arc<dyn PageFetcher>,
    cache: TtlCache<Vec<CandidateRecord>>,
    sources: Vec<HarvestSource>,
}

impl WebHarvestAdapter {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        cache: TtlCache<Vec<CandidateRecord>>,
        sources: Vec<HarvestSource>,
    ) -> Self {
        Self { fetcher, cache, sources }
    }

    /// Split page text into candidate blocks
    ///
    /// Blocks are blank-line-separated; short fragments (nav links, headers)
    /// are dropped.
    fn segment(url: &str, text: &str) -> Vec<CandidateRecord> {
        text.split("\n\n")
            .map(str::trim)
            .filter(|block| block.len() >= MIN_BLOCK_LEN)
            .take(MAX_BLOCKS_PER_PAGE)
            .map(|block| CandidateRecord {
                name: None,
                address: None,
                coordinates: None,
                categories: vec![],
                source: ADAPTER_NAME.to_string(),
                source_kind: SourceKind::TextHarvest,
                raw: serde_json::json!({ "url": url }),
                free_text: Some(block.to_string()),
                from_cache: false,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl SourceAdapter for WebHarvestAdapter {
    fn name(&self) -> &'static str {
        ADAPTER_NAME
    }

    fn kind(&self) -> SourceKind {
        SourceKind::TextHarvest
    }

    async fn discover(&self, scope: &Scope) -> DiscoveryOutput {
        let mut output = DiscoveryOutput::default();
        let mut errors = Vec::new();

        for source in self.sources.iter().filter(|s| s.covers(scope)) {
            let cache_key = TtlCache::<Vec<CandidateRecord>>::key(ADAPTER_NAME, &[&source.url]);

            if let Some(cached) = self.cache.get(&cache_key).await {
                tracing::debug!(url = %source.url, "Harvest served from cache");
                output.candidates.extend(cached.into_iter().map(|mut c| {
                    c.from_cache = true;
                    c
                }));
                continue;
            }

            match self.fetcher.fetch(&source.url).await {
                Ok(text) => {
                    let candidates = Self::segment(&source.url, &text);
                    tracing::debug!(
                        url = %source.url,
                        blocks = candidates.len(),
                        "Harvest complete"
                    );
                    self.cache.insert(cache_key, candidates.clone()).await;
                    output.candidates.extend(candidates);
                }
                Err(e) => {
                    tracing::warn!(
                        url = %source.url,
                        error = %e,
                        "Harvest fetch failed, continuing with remaining sources"
                    );
                    errors.push(format!("{}: {}", source.url, e));
                }
            }
        }

        if !errors.is_empty() {
            output.error = Some(format!("{}: {}", ADAPTER_NAME, errors.join("; ")));
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeFetcher {
        calls: AtomicUsize,
        body: Result<String, ()>,
    }

    #[async_trait::async_trait]
    impl PageFetcher for FakeFetcher {
        async fn fetch(&self, _url: &str) -> Result<String, HarvestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.body
                .clone()
                .map_err(|_| HarvestError::Http(503))
        }
    }

    fn sources() -> Vec<HarvestSource> {
        vec![HarvestSource {
            url: "http://example.test/listings".to_string(),
            scopes: vec![],
        }]
    }

    #[tokio::test]
    async fn test_segments_blocks_and_drops_fragments() {
        let body = "nav | home | about\n\n\
            Joe's Diner on 12 Main Street serves the best pancakes in the region.\n\n\
            ok\n\n\
            Amala spot on Allen Avenue, great food and generous portions every day."
            .to_string();
        let fetcher = Arc::new(FakeFetcher { calls: AtomicUsize::new(0), body: Ok(body) });
        let adapter = WebHarvestAdapter::new(fetcher, TtlCache::new(60), sources());

        let output = adapter.discover(&Scope::Region("lagos".to_string())).await;
        assert!(output.error.is_none());
        // "nav | home | about" is below MIN_BLOCK_LEN? It's 18 chars -> dropped; "ok" dropped
        assert_eq!(output.candidates.len(), 2);
        for candidate in &output.candidates {
            assert_eq!(candidate.source_kind, SourceKind::TextHarvest);
            assert!(candidate.free_text.is_some());
            assert!(candidate.name.is_none());
        }
    }

    #[tokio::test]
    async fn test_cache_hit_skips_fetch() {
        let body = "A long enough harvested listing block about somewhere worth visiting."
            .to_string();
        let fetcher = Arc::new(FakeFetcher { calls: AtomicUsize::new(0), body: Ok(body) });
        let adapter =
            WebHarvestAdapter::new(fetcher.clone(), TtlCache::new(60), sources());
        let scope = Scope::Global;

        adapter.discover(&scope).await;
        let second = adapter.discover(&scope).await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(second.candidates.iter().all(|c| c.from_cache));
    }

    #[tokio::test]
    async fn test_fetch_failure_is_isolated() {
        let fetcher = Arc::new(FakeFetcher { calls: AtomicUsize::new(0), body: Err(()) });
        let adapter = WebHarvestAdapter::new(fetcher, TtlCache::new(60), sources());

        let output = adapter.discover(&Scope::Global).await;
        assert!(output.candidates.is_empty());
        assert!(output.error.unwrap().contains(ADAPTER_NAME));
    }

    #[tokio::test]
    async fn test_scope_filter() {
        let fetcher = Arc::new(FakeFetcher {
            calls: AtomicUsize::new(0),
            body: Ok("irrelevant".to_string()),
        });
        let source = HarvestSource {
            url: "http://example.test/lagos".to_string(),
            scopes: vec![Scope::Region("lagos".to_string())],
        };
        let adapter =
            WebHarvestAdapter::new(fetcher.clone(), TtlCache::new(60), vec![source]);

        adapter.discover(&Scope::Region("abuja".to_string())).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);

        adapter.discover(&Scope::Region("lagos".to_string())).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }
}
