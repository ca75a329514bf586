//! Discovery orchestration
//!
//! One discovery run fans out to all selected source adapters concurrently,
//! merges their candidates in a deterministic order, dedupes within the
//! batch, then normalizes and dedupes each survivor against the persisted
//! set before saving it in pending moderation state and queueing it for
//! enrichment. Adapter failures degrade the run, never abort it.

use crate::dedup::{DedupSubject, DuplicateDetector};
use crate::enrichment::EnrichmentQueue;
use crate::models::{
    CandidateRecord, ModerationState, QueuePriority, Scope, SourceKind, StoredPlace,
};
use crate::normalizer::{NormalizeOutcome, Normalizer};
use crate::sources::SourceAdapter;
use crate::store::PlaceStore;
use chrono::Utc;
use placelore_common::events::{EventBus, PipelineEvent};
use placelore_common::{Error, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Record saved during a run
#[derive(Debug, Clone, Serialize)]
pub struct SavedEntry {
    pub record_id: Uuid,
    pub name: String,
    pub source: String,
    pub confidence: f64,
}

/// Candidate rejected as a duplicate
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateEntry {
    pub name: String,
    pub source: String,
    /// Absent when the twin was an unsaved candidate from the same batch
    pub matched_record_id: Option<Uuid>,
    pub similarity: f64,
}

/// Candidate parked awaiting submitter input
#[derive(Debug, Clone, Serialize)]
pub struct NeedsInputEntry {
    pub source: String,
    pub question: String,
    pub choices: Vec<String>,
    pub round: u32,
}

/// Non-fatal failure recorded against the run
#[derive(Debug, Clone, Serialize)]
pub struct RunError {
    pub source: String,
    pub message: String,
}

/// Outcome of one discovery run
#[derive(Debug, Clone, Serialize)]
pub struct DiscoverySummary {
    pub run_id: Uuid,
    pub scope: String,
    /// Candidates produced by all adapters before dedup
    pub candidates: usize,
    pub from_cache: usize,
    pub saved: Vec<SavedEntry>,
    pub duplicates: Vec<DuplicateEntry>,
    pub needs_input: Vec<NeedsInputEntry>,
    pub errors: Vec<RunError>,
}

/// Coordinates adapters, normalizer, detector, store, and queue for a run
pub struct DiscoveryOrchestrator {
    sources: Vec<Arc<dyn SourceAdapter>>,
    normalizer: Normalizer,
    detector: DuplicateDetector,
    store: Arc<dyn PlaceStore>,
    queue: EnrichmentQueue,
    events: EventBus,
}

impl DiscoveryOrchestrator {
    pub fn new(
        sources: Vec<Arc<dyn SourceAdapter>>,
        normalizer: Normalizer,
        detector: DuplicateDetector,
        store: Arc<dyn PlaceStore>,
        queue: EnrichmentQueue,
        events: EventBus,
    ) -> Self {
        Self {
            sources,
            normalizer,
            detector,
            store,
            queue,
            events,
        }
    }

    /// Run discovery for a scope
    ///
    /// `only_sources` restricts the run to the named adapters; `None` runs
    /// them all. Fails fast only when no adapter matches or the persisted
    /// record set cannot be loaded; everything downstream degrades into
    /// per-entry summary errors.
    pub async fn run_discovery(
        &self,
        scope: &Scope,
        only_sources: Option<&[String]>,
    ) -> Result<DiscoverySummary> {
        let adapters = self.select_adapters(only_sources)?;
        let run_id = Uuid::new_v4();
        let mut summary = DiscoverySummary {
            run_id,
            scope: scope.to_string(),
            candidates: 0,
            from_cache: 0,
            saved: vec![],
            duplicates: vec![],
            needs_input: vec![],
            errors: vec![],
        };

        tracing::info!(
            run_id = %run_id,
            scope = %scope,
            sources = adapters.len(),
            "Discovery run starting"
        );
        self.events.emit(PipelineEvent::DiscoveryStarted {
            run_id,
            scope: scope.to_string(),
            sources: adapters.iter().map(|a| a.name().to_string()).collect(),
            timestamp: Utc::now(),
        });

        // Concurrent fan-out; merge order stays deterministic below
        let outputs =
            futures::future::join_all(adapters.iter().map(|a| a.discover(scope))).await;

        let mut groups: Vec<(u8, usize, &Arc<dyn SourceAdapter>, _)> = adapters
            .iter()
            .zip(outputs)
            .enumerate()
            .map(|(idx, (adapter, output))| (adapter.priority(), idx, adapter, output))
            .collect();
        // Stable: ties keep registration order
        groups.sort_by_key(|(priority, idx, _, _)| (*priority, *idx));

        let mut merged: Vec<CandidateRecord> = Vec::new();
        for (_, _, adapter, output) in groups {
            if let Some(message) = output.error {
                summary.errors.push(RunError {
                    source: adapter.name().to_string(),
                    message,
                });
            }
            merged.extend(output.candidates);
        }
        summary.candidates = merged.len();
        summary.from_cache = merged.iter().filter(|c| c.from_cache).count();

        let survivors = self.dedup_batch(&mut summary, merged);

        let persisted = self.store.get_all().await?;
        let mut existing: Vec<DedupSubject> =
            persisted.iter().map(DedupSubject::from_place).collect();

        for candidate in survivors {
            self.process_candidate(run_id, candidate, &mut existing, &mut summary)
                .await;
        }

        tracing::info!(
            run_id = %run_id,
            saved = summary.saved.len(),
            duplicates = summary.duplicates.len(),
            needs_input = summary.needs_input.len(),
            errors = summary.errors.len(),
            "Discovery run completed"
        );
        self.events.emit(PipelineEvent::DiscoveryCompleted {
            run_id,
            saved: summary.saved.len(),
            duplicates: summary.duplicates.len(),
            errors: summary.errors.len(),
            timestamp: Utc::now(),
        });

        Ok(summary)
    }

    fn select_adapters(
        &self,
        only_sources: Option<&[String]>,
    ) -> Result<Vec<Arc<dyn SourceAdapter>>> {
        let adapters: Vec<Arc<dyn SourceAdapter>> = match only_sources {
            None => self.sources.clone(),
            Some(names) => {
                for name in names {
                    if !self.sources.iter().any(|a| a.name() == name) {
                        return Err(Error::InvalidInput(format!("Unknown source: {}", name)));
                    }
                }
                self.sources
                    .iter()
                    .filter(|a| names.iter().any(|n| n == a.name()))
                    .cloned()
                    .collect()
            }
        };

        if adapters.is_empty() {
            return Err(Error::InvalidInput("No discovery sources selected".to_string()));
        }
        Ok(adapters)
    }

    /// Drop candidates that duplicate an earlier candidate in the same batch
    ///
    /// Two adapters routinely find the same place; resolving that here keeps
    /// the persisted-set check from comparing the batch against itself.
    /// Free-text candidates pass through untouched, they have no fields to
    /// compare until the normalizer has seen them.
    fn dedup_batch(
        &self,
        summary: &mut DiscoverySummary,
        merged: Vec<CandidateRecord>,
    ) -> Vec<CandidateRecord> {
        let mut seen_fingerprints: HashSet<String> = HashSet::new();
        let mut kept_subjects: Vec<DedupSubject> = Vec::new();
        let mut survivors = Vec::new();

        for candidate in merged {
            let name = match &candidate.name {
                Some(name) => name.clone(),
                None => {
                    survivors.push(candidate);
                    continue;
                }
            };

            if !seen_fingerprints.insert(candidate.fingerprint()) {
                summary.duplicates.push(DuplicateEntry {
                    name,
                    source: candidate.source.clone(),
                    matched_record_id: None,
                    similarity: 1.0,
                });
                continue;
            }

            let subject = DedupSubject {
                id: None,
                name: name.clone(),
                address: candidate.address.clone().unwrap_or_default(),
                coordinates: candidate.coordinates,
            };
            let verdict = self.detector.check(&subject, &kept_subjects);
            if verdict.is_duplicate {
                tracing::debug!(
                    name = %name,
                    source = %candidate.source,
                    similarity = verdict.similarity,
                    "Candidate duplicated within batch"
                );
                summary.duplicates.push(DuplicateEntry {
                    name,
                    source: candidate.source.clone(),
                    matched_record_id: None,
                    similarity: verdict.similarity,
                });
                continue;
            }

            kept_subjects.push(subject);
            survivors.push(candidate);
        }
        survivors
    }

    async fn process_candidate(
        &self,
        run_id: Uuid,
        candidate: CandidateRecord,
        existing: &mut Vec<DedupSubject>,
        summary: &mut DiscoverySummary,
    ) {
        let record = match self.normalizer.normalize(&candidate, &[]).await {
            NormalizeOutcome::Complete(record) => record,
            NormalizeOutcome::NeedsInput {
                question,
                choices,
                round,
                ..
            } => {
                self.events.emit(PipelineEvent::InputRequested {
                    run_id,
                    question: question.clone(),
                    timestamp: Utc::now(),
                });
                summary.needs_input.push(NeedsInputEntry {
                    source: candidate.source,
                    question,
                    choices,
                    round,
                });
                return;
            }
        };

        let subject = DedupSubject::from_record(&record);
        let verdict = self.detector.check(&subject, existing);
        if verdict.is_duplicate {
            if let Some(matched_record_id) = verdict.matched_record_id {
                self.events.emit(PipelineEvent::DuplicateFound {
                    run_id,
                    matched_record_id,
                    similarity: verdict.similarity,
                    timestamp: Utc::now(),
                });
            }
            summary.duplicates.push(DuplicateEntry {
                name: record.name,
                source: candidate.source,
                matched_record_id: verdict.matched_record_id,
                similarity: verdict.similarity,
            });
            return;
        }

        let place = StoredPlace {
            id: Uuid::new_v4(),
            record,
            state: ModerationState::Pending,
            source: candidate.source.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        if let Err(e) = self.store.save(&place).await {
            tracing::error!(run_id = %run_id, error = %e, "Failed to persist candidate");
            summary.errors.push(RunError {
                source: candidate.source,
                message: format!("Persistence failed: {}", e),
            });
            return;
        }

        existing.push(DedupSubject::from_place(&place));
        self.events.emit(PipelineEvent::CandidateSaved {
            run_id,
            record_id: place.id,
            name: place.record.name.clone(),
            timestamp: Utc::now(),
        });

        // Fresh structured finds jump the enrichment line
        let priority = match candidate.source_kind {
            SourceKind::StructuredSearch => QueuePriority::High,
            SourceKind::TextHarvest => QueuePriority::Medium,
        };
        if let Err(e) = self.queue.enqueue(place.id, priority).await {
            summary.errors.push(RunError {
                source: candidate.source.clone(),
                message: format!("Enqueue failed: {}", e),
            });
        }

        summary.saved.push(SavedEntry {
            record_id: place.id,
            name: place.record.name.clone(),
            source: candidate.source,
            confidence: place.record.confidence,
        });
    }
}
