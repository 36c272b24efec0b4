use crate::config::{ConfigError, GalleryConfig};
use crate::core::archive::{thumbnail_entry_name, ArchiveAssembler, ArchiveError};
use crate::core::crop::{CropProvider, GeometryCrop};
use crate::core::definition::ItemDefinition;
use crate::core::duplicate::{DuplicateReport, DuplicateResolver};
use crate::core::thumbnail::{ProcessedRecord, ProcessingError, ThumbnailWorker};
use crate::services::enrich::{enrich_definition, Enricher};
use crate::services::fetch::Fetcher;
use indicatif::ProgressBar;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Archive still shared by {0} handle(s) after processing")]
    ArchiveInUse(usize),

    #[error("Duplicate resolution failed: {0}")]
    Resolve(String),

    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },
}

/// Stages of one gallery build, strictly in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Loading,
    Processing,
    Resolving,
    Pruning,
    Finalizing,
    Done,
}

impl PipelineState {
    fn next(self) -> Option<Self> {
        match self {
            Self::Loading => Some(Self::Processing),
            Self::Processing => Some(Self::Resolving),
            Self::Resolving => Some(Self::Pruning),
            Self::Pruning => Some(Self::Finalizing),
            Self::Finalizing => Some(Self::Done),
            Self::Done => None,
        }
    }
}

/// A definition dropped during processing.
#[derive(Debug, Clone)]
pub struct FailedItem {
    /// Empty when the definition had no identifier.
    pub identifier: String,
    pub source: String,
    pub reason: String,
}

/// Sealed archive plus what happened to every definition.
#[derive(Debug)]
pub struct GalleryOutput {
    pub bytes: Vec<u8>,
    /// Surviving definitions, in input order.
    pub manifest: Vec<ItemDefinition>,
    pub failed: Vec<FailedItem>,
    pub duplicates: DuplicateReport,
}

impl GalleryOutput {
    /// Identifiers that were discarded, by failure or as duplicates.
    pub fn discarded_identifiers(&self) -> BTreeSet<String> {
        self.failed
            .iter()
            .filter(|f| !f.identifier.is_empty())
            .map(|f| f.identifier.clone())
            .chain(self.duplicates.discarded.iter().cloned())
            .collect()
    }
}

type Outcome = (usize, Result<ProcessedRecord, ProcessingError>);

/// Drives one build: load, process in parallel, resolve duplicates, prune, finalize.
pub struct GalleryPipeline {
    config: GalleryConfig,
    fetcher: Arc<dyn Fetcher>,
    cropper: Arc<dyn CropProvider>,
    enricher: Option<Arc<dyn Enricher>>,
    progress: ProgressBar,
    state: PipelineState,
    history: Vec<PipelineState>,
}

impl GalleryPipeline {
    pub fn new(config: GalleryConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config,
            fetcher,
            cropper: Arc::new(GeometryCrop),
            enricher: None,
            progress: ProgressBar::hidden(),
            state: PipelineState::Loading,
            history: vec![PipelineState::Loading],
        })
    }

    pub fn with_cropper(mut self, cropper: Arc<dyn CropProvider>) -> Self {
        self.cropper = cropper;
        self
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// Report per-item progress on `bar` during processing.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = bar;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Every state entered so far, starting with `Loading`.
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    pub async fn run(&mut self, definitions: Vec<ItemDefinition>) -> Result<GalleryOutput, PipelineError> {
        if self.state != PipelineState::Loading {
            return Err(PipelineError::InvalidTransition {
                from: self.state,
                to: PipelineState::Processing,
            });
        }
        let definitions = unique_definitions(definitions);
        tracing::info!(count = definitions.len(), "loaded definitions");

        self.transition(PipelineState::Processing)?;
        let archive = Arc::new(ArchiveAssembler::new());
        let (records, failed) = self.process_all(&definitions, Arc::clone(&archive)).await;

        self.transition(PipelineState::Resolving)?;
        let threshold = self.config.duplicate_threshold;
        let (records, duplicates) = tokio::task::spawn_blocking(move || {
            let report = DuplicateResolver::new(threshold).resolve(&records);
            (records, report)
        })
        .await
        .map_err(|e| PipelineError::Resolve(e.to_string()))?;
        tracing::info!(pairs = duplicates.pair_count(), "found duplicate pairs");

        self.transition(PipelineState::Pruning)?;
        let mut archive =
            Arc::try_unwrap(archive).map_err(|shared| PipelineError::ArchiveInUse(Arc::strong_count(&shared)))?;

        let mut discard: BTreeSet<String> = duplicates.discarded.clone();
        discard.extend(
            failed
                .iter()
                .filter(|f| !f.identifier.is_empty())
                .map(|f| f.identifier.clone()),
        );
        for identifier in &discard {
            if archive.remove(&thumbnail_entry_name(identifier)) {
                tracing::info!(identifier = %identifier, "removed entry");
            }
        }

        let kept: HashMap<&str, &ProcessedRecord> = records
            .iter()
            .filter(|r| !discard.contains(&r.identifier))
            .map(|r| (r.identifier.as_str(), r))
            .collect();

        // Anything still present without a surviving record would break manifest/entry parity.
        let kept_entries: HashSet<&str> = kept.values().map(|r| r.entry_name.as_str()).collect();
        for name in archive.entry_names() {
            if !kept_entries.contains(name.as_str()) {
                tracing::warn!(entry = %name, "removing orphaned entry");
                archive.remove(&name);
            }
        }

        let manifest: Vec<ItemDefinition> = definitions
            .iter()
            .filter_map(|d| d.identifier().and_then(|id| kept.get(id)))
            .map(|r| r.definition.clone())
            .collect();

        self.transition(PipelineState::Finalizing)?;
        let bytes = archive.finalize(&manifest)?;

        self.transition(PipelineState::Done)?;
        Ok(GalleryOutput {
            bytes,
            manifest,
            failed,
            duplicates,
        })
    }

    /// Fan out one task per definition, bounded by `config.concurrency`, and
    /// wait for all of them. Failures are isolated to their own definition.
    async fn process_all(
        &self,
        definitions: &[ItemDefinition],
        archive: Arc<ArchiveAssembler>,
    ) -> (Vec<ProcessedRecord>, Vec<FailedItem>) {
        let worker = ThumbnailWorker::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.cropper),
            archive,
            &self.config,
        );
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let total = definitions.len();
        self.progress.set_length(total as u64);

        let retry = self.config.enrich_retry;
        let mut tasks: JoinSet<Outcome> = JoinSet::new();
        let mut spawned: HashMap<task::Id, usize> = HashMap::with_capacity(total);
        for (index, definition) in definitions.iter().cloned().enumerate() {
            let worker = worker.clone();
            let semaphore = Arc::clone(&semaphore);
            let enricher = self.enricher.clone();

            let handle = tasks.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        let mut definition = definition;
                        if let Some(enricher) = &enricher {
                            if let Err(e) = enrich_definition(enricher.as_ref(), &mut definition, &retry).await {
                                tracing::warn!(identifier = %definition.md5, error = %e, "enrichment failed, keeping existing tags");
                            }
                        }
                        tracing::debug!(index, total, source = %definition.source, "processing");
                        worker.process(definition).await
                    }
                    Err(e) => Err(ProcessingError::Worker(e.to_string())),
                };
                (index, outcome)
            });
            spawned.insert(handle.id(), index);
        }
        drop(worker);

        let mut records = Vec::new();
        let mut failed = Vec::new();
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, (index, Ok(record)))) => {
                    self.progress.set_message(record.identifier.clone());
                    records.push((index, record));
                }
                Ok((_, (index, Err(e)))) => {
                    failed.push((index, failed_item(&definitions[index], e.to_string())));
                }
                Err(e) => match spawned.get(&e.id()) {
                    Some(&index) => {
                        let reason = if e.is_panic() {
                            "worker task panicked".to_string()
                        } else {
                            format!("worker task aborted: {}", e)
                        };
                        failed.push((index, failed_item(&definitions[index], reason)));
                    }
                    None => tracing::error!(error = %e, "unknown worker task failed"),
                },
            }
            self.progress.inc(1);
        }
        self.progress.finish_and_clear();

        records.sort_by_key(|(index, _)| *index);
        failed.sort_by_key(|(index, _)| *index);
        tracing::info!(processed = records.len(), failed = failed.len(), "processing complete");

        (
            records.into_iter().map(|(_, r)| r).collect(),
            failed.into_iter().map(|(_, f)| f).collect(),
        )
    }

    fn transition(&mut self, to: PipelineState) -> Result<(), PipelineError> {
        if self.state.next() != Some(to) {
            return Err(PipelineError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::info!(from = ?self.state, to = ?to, "pipeline state");
        self.state = to;
        self.history.push(to);
        Ok(())
    }
}

fn failed_item(definition: &ItemDefinition, reason: String) -> FailedItem {
    let item = FailedItem {
        identifier: definition.identifier().unwrap_or_default().to_string(),
        source: definition.source.clone(),
        reason,
    };
    tracing::warn!(identifier = %item.identifier, source = %item.source, error = %item.reason, "discarding definition");
    item
}

/// Trim identifiers and keep the first definition per identifier.
/// Definitions without an identifier pass through and fail individually
/// during processing.
fn unique_definitions(definitions: Vec<ItemDefinition>) -> Vec<ItemDefinition> {
    let mut seen = HashSet::new();
    definitions
        .into_iter()
        .map(|mut d| {
            let trimmed = d.md5.trim();
            if trimmed.len() != d.md5.len() {
                d.md5 = trimmed.to_string();
            }
            d
        })
        .filter(|d| match d.identifier() {
            Some(id) if !seen.insert(id.to_string()) => {
                tracing::warn!(identifier = id, "duplicate identifier, skipping");
                false
            }
            _ => true,
        })
        .collect()
}
