//! Drives one processing request end to end.
//!
//! Per request: request-level checks, per-item validation, memory-bounded
//! batching, concurrent transform within each batch, upload, and a single
//! ledger append. Flushing a session to the metadata store is a separate
//! step so several requests can accumulate into one session first.

use anyhow::Context;
use rayon::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config_file::PipelineConfig;
use crate::error::{PersistenceError, ProcessingError, RunError};
use crate::image_processing::{
    encode, partition_or_chunk, ByteSized, ImageMetadata, ImageTransformPipeline,
    ProcessingOptions, SourceItem, TransformResult,
};
use crate::ledger::SessionResultLedger;
use crate::storage::{DownloadLink, ImageRecord, MetadataStore, ObjectStore, SessionPaths};
use crate::utils;

/// Item tagged with its submission position and reserved output name
struct Indexed {
    index: usize,
    name: String,
    item: SourceItem,
}

impl ByteSized for Indexed {
    fn byte_size(&self) -> u64 {
        self.item.byte_size()
    }

    fn actual_size(&self) -> u64 {
        self.item.actual_size()
    }
}

pub struct BatchOrchestrator {
    config: PipelineConfig,
    pipeline: Arc<ImageTransformPipeline>,
    store: Arc<dyn ObjectStore>,
    ledger: Arc<SessionResultLedger>,
    paths: SessionPaths,
    pool: rayon::ThreadPool,
}

impl BatchOrchestrator {
    pub fn new(
        config: PipelineConfig,
        pipeline: Arc<ImageTransformPipeline>,
        store: Arc<dyn ObjectStore>,
        ledger: Arc<SessionResultLedger>,
    ) -> anyhow::Result<Self> {
        let threads = if config.parallel_jobs == 0 {
            num_cpus::get()
        } else {
            config.parallel_jobs
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("transform-{}", i))
            .build()
            .context("Failed to initialize thread pool")?;

        let env = config.storage_env();
        info!(threads, env = env.prefix(), "Orchestrator ready");

        Ok(Self {
            config,
            pipeline,
            store,
            ledger,
            paths: SessionPaths::new(env),
            pool,
        })
    }

    pub fn ledger(&self) -> &Arc<SessionResultLedger> {
        &self.ledger
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    pub fn run(
        &self,
        session_id: &str,
        items: Vec<SourceItem>,
        options: &ProcessingOptions,
    ) -> Result<Vec<TransformResult>, RunError> {
        self.run_with_progress(session_id, items, options, |_| {})
    }

    /// Process a request, calling `progress` once per item as it finishes.
    ///
    /// Returns one result per submitted item, in submission order. Per-item
    /// failures are error results; only request-level problems are `Err`.
    pub fn run_with_progress<F>(
        &self,
        session_id: &str,
        items: Vec<SourceItem>,
        options: &ProcessingOptions,
        progress: F,
    ) -> Result<Vec<TransformResult>, RunError>
    where
        F: Fn(&TransformResult) + Send + Sync,
    {
        if session_id.trim().is_empty() {
            return Err(RunError::EmptySessionId);
        }
        if items.len() > self.config.max_files {
            return Err(RunError::TooManyItems {
                count: items.len(),
                max: self.config.max_files,
            });
        }

        self.ledger.evict_expired();

        let start = Instant::now();
        let total = items.len();
        let mut results: Vec<(usize, TransformResult)> = Vec::with_capacity(total);
        let mut valid = Vec::with_capacity(total);

        // Invalid options fail every item the same way
        let options_error = options.validate(&self.config.limits).err().map(|e| e.to_string());

        for (index, item) in items.into_iter().enumerate() {
            let checked = match &options_error {
                Some(message) => Err(ProcessingError::Validation(message.clone())),
                None => self.precheck(&item),
            };
            match checked {
                Ok(metadata) => {
                    // Names are claimed in submission order so renames are deterministic
                    let format = self.pipeline.output_format(options, metadata.format);
                    let name = self.ledger.reserve_name(
                        session_id,
                        &utils::processed_file_name(&item.filename, encode::extension_for(format)),
                    );
                    valid.push(Indexed { index, name, item });
                }
                Err(e) => {
                    warn!(session = session_id, file = %item.filename, "Rejected: {}", e);
                    let result = TransformResult::failed(session_id, &item.filename, &e);
                    progress(&result);
                    results.push((index, result));
                }
            }
        }

        let batches = partition_or_chunk(
            valid,
            self.config.batch_capacity_bytes,
            self.config.fallback_chunk_size,
        );
        debug!(session = session_id, batches = batches.len(), "Partitioned request");

        for (batch_index, batch) in batches.into_iter().enumerate() {
            info!(
                session = session_id,
                batch = batch_index,
                items = batch.len(),
                bytes = batch.total_bytes(),
                "Processing batch"
            );

            let batch_results: Vec<(usize, TransformResult)> = self.pool.install(|| {
                batch
                    .items()
                    .par_iter()
                    .map(|entry| {
                        let result = self.process_item(session_id, &entry.name, &entry.item, options);
                        progress(&result);
                        (entry.index, result)
                    })
                    .collect()
            });
            results.extend(batch_results);
            // The batch (and its source bytes) is dropped here, before the next one
        }

        results.sort_by_key(|(index, _)| *index);
        let results: Vec<TransformResult> = results.into_iter().map(|(_, r)| r).collect();

        self.ledger.append(session_id, results.clone());

        let completed = results.iter().filter(|r| r.is_completed()).count();
        info!(
            session = session_id,
            total,
            completed,
            failed = total - completed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Request finished"
        );

        Ok(results)
    }

    /// Checks that need no pixel decoding, then a header read
    fn precheck(&self, item: &SourceItem) -> Result<ImageMetadata, ProcessingError> {
        if !self.config.is_mime_allowed(&item.mime_type) {
            return Err(ProcessingError::Validation(format!(
                "Unsupported file type: {}",
                item.mime_type
            )));
        }
        if item.bytes.is_empty() || item.byte_size == 0 {
            return Err(ProcessingError::Validation("File is empty".to_string()));
        }
        let size = item.byte_size.max(item.actual_size());
        if size > self.config.max_item_bytes {
            return Err(ProcessingError::Validation(format!(
                "File too large: {} bytes (max {})",
                size, self.config.max_item_bytes
            )));
        }

        self.pipeline.read_metadata(&item.bytes)
    }

    fn process_item(
        &self,
        session_id: &str,
        name: &str,
        item: &SourceItem,
        options: &ProcessingOptions,
    ) -> TransformResult {
        match self.transform_and_store(session_id, name, item, options) {
            Ok(key) => {
                debug!(session = session_id, file = %item.filename, key = %key, "Stored");
                TransformResult::completed(session_id, &item.filename, key, name.to_string())
            }
            Err(e) => {
                warn!(session = session_id, file = %item.filename, "Failed: {}", e);
                TransformResult::failed(session_id, &item.filename, &e)
            }
        }
    }

    fn transform_and_store(
        &self,
        session_id: &str,
        name: &str,
        item: &SourceItem,
        options: &ProcessingOptions,
    ) -> Result<String, ProcessingError> {
        let encoded = self.pipeline.transform(&item.bytes, options)?;

        let key = self.paths.processed_key(session_id, name);
        self.store.put(&key, &encoded.bytes, encoded.mime_type())?;

        Ok(key)
    }

    /// Persist a session's results and remove them from the ledger.
    ///
    /// Results appended while the insert runs stay for the next flush. On
    /// failure the taken results go back in front so the flush can be retried.
    pub fn flush_session(
        &self,
        session_id: &str,
        metadata: &dyn MetadataStore,
    ) -> Result<usize, PersistenceError> {
        let results = self.ledger.take(session_id);
        if results.is_empty() {
            debug!(session = session_id, "Nothing to flush");
            return Ok(0);
        }

        let records: Vec<ImageRecord> = results.iter().map(ImageRecord::from).collect();
        if let Err(source) = metadata.insert_many(&records) {
            self.ledger.restore(session_id, results);
            return Err(PersistenceError::Insert {
                session_id: session_id.to_string(),
                count: records.len(),
                source,
            });
        }

        info!(session = session_id, count = records.len(), "Flushed session results");
        Ok(records.len())
    }

    /// Signed download URLs for a session's completed results.
    ///
    /// Results whose URL cannot be signed are skipped with a warning.
    pub fn download_links(&self, session_id: &str, ttl: Duration) -> Vec<DownloadLink> {
        self.ledger
            .read(session_id)
            .iter()
            .filter(|r| r.is_completed())
            .filter_map(|r| {
                let key = r.processed_key.as_deref()?;
                let name = r.processed_name.clone().unwrap_or_else(|| r.original_name.clone());
                match self.store.signed_url(key, ttl) {
                    Ok(url) => Some(DownloadLink { url, name }),
                    Err(e) => {
                        warn!(session = session_id, key, "Cannot sign download URL: {}", e);
                        None
                    }
                }
            })
            .collect()
    }
}
