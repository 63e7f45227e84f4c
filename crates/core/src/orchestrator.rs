use crate::chunking::{chunk_text, ChunkOutcome};
use crate::config::Config;
use crate::embeddings::Embedder;
use crate::error::{IndexError, Result};
use crate::ingest::primary_languages;
use crate::models::{
    ChatSession, Chunk, ChunkKind, ChunkParent, IndexEntry, IndexingState, IndexingStatus,
    RepositoryTree, SnapshotDescriptor, SnapshotId, SourceFile, Summary,
};
use crate::retrieval::{RetrievalAssembler, RetrievedContext};
use crate::suggestions::SuggestionGenerator;
use crate::summarize::{FileSummarizer, FileSummaryInput, RepoSynthesizer, RepositoryMetadata};
use crate::traits::{IndexStore, RepositoryFetcher, TextEmbedder, TextGenerator};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

const PRIMARY_LANGUAGE_LIMIT: usize = 3;

struct SnapshotRecord {
    snapshot_id: SnapshotId,
    descriptor: SnapshotDescriptor,
    status: Mutex<IndexingStatus>,
    state_tx: watch::Sender<IndexingState>,
    suggestions: RwLock<Vec<String>>,
    cancelled: AtomicBool,
    run: Mutex<Option<JoinHandle<()>>>,
}

impl SnapshotRecord {
    fn new(snapshot_id: SnapshotId, descriptor: SnapshotDescriptor) -> Self {
        let (state_tx, _) = watch::channel(IndexingState::Pending);
        Self {
            status: Mutex::new(IndexingStatus {
                snapshot_id: snapshot_id.clone(),
                state: IndexingState::Pending,
                progress: Default::default(),
                failure_count: 0,
                synthesis_failed: false,
                tree_truncated: false,
                cancelled: false,
                index_complete: false,
                errors: Vec::new(),
            }),
            snapshot_id,
            descriptor,
            state_tx,
            suggestions: RwLock::new(Vec::new()),
            cancelled: AtomicBool::new(false),
            run: Mutex::new(None),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Moves forward only; terminal states are final.
    async fn advance(&self, next: IndexingState) {
        let mut status = self.status.lock().await;
        if status.state.is_terminal() || next <= status.state {
            return;
        }
        tracing::info!(
            snapshot_id = %self.snapshot_id,
            from = %status.state,
            to = %next,
            "indexing state changed"
        );
        status.state = next;
        self.state_tx.send_replace(next);
    }

    async fn update(&self, apply: impl FnOnce(&mut IndexingStatus)) {
        let mut status = self.status.lock().await;
        apply(&mut status);
    }

    async fn fail(&self, reason: String) {
        tracing::warn!(snapshot_id = %self.snapshot_id, reason = %reason, "indexing failed");
        self.update(|status| status.errors.push(reason)).await;
        self.advance(IndexingState::Failed).await;
    }

    async fn snapshot(&self) -> IndexingStatus {
        let mut status = self.status.lock().await.clone();
        status.failure_count = status.unit_failures();
        status
    }
}

#[derive(Default)]
struct Registry {
    records: HashMap<SnapshotId, Arc<SnapshotRecord>>,
    by_identity: HashMap<String, SnapshotId>,
    generations: HashMap<String, u32>,
}

impl Registry {
    /// The live snapshot for an identity. Failed snapshots are indexed again.
    fn reusable(&self, key: &str) -> Option<SnapshotId> {
        let existing = self.by_identity.get(key)?;
        let record = self.records.get(existing)?;
        let state = *record.state_tx.borrow();
        (state != IndexingState::Failed).then(|| existing.clone())
    }

    fn next_generation(&self, key: &str) -> u32 {
        self.generations.get(key).copied().unwrap_or(0) + 1
    }
}

struct FileOutcome {
    index: usize,
    path: String,
    size: usize,
    chunked: bool,
    summary: Option<String>,
}

/// Drives snapshots through fetch, per-file chains, the synthesis barrier and
/// finalization, and serves status, suggestions and retrieval for them.
pub struct IndexingOrchestrator<F, G, E, S> {
    fetcher: Arc<F>,
    store: Arc<S>,
    embedder: Arc<Embedder<E>>,
    summarizer: FileSummarizer<G>,
    synthesizer: RepoSynthesizer<G>,
    suggester: SuggestionGenerator<G>,
    retriever: RetrievalAssembler<E, S>,
    config: Config,
    registry: RwLock<Registry>,
}

impl<F, G, E, S> IndexingOrchestrator<F, G, E, S>
where
    F: RepositoryFetcher + Send + Sync + 'static,
    G: TextGenerator + Send + Sync + 'static,
    E: TextEmbedder + Send + Sync + 'static,
    S: IndexStore + Send + Sync + 'static,
{
    pub fn new(
        fetcher: Arc<F>,
        generator: Arc<G>,
        embedding_backend: Arc<E>,
        store: Arc<S>,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;
        let policy = config.calls;
        let embedder = Arc::new(Embedder::new(
            embedding_backend,
            config.models.embedding_model.clone(),
            policy,
        ));

        Ok(Self {
            summarizer: FileSummarizer::new(generator.clone(), config.models.summary_settings(policy)),
            synthesizer: RepoSynthesizer::new(generator.clone(), config.models.synthesis_settings(policy)),
            suggester: SuggestionGenerator::new(
                generator,
                config.models.suggestion_settings(policy),
                config.indexing.suggestion_count,
            ),
            retriever: RetrievalAssembler::new(embedder.clone(), store.clone(), config.retrieval),
            fetcher,
            store,
            embedder,
            config,
            registry: RwLock::new(Registry::default()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the id of the snapshot for this descriptor. An identical descriptor
    /// whose snapshot is complete, degraded or still running is not indexed again.
    pub async fn start_indexing(self: &Arc<Self>, descriptor: SnapshotDescriptor) -> Result<SnapshotId> {
        let (snapshot_id, fresh) = self.register(descriptor, false).await?;
        if let Some(record) = fresh {
            self.spawn_run(record).await;
        }
        Ok(snapshot_id)
    }

    /// Full re-index: always a new generation. The previous snapshot stays until deleted.
    pub async fn reindex(self: &Arc<Self>, descriptor: SnapshotDescriptor) -> Result<SnapshotId> {
        let (snapshot_id, fresh) = self.register(descriptor, true).await?;
        if let Some(record) = fresh {
            self.spawn_run(record).await;
        }
        Ok(snapshot_id)
    }

    /// `start_indexing` followed by waiting for a terminal state.
    pub async fn run_indexing(self: &Arc<Self>, descriptor: SnapshotDescriptor) -> Result<IndexingStatus> {
        let snapshot_id = self.start_indexing(descriptor).await?;
        self.wait_for_terminal(&snapshot_id).await
    }

    pub async fn wait_for_terminal(&self, snapshot_id: &SnapshotId) -> Result<IndexingStatus> {
        let record = self.lookup(snapshot_id).await?;
        let mut states = record.state_tx.subscribe();
        states
            .wait_for(|state| state.is_terminal())
            .await
            .map_err(|_| IndexError::UnknownSnapshot(snapshot_id.to_string()))?;
        Ok(record.snapshot().await)
    }

    pub async fn get_indexing_status(&self, snapshot_id: &SnapshotId) -> Result<IndexingStatus> {
        let record = self.lookup(snapshot_id).await?;
        Ok(record.snapshot().await)
    }

    pub async fn get_suggestions(&self, snapshot_id: &SnapshotId) -> Result<Vec<String>> {
        let record = self.lookup(snapshot_id).await?;
        let suggestions = record.suggestions.read().await.clone();
        Ok(suggestions)
    }

    pub async fn answer_query(&self, snapshot_id: &SnapshotId, query: &str) -> Result<RetrievedContext> {
        self.lookup(snapshot_id).await?;
        self.retriever.retrieve(snapshot_id, query).await
    }

    /// In-flight model calls finish; no further per-file chains start.
    pub async fn cancel(&self, snapshot_id: &SnapshotId) -> Result<()> {
        let record = self.lookup(snapshot_id).await?;
        record.cancelled.store(true, Ordering::SeqCst);
        record.update(|status| status.cancelled = true).await;
        tracing::info!(snapshot_id = %snapshot_id, "cancellation requested");
        Ok(())
    }

    pub async fn delete_snapshot(&self, snapshot_id: &SnapshotId) -> Result<()> {
        let record = {
            let mut registry = self.registry.write().await;
            let record = registry
                .records
                .remove(snapshot_id)
                .ok_or_else(|| IndexError::UnknownSnapshot(snapshot_id.to_string()))?;
            registry.by_identity.retain(|_, id| id != snapshot_id);
            record
        };

        record.cancelled.store(true, Ordering::SeqCst);
        record.update(|status| status.cancelled = true).await;

        // Chains already running still upsert; the cascade must come after them.
        let run = record.run.lock().await.take();
        if let Some(run) = run {
            if let Err(error) = run.await {
                tracing::warn!(snapshot_id = %snapshot_id, error = %error, "indexing run aborted");
            }
        }
        self.store.delete_snapshot(snapshot_id).await?;
        tracing::info!(snapshot_id = %snapshot_id, "snapshot deleted");
        Ok(())
    }

    pub async fn open_session(&self, snapshot_id: &SnapshotId) -> Result<ChatSession> {
        let record = self.lookup(snapshot_id).await?;
        let state = record.status.lock().await.state;
        if !matches!(state, IndexingState::Complete | IndexingState::Degraded) {
            return Err(IndexError::NotReady {
                snapshot_id: snapshot_id.to_string(),
                state,
            });
        }

        let suggestions = record.suggestions.read().await.clone();
        Ok(ChatSession::new(snapshot_id.clone(), suggestions))
    }

    async fn lookup(&self, snapshot_id: &SnapshotId) -> Result<Arc<SnapshotRecord>> {
        let registry = self.registry.read().await;
        registry
            .records
            .get(snapshot_id)
            .cloned()
            .ok_or_else(|| IndexError::UnknownSnapshot(snapshot_id.to_string()))
    }

    async fn resolve_fingerprint(&self, descriptor: SnapshotDescriptor) -> Result<SnapshotDescriptor> {
        if !descriptor.fingerprint.trim().is_empty() {
            return Ok(descriptor);
        }
        let fingerprint = self
            .fetcher
            .resolve_fingerprint(&descriptor.url, descriptor.auth_token.as_deref())
            .await?;
        Ok(SnapshotDescriptor {
            fingerprint,
            ..descriptor
        })
    }

    async fn register(
        &self,
        descriptor: SnapshotDescriptor,
        force_new: bool,
    ) -> Result<(SnapshotId, Option<Arc<SnapshotRecord>>)> {
        let descriptor = self.resolve_fingerprint(descriptor).await?;
        let key = descriptor.identity_key();

        let generation = {
            let registry = self.registry.read().await;
            if let Some(existing) = registry.reusable(&key).filter(|_| !force_new) {
                tracing::info!(snapshot_id = %existing, "reusing snapshot");
                return Ok((existing, None));
            }
            registry.next_generation(&key)
        };

        // A store that outlives this process may already hold the first generation.
        // Nothing is recorded until this check has succeeded.
        let mut persisted = !force_new
            && generation == 1
            && self
                .store
                .is_complete(&SnapshotId::for_generation(&descriptor, generation))
                .await?;

        let mut registry = self.registry.write().await;
        if let Some(existing) = registry.reusable(&key).filter(|_| !force_new) {
            tracing::info!(snapshot_id = %existing, "reusing snapshot");
            return Ok((existing, None));
        }
        let current = registry.next_generation(&key);
        if current != generation {
            persisted = false;
        }

        registry.generations.insert(key.clone(), current);
        let snapshot_id = SnapshotId::for_generation(&descriptor, current);
        let record = Arc::new(SnapshotRecord::new(snapshot_id.clone(), descriptor));
        registry.records.insert(snapshot_id.clone(), record.clone());
        registry.by_identity.insert(key, snapshot_id.clone());
        drop(registry);

        if persisted {
            self.restore(&record).await;
            return Ok((snapshot_id, None));
        }
        Ok((snapshot_id, Some(record)))
    }

    /// Brings back a snapshot another process completed. Progress counters are not
    /// persisted and stay at zero; suggestions come back from the store.
    async fn restore(&self, record: &SnapshotRecord) {
        let suggestions = match self.store.load_suggestions(&record.snapshot_id).await {
            Ok(suggestions) => suggestions,
            Err(error) => {
                tracing::warn!(snapshot_id = %record.snapshot_id, error = %error, "stored suggestions unavailable");
                Vec::new()
            }
        };
        tracing::info!(
            snapshot_id = %record.snapshot_id,
            suggestions = suggestions.len(),
            "snapshot already complete in store"
        );

        *record.suggestions.write().await = suggestions;
        record.update(|status| status.index_complete = true).await;
        record.advance(IndexingState::Complete).await;
    }

    async fn spawn_run(self: &Arc<Self>, record: Arc<SnapshotRecord>) {
        let orchestrator = Arc::clone(self);
        let run = tokio::spawn({
            let record = Arc::clone(&record);
            async move { orchestrator.run(record).await }
        });
        *record.run.lock().await = Some(run);
    }

    async fn run(self: Arc<Self>, record: Arc<SnapshotRecord>) {
        let snapshot_id = record.snapshot_id.clone();
        let descriptor = record.descriptor.clone();

        record.advance(IndexingState::Fetching).await;
        let tree = match self
            .fetcher
            .fetch_repository_tree(&descriptor.url, descriptor.auth_token.as_deref())
            .await
        {
            Ok(tree) => tree,
            Err(error) => {
                record.fail(format!("fetch failed: {error}")).await;
                return;
            }
        };
        if tree.is_partial() {
            tracing::warn!(
                snapshot_id = %snapshot_id,
                unreadable = tree.unreadable.len(),
                truncated = tree.truncated,
                "repository fetched partially"
            );
        }
        let RepositoryTree {
            mut files,
            unreadable,
            truncated,
        } = tree;

        record.advance(IndexingState::Chunking).await;
        let files_total = files.len();
        let cap = self.config.indexing.max_files;
        let overflow = files_total.saturating_sub(cap);
        if overflow > 0 {
            tracing::warn!(snapshot_id = %snapshot_id, cap, overflow, "file cap reached, remaining files skipped");
            files.truncate(cap);
        }
        record
            .update(|status| {
                status.progress.files_total = files_total;
                status.progress.files_overflow = overflow;
                status.progress.files_unreadable = unreadable.len();
                status.tree_truncated = truncated;
                if truncated {
                    status.errors.push("repository listing truncated by host".to_string());
                }
                for path in unreadable {
                    status.errors.push(format!("{path}: content not readable"));
                }
            })
            .await;

        let metadata = RepositoryMetadata {
            name: descriptor.display_name(),
            file_count: files.len(),
            primary_languages: primary_languages(&files, PRIMARY_LANGUAGE_LIMIT),
        };

        record.advance(IndexingState::Summarizing).await;
        let outcomes = self.run_file_chains(&record, files).await;

        // Barrier: every per-file chain has settled past this point.
        let chunked: Vec<&FileOutcome> = outcomes.iter().filter(|outcome| outcome.chunked).collect();
        if chunked.is_empty() {
            let reason = if record.is_cancelled() {
                "cancelled before any file was indexed"
            } else {
                "no file produced any chunks"
            };
            record.fail(reason.to_string()).await;
            return;
        }
        if chunked.iter().all(|outcome| outcome.summary.is_none()) {
            record.fail("summarization failed for every file".to_string()).await;
            return;
        }

        if !record.is_cancelled() {
            record.advance(IndexingState::Synthesizing).await;
            let summaries: Vec<FileSummaryInput> = chunked
                .iter()
                .map(|outcome| FileSummaryInput {
                    path: outcome.path.clone(),
                    size: outcome.size,
                    summary: outcome.summary.clone(),
                })
                .collect();
            self.synthesize(&record, &metadata, &summaries).await;
        }

        record.advance(IndexingState::Finalizing).await;
        let degraded = {
            let status = record.status.lock().await;
            status.unit_failures() > 0 || status.cancelled
        } || record.is_cancelled();

        let final_state = if degraded {
            IndexingState::Degraded
        } else {
            match self.store.mark_complete(&snapshot_id).await {
                Ok(()) => {
                    self.persist_suggestions(&record).await;
                    IndexingState::Complete
                }
                Err(error) => {
                    record
                        .update(|status| status.errors.push(format!("completion marker not written: {error}")))
                        .await;
                    IndexingState::Degraded
                }
            }
        };

        record
            .update(|status| {
                status.cancelled = status.cancelled || record.is_cancelled();
                status.index_complete = final_state == IndexingState::Complete;
            })
            .await;
        record.advance(final_state).await;

        let status = record.snapshot().await;
        tracing::info!(
            snapshot_id = %snapshot_id,
            state = %status.state,
            failure_count = status.failure_count,
            files = status.progress.files_chunked,
            chunks = status.progress.chunks_total,
            "indexing finished"
        );
    }

    async fn run_file_chains(self: &Arc<Self>, record: &Arc<SnapshotRecord>, files: Vec<SourceFile>) -> Vec<FileOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.indexing.max_concurrency));
        let mut chains = JoinSet::new();

        for (index, file) in files.into_iter().enumerate() {
            if record.is_cancelled() {
                break;
            }
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            if record.is_cancelled() {
                break;
            }

            let orchestrator = Arc::clone(self);
            let record = Arc::clone(record);
            chains.spawn(async move {
                let outcome = orchestrator.process_file(&record, index, file).await;
                drop(permit);
                outcome
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = chains.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(error) => {
                    tracing::warn!(snapshot_id = %record.snapshot_id, error = %error, "file chain aborted");
                    record
                        .update(|status| {
                            status.progress.files_failed += 1;
                            status.errors.push(format!("file chain aborted: {error}"));
                        })
                        .await;
                }
            }
        }

        outcomes.sort_by_key(|outcome| outcome.index);
        outcomes
    }

    /// chunk → summarize → embed → upsert for one file, strictly in that order.
    async fn process_file(&self, record: &SnapshotRecord, index: usize, file: SourceFile) -> FileOutcome {
        let parent = ChunkParent::File(file.path.clone());
        let code_chunks = match chunk_text(&parent, ChunkKind::Code, &file.content, &self.config.chunking) {
            ChunkOutcome::Chunked(chunks) => chunks,
            ChunkOutcome::Skipped(reason) => {
                tracing::debug!(path = %file.path, reason = reason.as_str(), "file skipped");
                record.update(|status| status.progress.files_skipped += 1).await;
                return FileOutcome {
                    index,
                    size: file.size(),
                    path: file.path,
                    chunked: false,
                    summary: None,
                };
            }
        };
        record.update(|status| status.progress.files_chunked += 1).await;

        let summary = match self.summarizer.summarize(&file).await {
            Ok(summary) => {
                record.update(|status| status.progress.files_summarized += 1).await;
                Some(summary)
            }
            Err(error) => {
                tracing::warn!(path = %file.path, reason = %error, "summary unavailable");
                let message = format!("{}: summary unavailable ({error})", file.path);
                record
                    .update(|status| {
                        status.progress.files_failed += 1;
                        status.errors.push(message);
                    })
                    .await;
                None
            }
        };

        record.advance(IndexingState::Embedding).await;
        let mut chunks = code_chunks;
        if let Some(summary) = &summary {
            chunks.extend(
                chunk_text(&parent, ChunkKind::FileSummary, &summary.text, &self.config.chunking).into_chunks(),
            );
        }

        if self.embed_and_store(record, chunks, summary.as_ref()).await {
            record.update(|status| status.progress.files_embedded += 1).await;
        }

        FileOutcome {
            index,
            size: file.size(),
            path: file.path,
            chunked: true,
            summary: summary.map(|summary| summary.text),
        }
    }

    async fn synthesize(&self, record: &SnapshotRecord, metadata: &RepositoryMetadata, summaries: &[FileSummaryInput]) {
        let synthesis = match self.synthesizer.synthesize(metadata, summaries).await {
            Ok(synthesis) => synthesis,
            Err(error) => {
                tracing::warn!(snapshot_id = %record.snapshot_id, reason = %error, "repository synthesis failed");
                record
                    .update(|status| {
                        status.synthesis_failed = true;
                        status.errors.push(format!("synthesis failed: {error}"));
                    })
                    .await;
                return;
            }
        };

        let chunks = chunk_text(
            &ChunkParent::Synthesis,
            ChunkKind::RepoSummary,
            &synthesis.summary.text,
            &self.config.chunking,
        )
        .into_chunks();

        let (_, suggestions) = tokio::join!(
            self.embed_and_store(record, chunks, Some(&synthesis.summary)),
            self.suggester.suggest(&synthesis.summary.text)
        );
        *record.suggestions.write().await = suggestions;
    }

    async fn persist_suggestions(&self, record: &SnapshotRecord) {
        let suggestions = record.suggestions.read().await.clone();
        if suggestions.is_empty() {
            return;
        }
        if let Err(error) = self.store.save_suggestions(&record.snapshot_id, &suggestions).await {
            tracing::warn!(snapshot_id = %record.snapshot_id, error = %error, "suggestions not persisted");
        }
    }

    /// Returns true when every chunk was embedded and stored.
    async fn embed_and_store(&self, record: &SnapshotRecord, chunks: Vec<Chunk>, summary: Option<&Summary>) -> bool {
        let vectors = self.embedder.embed_chunks(&chunks).await;
        let chunk_count = chunks.len();
        let mut missing = vectors.iter().filter(|vector| vector.is_none()).count();

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| IndexEntry {
                snapshot_id: record.snapshot_id.clone(),
                summary: if chunk.kind == ChunkKind::Code {
                    None
                } else {
                    summary.cloned()
                },
                chunk,
                embedding,
            })
            .collect();

        let mut store_error = None;
        if let Err(error) = self.store.upsert_entries(&record.snapshot_id, &entries).await {
            tracing::warn!(snapshot_id = %record.snapshot_id, error = %error, "upsert failed");
            missing = entries.len();
            store_error = Some(format!("upsert failed: {error}"));
        }

        record
            .update(|status| {
                status.progress.chunks_total += chunk_count;
                status.progress.embeddings_missing += missing;
                if let Some(message) = store_error {
                    status.errors.push(message);
                }
            })
            .await;
        missing == 0
    }
}
