use crate::embeddings::Embedder;
use crate::error::{IndexError, Result};
use crate::models::{ChunkKind, ScoredChunk, SnapshotId};
use crate::traits::{IndexStore, TextEmbedder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates fetched before budget trimming.
    pub top_k: usize,
    /// Upper bound on the assembled context, in chars.
    pub budget_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 20,
            budget_chars: 12_000,
        }
    }
}

/// Provenance of one chunk included in an assembled context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub chunk_id: String,
    pub parent: String,
    pub ordinal: u32,
    pub kind: ChunkKind,
    pub score: f32,
}

impl From<&ScoredChunk> for Citation {
    fn from(hit: &ScoredChunk) -> Self {
        Self {
            chunk_id: hit.chunk.chunk_id.clone(),
            parent: hit.chunk.parent.to_string(),
            ordinal: hit.chunk.ordinal,
            kind: hit.chunk.kind,
            score: hit.score,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedContext {
    pub snapshot_id: SnapshotId,
    pub assembled_context: String,
    pub citations: Vec<Citation>,
    pub cited_chunks: Vec<ScoredChunk>,
    /// False while the snapshot has no completion marker; results are then best-effort.
    pub index_complete: bool,
}

fn render_block(hit: &ScoredChunk) -> String {
    format!(
        "--- {} (chunk {}, {}) ---\n{}\n\n",
        hit.chunk.parent,
        hit.chunk.ordinal,
        hit.chunk.kind.as_str(),
        hit.chunk.text
    )
}

/// Packs whole chunks in the given order until the next one would overflow
/// `budget_chars`. The first chunk is always included.
pub fn assemble_context(hits: &[ScoredChunk], budget_chars: usize) -> (String, Vec<ScoredChunk>) {
    let mut context = String::new();
    let mut used_chars = 0usize;
    let mut included = Vec::new();

    for hit in hits {
        let block = render_block(hit);
        let cost = block.chars().count();
        if !included.is_empty() && used_chars + cost > budget_chars {
            break;
        }
        context.push_str(&block);
        used_chars += cost;
        included.push(hit.clone());
    }

    (context, included)
}

pub struct RetrievalAssembler<E, S> {
    embedder: Arc<Embedder<E>>,
    store: Arc<S>,
    config: RetrievalConfig,
}

impl<E, S> RetrievalAssembler<E, S>
where
    E: TextEmbedder + Send + Sync,
    S: IndexStore + Send + Sync,
{
    pub fn new(embedder: Arc<Embedder<E>>, store: Arc<S>, config: RetrievalConfig) -> Self {
        Self {
            embedder,
            store,
            config,
        }
    }

    pub async fn retrieve(&self, snapshot_id: &SnapshotId, query: &str) -> Result<RetrievedContext> {
        self.retrieve_with_budget(snapshot_id, query, self.config.budget_chars)
            .await
    }

    pub async fn retrieve_with_budget(
        &self,
        snapshot_id: &SnapshotId,
        query: &str,
        budget_chars: usize,
    ) -> Result<RetrievedContext> {
        let query = query.trim();
        if query.is_empty() {
            return Err(IndexError::EmptyQuery);
        }

        let query_vector = self.embedder.embed(query).await?;
        let hits = self
            .store
            .nearest(snapshot_id, &query_vector, self.config.top_k)
            .await?;
        let index_complete = self.store.is_complete(snapshot_id).await?;

        let (assembled_context, cited_chunks) = assemble_context(&hits, budget_chars);
        tracing::debug!(
            snapshot_id = %snapshot_id,
            candidates = hits.len(),
            included = cited_chunks.len(),
            chars = assembled_context.chars().count(),
            index_complete,
            "assembled retrieval context"
        );

        Ok(RetrievedContext {
            snapshot_id: snapshot_id.clone(),
            assembled_context,
            citations: cited_chunks.iter().map(Citation::from).collect(),
            cited_chunks,
            index_complete,
        })
    }
}
