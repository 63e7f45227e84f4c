//! In-process [`IndexStore`]. Nearest-neighbor search is brute-force cosine
//! similarity over the embedded entries of one snapshot.

use super::{cosine_similarity, rank_order};
use crate::error::StoreError;
use crate::models::{IndexEntry, ScoredChunk, SnapshotId};
use crate::traits::IndexStore;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct SnapshotEntries {
    entries: HashMap<String, IndexEntry>,
    dimensions: Option<usize>,
    complete: bool,
    suggestions: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryIndexStore {
    snapshots: RwLock<HashMap<SnapshotId, SnapshotEntries>>,
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_entry(&self, snapshot_id: &SnapshotId, chunk_id: &str) -> Option<IndexEntry> {
        let snapshots = self.snapshots.read().await;
        snapshots
            .get(snapshot_id)
            .and_then(|snapshot| snapshot.entries.get(chunk_id))
            .cloned()
    }
}

#[async_trait]
impl IndexStore for InMemoryIndexStore {
    async fn upsert_entries(
        &self,
        snapshot_id: &SnapshotId,
        entries: &[IndexEntry],
    ) -> Result<(), StoreError> {
        let mut snapshots = self.snapshots.write().await;

        // A rejected batch leaves neither entries nor a dimension behind.
        let mut dimensions = snapshots.get(snapshot_id).and_then(|snapshot| snapshot.dimensions);
        for entry in entries {
            if let Some(vector) = &entry.embedding {
                let expected = *dimensions.get_or_insert(vector.len());
                if vector.len() != expected {
                    return Err(StoreError::DimensionMismatch {
                        expected,
                        actual: vector.len(),
                    });
                }
            }
        }

        let snapshot = snapshots.entry(snapshot_id.clone()).or_default();
        snapshot.dimensions = dimensions;
        for entry in entries {
            let mut stored = entry.clone();
            stored.snapshot_id = snapshot_id.clone();
            snapshot.entries.insert(entry.chunk.chunk_id.clone(), stored);
        }
        Ok(())
    }

    async fn mark_complete(&self, snapshot_id: &SnapshotId) -> Result<(), StoreError> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.entry(snapshot_id.clone()).or_default().complete = true;
        Ok(())
    }

    async fn is_complete(&self, snapshot_id: &SnapshotId) -> Result<bool, StoreError> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .get(snapshot_id)
            .is_some_and(|snapshot| snapshot.complete))
    }

    async fn save_suggestions(
        &self,
        snapshot_id: &SnapshotId,
        suggestions: &[String],
    ) -> Result<(), StoreError> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.entry(snapshot_id.clone()).or_default().suggestions = suggestions.to_vec();
        Ok(())
    }

    async fn load_suggestions(&self, snapshot_id: &SnapshotId) -> Result<Vec<String>, StoreError> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .get(snapshot_id)
            .map(|snapshot| snapshot.suggestions.clone())
            .unwrap_or_default())
    }

    async fn nearest(
        &self,
        snapshot_id: &SnapshotId,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let snapshots = self.snapshots.read().await;
        let Some(snapshot) = snapshots.get(snapshot_id) else {
            return Ok(Vec::new());
        };

        if let Some(expected) = snapshot.dimensions {
            if query_vector.len() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: query_vector.len(),
                });
            }
        }

        let mut scored: Vec<ScoredChunk> = snapshot
            .entries
            .values()
            .filter_map(|entry| {
                let vector = entry.embedding.as_ref()?;
                Some(ScoredChunk {
                    chunk: entry.chunk.clone(),
                    score: cosine_similarity(query_vector, vector),
                })
            })
            .collect();

        scored.sort_by(rank_order);
        scored.truncate(k);
        Ok(scored)
    }

    async fn delete_snapshot(&self, snapshot_id: &SnapshotId) -> Result<(), StoreError> {
        self.snapshots.write().await.remove(snapshot_id);
        Ok(())
    }

    async fn entry_count(&self, snapshot_id: &SnapshotId) -> Result<usize, StoreError> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .get(snapshot_id)
            .map_or(0, |snapshot| snapshot.entries.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkKind, ChunkParent};

    fn entry(path: &str, kind: ChunkKind, ordinal: u32, embedding: Option<Vec<f32>>) -> IndexEntry {
        let parent = ChunkParent::File(path.to_string());
        let start = ordinal as usize * 10;
        IndexEntry {
            snapshot_id: SnapshotId::new("snap"),
            chunk: Chunk {
                chunk_id: Chunk::make_id(&parent, kind, start),
                parent,
                kind,
                ordinal,
                start,
                end: start + 10,
                text: format!("{path}#{ordinal}"),
            },
            embedding,
            summary: None,
        }
    }

    #[tokio::test]
    async fn nearest_orders_by_score_and_skips_missing_embeddings() -> Result<(), StoreError> {
        let store = InMemoryIndexStore::new();
        let snapshot = SnapshotId::new("snap");
        store
            .upsert_entries(
                &snapshot,
                &[
                    entry("a.rs", ChunkKind::Code, 0, Some(vec![0.0, 1.0])),
                    entry("a.rs", ChunkKind::Code, 1, Some(vec![1.0, 0.0])),
                    entry("b.rs", ChunkKind::Code, 0, Some(vec![0.7, 0.7])),
                    entry("c.rs", ChunkKind::Code, 0, None),
                ],
            )
            .await?;

        let hits = store.nearest(&snapshot, &[1.0, 0.0], 10).await?;
        let texts: Vec<&str> = hits.iter().map(|hit| hit.chunk.text.as_str()).collect();

        assert_eq!(texts, vec!["a.rs#1", "b.rs#0", "a.rs#0"]);
        assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
        Ok(())
    }

    #[tokio::test]
    async fn ties_prefer_low_ordinal_then_code() -> Result<(), StoreError> {
        let store = InMemoryIndexStore::new();
        let snapshot = SnapshotId::new("snap");
        store
            .upsert_entries(
                &snapshot,
                &[
                    entry("a.rs", ChunkKind::RepoSummary, 0, Some(vec![1.0, 0.0])),
                    entry("a.rs", ChunkKind::Code, 1, Some(vec![1.0, 0.0])),
                    entry("a.rs", ChunkKind::FileSummary, 0, Some(vec![1.0, 0.0])),
                    entry("b.rs", ChunkKind::Code, 0, Some(vec![1.0, 0.0])),
                ],
            )
            .await?;

        let hits = store.nearest(&snapshot, &[1.0, 0.0], 10).await?;
        let order: Vec<(u32, ChunkKind)> = hits.iter().map(|hit| (hit.chunk.ordinal, hit.chunk.kind)).collect();

        assert_eq!(
            order,
            vec![
                (0, ChunkKind::Code),
                (0, ChunkKind::FileSummary),
                (0, ChunkKind::RepoSummary),
                (1, ChunkKind::Code),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_snapshots_are_isolated() -> Result<(), StoreError> {
        let store = InMemoryIndexStore::new();
        let first = SnapshotId::new("first");
        let second = SnapshotId::new("second");
        let item = entry("a.rs", ChunkKind::Code, 0, Some(vec![1.0]));

        store.upsert_entries(&first, &[item.clone()]).await?;
        store.upsert_entries(&first, &[item.clone()]).await?;
        store.upsert_entries(&second, &[item]).await?;
        store.mark_complete(&first).await?;

        assert_eq!(store.entry_count(&first).await?, 1);
        assert!(store.is_complete(&first).await?);
        assert!(!store.is_complete(&second).await?);

        store.delete_snapshot(&first).await?;
        assert_eq!(store.entry_count(&first).await?, 0);
        assert!(!store.is_complete(&first).await?);
        assert_eq!(store.nearest(&second, &[1.0], 5).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn mixed_dimensions_are_rejected() {
        let store = InMemoryIndexStore::new();
        let snapshot = SnapshotId::new("snap");
        let result = store
            .upsert_entries(
                &snapshot,
                &[
                    entry("a.rs", ChunkKind::Code, 0, Some(vec![1.0, 0.0])),
                    entry("a.rs", ChunkKind::Code, 1, Some(vec![1.0])),
                ],
            )
            .await;

        assert!(matches!(
            result,
            Err(StoreError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[tokio::test]
    async fn rejected_first_batch_does_not_fix_the_dimension() -> Result<(), StoreError> {
        let store = InMemoryIndexStore::new();
        let snapshot = SnapshotId::new("snap");
        let rejected = store
            .upsert_entries(
                &snapshot,
                &[
                    entry("a.rs", ChunkKind::Code, 0, Some(vec![1.0, 0.0])),
                    entry("a.rs", ChunkKind::Code, 1, Some(vec![1.0])),
                ],
            )
            .await;
        assert!(rejected.is_err());
        assert_eq!(store.entry_count(&snapshot).await?, 0);

        store
            .upsert_entries(&snapshot, &[entry("b.rs", ChunkKind::Code, 0, Some(vec![1.0, 0.0, 0.0]))])
            .await?;
        assert_eq!(store.entry_count(&snapshot).await?, 1);
        assert_eq!(store.nearest(&snapshot, &[1.0, 0.0, 0.0], 5).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn suggestions_live_and_die_with_the_snapshot() -> Result<(), StoreError> {
        let store = InMemoryIndexStore::new();
        let snapshot = SnapshotId::new("snap");
        let questions = vec!["Where is main?".to_string(), "How is it tested?".to_string()];

        assert!(store.load_suggestions(&snapshot).await?.is_empty());
        store.mark_complete(&snapshot).await?;
        store.save_suggestions(&snapshot, &questions).await?;
        assert_eq!(store.load_suggestions(&snapshot).await?, questions);

        store.delete_snapshot(&snapshot).await?;
        assert!(store.load_suggestions(&snapshot).await?.is_empty());
        Ok(())
    }
}
