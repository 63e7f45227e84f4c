pub mod chunking;
pub mod clients;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod retrieval;
pub mod retry;
pub mod stores;
pub mod suggestions;
pub mod summarize;
pub mod traits;

pub use chunking::{chunk_text, BoundaryHint, ChunkOutcome, ChunkingConfig, SkipReason};
pub use clients::{parse_github_url, GeminiClient, GitHubFetcher};
pub use config::{Config, IndexingConfig, ModelsConfig};
pub use embeddings::{CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{FetchError, IndexError, ModelError, StoreError};
pub use ingest::LocalFetcher;
pub use models::{
    ChatMessage, ChatRole, ChatSession, Chunk, ChunkKind, ChunkParent, FileProgress, IndexEntry,
    IndexingState, IndexingStatus, RepositoryTree, ScoredChunk, SnapshotDescriptor, SnapshotId,
    SourceFile, Summary, SummaryScope,
};
pub use orchestrator::IndexingOrchestrator;
pub use retrieval::{Citation, RetrievalAssembler, RetrievalConfig, RetrievedContext};
pub use retry::CallPolicy;
pub use stores::{InMemoryIndexStore, QdrantIndexStore};
pub use suggestions::SuggestionGenerator;
pub use summarize::{FileSummarizer, RepoSynthesizer, RepositoryMetadata, Synthesis};
pub use traits::{IndexStore, RepositoryFetcher, TextEmbedder, TextGenerator};
