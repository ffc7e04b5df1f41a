//! Index manager: drives a workspace to a consistent, queryable state.
//!
//! Full indexing and refresh run in two phases. Phase A processes files
//! under bounded concurrency, each file through the delete-then-insert
//! pipeline inside one transaction; chunks whose content hash misses the
//! embedding reuse cache accumulate in a shared pending buffer. Phase B
//! starts after every Phase A task has settled and flushes that buffer
//! through the batch processor. Embedding failures are non-fatal: the index
//! stays lexically searchable and a later refresh retries.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;

use futures::StreamExt;

use crate::chunking::Chunker;
use crate::config::CodeIntelConfig;
use crate::config::index_db_path;
use crate::config::sync_cache_path;
use crate::embeddings::BatchProcessor;
use crate::embeddings::Embedder;
use crate::embeddings::EmbeddingItem;
use crate::embeddings::InputType;
use crate::error::Result;
use crate::extract::EdgeExtractor;
use crate::extract::SymbolExtractor;
use crate::git;
use crate::indexing::walker::FileWalker;
use crate::jobs::IndexJobQueue;
use crate::jobs::JobKind;
use crate::lifecycle::IndexPhase;
use crate::lifecycle::LifecycleManager;
use crate::lifecycle::LifecycleState;
use crate::search::HybridSearcher;
use crate::storage::ChunkStore;
use crate::storage::EdgeStore;
use crate::storage::FileStore;
use crate::storage::FtsStore;
use crate::storage::SqliteStore;
use crate::storage::SymbolStore;
use crate::storage::VectorStore;
use crate::storage::files::FileStats;
use crate::storage::fts::FtsRow;
use crate::sync::ChangeSet;
use crate::sync::SyncCache;
use crate::sync::file_meta;
use crate::types::Chunk;
use crate::types::ChunkType;
use crate::types::FileRecord;
use crate::types::FileStatus;
use crate::types::Granularity;
use crate::types::now_unix;

/// Progress observer: `(processed, total, phase)`.
pub type ProgressFn = Arc<dyn Fn(usize, usize, IndexPhase) + Send + Sync>;

/// Outcome of a full index or the processing part of a refresh.
#[derive(Debug, Clone, Default)]
pub struct IndexSummary {
    pub total: usize,
    pub indexed: usize,
    pub failed: usize,
    /// Vectors produced by the embedder in Phase B.
    pub embedded: usize,
    /// Vectors served from the content-hash reuse cache.
    pub reused: usize,
    /// Embedding items dropped after retries (retried on next refresh).
    pub dropped: usize,
}

/// Outcome of a refresh.
#[derive(Debug, Clone)]
pub struct RefreshSummary {
    pub changes: ChangeSet,
    pub summary: IndexSummary,
}

/// Aggregate index state for `status()`.
#[derive(Debug, Clone)]
pub struct IndexStatus {
    pub state: LifecycleState,
    pub branch: String,
    pub files: FileStats,
    pub symbol_count: i64,
    pub chunk_count: i64,
    pub vector_count: i64,
    pub last_full_index: Option<i64>,
}

enum FileOutcome {
    Indexed { reused: usize },
    Failed,
}

#[derive(Default)]
struct PhaseAStats {
    indexed: usize,
    failed: usize,
    reused: usize,
}

/// Orchestrates scan, change detection, extraction, persistence and
/// embedding for one workspace.
#[derive(Clone)]
pub struct IndexManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    workspace: PathBuf,
    config: CodeIntelConfig,
    db: Arc<SqliteStore>,
    symbols: Arc<SymbolStore>,
    chunks: Arc<ChunkStore>,
    files: Arc<FileStore>,
    fts: Arc<FtsStore>,
    vectors: Arc<VectorStore>,
    edges: Arc<EdgeStore>,
    searcher: Arc<HybridSearcher>,
    sync_cache: Mutex<SyncCache>,
    extractor: Arc<dyn SymbolExtractor>,
    edge_extractor: Mutex<Option<Arc<dyn EdgeExtractor>>>,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    batch: BatchProcessor,
    walker: FileWalker,
    lifecycle: Arc<LifecycleManager>,
    queue: IndexJobQueue,
    branch: RwLock<String>,
    /// Symbol lookup shared across one full-index/refresh run.
    symbol_map: Mutex<HashMap<String, crate::types::Symbol>>,
    /// Pending-embeddings buffer, flushed by Phase B (splice/drain).
    pending: Mutex<Vec<EmbeddingItem>>,
    progress: Mutex<Option<ProgressFn>>,
}

impl IndexManager {
    /// Open (or create) the workspace index and wire up all stores.
    ///
    /// Compares the embedder's model id to the recorded one; a mismatch
    /// wipes every vector row (symbols and chunks stay) before recording
    /// the new id.
    pub async fn initialize(
        workspace: impl Into<PathBuf>,
        config: CodeIntelConfig,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn SymbolExtractor>,
    ) -> Result<Self> {
        config.validate()?;
        let workspace = workspace.into();

        let db = Arc::new(SqliteStore::open(&index_db_path(&workspace))?);
        let symbols = Arc::new(SymbolStore::new(db.clone()));
        let chunks = Arc::new(ChunkStore::new(db.clone()));
        let files = Arc::new(FileStore::new(db.clone()));
        let fts = Arc::new(FtsStore::new(db.clone()));
        let vectors = Arc::new(VectorStore::new(db.clone()));
        let edges = Arc::new(EdgeStore::new(db.clone()));

        let branch = git::current_branch(&workspace);
        let mut sync_cache = SyncCache::load(sync_cache_path(&workspace), workspace.clone());

        // Model rotation: a changed embedding model invalidates every vector
        // (symbols and chunks stay). The sync cache is reset so the next
        // refresh revisits every file and re-embeds its chunks.
        let recorded = db.get_meta("embedding_model_id").await?;
        match recorded.as_deref() {
            Some(model) if model != embedder.model_id() => {
                let wiped = vectors.delete_all().await?;
                sync_cache.clear();
                tracing::info!(
                    old = model,
                    new = embedder.model_id(),
                    wiped,
                    "embedding model changed, vectors invalidated"
                );
                db.set_meta("embedding_model_id", embedder.model_id()).await?;
            }
            Some(_) => {}
            None => {
                db.set_meta("embedding_model_id", embedder.model_id()).await?;
            }
        }

        let searcher = Arc::new(HybridSearcher::new(
            symbols.clone(),
            chunks.clone(),
            fts.clone(),
            vectors.clone(),
            config.search.clone(),
            &config.reranker,
            &config.cache,
        ));

        let batch = BatchProcessor::new(embedder.clone(), &config.embedding);
        let walker = FileWalker::new(&config.indexing);
        let chunker = Chunker::new(config.chunking.clone());
        let queue = IndexJobQueue::new(config.queue.clone());

        Ok(Self {
            inner: Arc::new(ManagerInner {
                workspace,
                config,
                db,
                symbols,
                chunks,
                files,
                fts,
                vectors,
                edges,
                searcher,
                sync_cache: Mutex::new(sync_cache),
                extractor,
                edge_extractor: Mutex::new(None),
                chunker,
                embedder,
                batch,
                walker,
                lifecycle: Arc::new(LifecycleManager::new()),
                queue,
                branch: RwLock::new(branch),
                symbol_map: Mutex::new(HashMap::new()),
                pending: Mutex::new(Vec::new()),
                progress: Mutex::new(None),
            }),
        })
    }

    /// Install the edge extraction collaborator.
    pub fn set_edge_extractor(&self, extractor: Arc<dyn EdgeExtractor>) {
        *lock(&self.inner.edge_extractor) = Some(extractor);
    }

    /// Install a progress observer.
    pub fn set_progress_callback(&self, callback: ProgressFn) {
        *lock(&self.inner.progress) = Some(callback);
    }

    /// Branch-change event entry point: subsequent writes use the new label.
    /// Rows already written keep the label they were written with.
    pub fn set_branch(&self, branch: impl Into<String>) {
        *self
            .inner
            .branch
            .write()
            .unwrap_or_else(|p| p.into_inner()) = branch.into();
    }

    pub fn current_branch(&self) -> String {
        self.inner.current_branch()
    }

    /// Index every file in the workspace.
    pub async fn index_all(&self) -> Result<IndexSummary> {
        self.inner.lifecycle.transition(LifecycleState::Indexing)?;
        let result = self.inner.index_all_inner().await;
        self.inner.finish_run(result.as_ref().ok())?;
        result
    }

    /// Incremental update: process added and modified files, delete rows of
    /// removed ones.
    pub async fn refresh(&self) -> Result<RefreshSummary> {
        self.inner.lifecycle.transition(LifecycleState::Indexing)?;
        let result = self.inner.refresh_inner().await;
        self.inner
            .finish_run(result.as_ref().ok().map(|r| &r.summary))?;
        result
    }

    /// Index one file through the labeled job queue, embedding immediately
    /// so the file is vector-searchable when this returns.
    pub async fn index_file(&self, rel_path: &str) -> Result<()> {
        let inner = self.inner.clone();
        let path = rel_path.to_string();
        self.inner
            .queue
            .submit_and_wait(JobKind::SymbolExtraction, move || async move {
                inner.process_file(&path).await?;
                inner.run_phase_b().await?;
                inner.save_sync_cache()?;
                Ok(())
            })
            .await
    }

    /// Drop every row owned by a file (all granularities, edges, vectors).
    pub async fn remove_file(&self, rel_path: &str) -> Result<()> {
        self.inner.delete_file_rows(rel_path).await?;
        self.inner.save_sync_cache()
    }

    /// Delete every row for the current branch and run a full index.
    pub async fn rebuild(&self) -> Result<IndexSummary> {
        let branch = self.current_branch();
        self.inner
            .db
            .transaction(move |conn| {
                SymbolStore::delete_branch_tx(conn, &branch)?;
                ChunkStore::delete_branch_tx(conn, &branch)?;
                FileStore::delete_branch_tx(conn, &branch)?;
                EdgeStore::delete_branch_tx(conn, &branch)?;
                FtsStore::delete_branch_tx(conn, &branch)?;
                conn.execute("DELETE FROM repo_map WHERE branch = ?", [&branch])?;
                Ok(())
            })
            .await?;
        self.inner.searcher.clear_cache();
        {
            let mut cache = lock(&self.inner.sync_cache);
            cache.clear();
        }
        self.index_all().await
    }

    /// Aggregate index state.
    pub async fn status(&self) -> Result<IndexStatus> {
        let branch = self.current_branch();
        let last_full_index = self
            .inner
            .db
            .get_meta("last_full_index")
            .await?
            .and_then(|v| v.parse().ok());
        Ok(IndexStatus {
            state: self.inner.lifecycle.state(),
            branch: branch.clone(),
            files: self.inner.files.stats(&branch).await?,
            symbol_count: self.inner.symbols.count(&branch).await?,
            chunk_count: self.inner.chunks.count(&branch).await?,
            vector_count: self.inner.vectors.count().await?,
            last_full_index,
        })
    }

    /// Persist the sync cache and stop the job queue.
    pub async fn close(&self) -> Result<()> {
        self.inner.save_sync_cache()?;
        self.inner.queue.shutdown().await;
        Ok(())
    }

    // Accessors for query components.

    pub fn searcher(&self) -> Arc<HybridSearcher> {
        self.inner.searcher.clone()
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        self.inner.embedder.clone()
    }

    pub fn lifecycle(&self) -> Arc<LifecycleManager> {
        self.inner.lifecycle.clone()
    }

    pub fn symbol_store(&self) -> Arc<SymbolStore> {
        self.inner.symbols.clone()
    }

    pub fn chunk_store(&self) -> Arc<ChunkStore> {
        self.inner.chunks.clone()
    }

    pub fn file_store(&self) -> Arc<FileStore> {
        self.inner.files.clone()
    }

    pub fn vector_store(&self) -> Arc<VectorStore> {
        self.inner.vectors.clone()
    }

    pub fn fts_store(&self) -> Arc<FtsStore> {
        self.inner.fts.clone()
    }

    pub fn edge_store(&self) -> Arc<EdgeStore> {
        self.inner.edges.clone()
    }

    /// Embed a query string with the workspace embedder.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.inner.embedder.embed_query(text).await
    }

    /// Sync cache hit-rate statistics.
    pub fn sync_stats(&self) -> crate::sync::SyncStats {
        lock(&self.inner.sync_cache).stats()
    }
}

impl ManagerInner {
    fn current_branch(&self) -> String {
        self.branch
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn finish_run(&self, summary: Option<&IndexSummary>) -> Result<()> {
        let next = match summary {
            Some(summary) if summary.failed == 0 && summary.dropped == 0 => {
                LifecycleState::Ready
            }
            Some(_) => LifecycleState::Partial,
            None => LifecycleState::Error,
        };
        self.lifecycle.transition(next)
    }

    async fn index_all_inner(&self) -> Result<IndexSummary> {
        self.report_progress(0, 0, IndexPhase::Analyzing);
        let excluded = git::nested_worktrees(&self.workspace);
        let files = self.walker.walk(&self.workspace, &excluded)?;

        lock(&self.symbol_map).clear();
        let stats = self.run_phase_a(&files).await?;
        let (embedded, dropped) = self.run_phase_b().await?;

        self.save_sync_cache()?;
        self.db
            .set_meta("last_full_index", &now_unix().to_string())
            .await?;

        Ok(IndexSummary {
            total: files.len(),
            indexed: stats.indexed,
            failed: stats.failed,
            embedded,
            reused: stats.reused,
            dropped,
        })
    }

    async fn refresh_inner(&self) -> Result<RefreshSummary> {
        self.report_progress(0, 0, IndexPhase::Analyzing);
        let excluded = git::nested_worktrees(&self.workspace);
        let files = self.walker.walk(&self.workspace, &excluded)?;

        let changes = {
            let mut cache = lock(&self.sync_cache);
            cache.find_changed(&files)
        };

        lock(&self.symbol_map).clear();
        let to_process: Vec<String> = changes
            .added
            .iter()
            .chain(changes.modified.iter())
            .cloned()
            .collect();
        let stats = self.run_phase_a(&to_process).await?;

        // Removals run after Phase A so renamed content can still reuse the
        // old rows' vectors, and before Phase B which only adds vectors.
        for path in &changes.removed {
            self.delete_file_rows(path).await?;
        }

        let (embedded, dropped) = self.run_phase_b().await?;
        self.save_sync_cache()?;

        Ok(RefreshSummary {
            summary: IndexSummary {
                total: to_process.len(),
                indexed: stats.indexed,
                failed: stats.failed,
                embedded,
                reused: stats.reused,
                dropped,
            },
            changes,
        })
    }

    /// Phase A: bounded-concurrency fan-out over per-file pipelines.
    /// Per-file failures are isolated; storage errors abort the run.
    async fn run_phase_a(&self, paths: &[String]) -> Result<PhaseAStats> {
        let total = paths.len();
        self.report_progress(0, total, IndexPhase::Processing);

        let mut stats = PhaseAStats::default();
        let mut processed = 0usize;
        let mut stream = futures::stream::iter(paths.iter().map(|path| self.process_file(path)))
            .buffer_unordered(self.config.indexing.parallelism);

        while let Some(outcome) = stream.next().await {
            processed += 1;
            match outcome? {
                FileOutcome::Indexed { reused, .. } => {
                    stats.indexed += 1;
                    stats.reused += reused;
                }
                FileOutcome::Failed => stats.failed += 1,
            }
            self.report_progress(processed, total, IndexPhase::Processing);
        }
        Ok(stats)
    }

    /// Phase B: drain the pending buffer and batch-embed it. Embedding
    /// failures are swallowed here; vector writes are storage and propagate.
    async fn run_phase_b(&self) -> Result<(usize, usize)> {
        let items: Vec<EmbeddingItem> = {
            let mut pending = lock(&self.pending);
            std::mem::take(&mut *pending)
        };
        if items.is_empty() {
            return Ok((0, 0));
        }

        let total = items.len();
        self.report_progress(0, total, IndexPhase::Embedding);

        let produced = self.batch.process(items, InputType::Document).await;
        let embedded = produced.len();
        self.vectors
            .upsert_batch(
                produced
                    .into_iter()
                    .map(|v| (v.id, v.embedding, v.granularity))
                    .collect(),
            )
            .await?;

        self.report_progress(embedded, total, IndexPhase::Embedding);
        if embedded < total {
            tracing::warn!(
                dropped = total - embedded,
                "some embedding batches failed; retried on next refresh"
            );
        }
        Ok((embedded, total - embedded))
    }

    /// The per-file pipeline: read, extract, diff, persist, partition
    /// embeddings.
    async fn process_file(&self, rel_path: &str) -> Result<FileOutcome> {
        // Branch label snapshot for this pipeline.
        let branch = self.current_branch();
        let abs = self.workspace.join(rel_path);

        let (mtime, size) = match file_meta(&abs) {
            Ok(meta) => meta,
            Err(e) => return self.fail_file(rel_path, &branch, &e.to_string()).await,
        };
        let bytes = match std::fs::read(&abs) {
            Ok(bytes) => bytes,
            Err(e) => return self.fail_file(rel_path, &branch, &e.to_string()).await,
        };
        let content = String::from_utf8_lossy(&bytes).to_string();

        let is_external = self.is_external(rel_path);
        let language = self
            .extractor
            .language(Path::new(rel_path))
            .unwrap_or_default();

        let symbols = match self
            .extractor
            .extract_from_file(Path::new(rel_path), &content, &branch, is_external)
        {
            Ok(symbols) => symbols,
            Err(e) => return self.fail_file(rel_path, &branch, &e.to_string()).await,
        };

        // Prior rows for this file: the stale set.
        let stale_symbol_ids = self.symbols.ids_by_file(rel_path, &branch).await?;
        let stale_chunks = self.chunks.get_by_file(rel_path, &branch).await?;

        // Embedding reuse snapshot, taken before anything is deleted.
        let stale_vector_ids: Vec<String> = stale_chunks
            .iter()
            .map(|c| vector_identity(c).0)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let stale_vectors = self.vectors.get_many(&stale_vector_ids).await?;
        let vector_by_id: HashMap<String, (Vec<f32>, Granularity)> = stale_vectors
            .into_iter()
            .map(|(id, embedding, granularity)| (id, (embedding, granularity)))
            .collect();
        let mut reuse: HashMap<String, Vec<f32>> = HashMap::new();
        for chunk in &stale_chunks {
            let (vector_id, _) = vector_identity(chunk);
            if let Some((embedding, _)) = vector_by_id.get(&vector_id) {
                // First entry wins on hash collisions.
                reuse
                    .entry(chunk.content_hash.clone())
                    .or_insert_with(|| embedding.clone());
            }
        }

        let chunks = self
            .chunker
            .chunk_file(rel_path, &content, &language, &symbols, &branch);

        // Shared symbol map: stale ids out before new ids in.
        {
            let mut map = lock(&self.symbol_map);
            for id in &stale_symbol_ids {
                map.remove(id);
            }
            for symbol in &symbols {
                map.insert(symbol.id.clone(), symbol.clone());
            }
        }

        let edges = {
            let extractor = lock(&self.edge_extractor).clone();
            match extractor {
                Some(extractor) => {
                    let map = lock(&self.symbol_map);
                    extractor.extract_edges(Path::new(rel_path), &content, &map, &branch)
                }
                None => Vec::new(),
            }
        };

        let file_hash = lock(&self.sync_cache).hash_content(&bytes);
        let record = FileRecord {
            file_path: rel_path.to_string(),
            file_hash: file_hash.clone(),
            mtime,
            size: size as i64,
            last_indexed: now_unix(),
            language: language.clone(),
            branch: branch.clone(),
            status: FileStatus::Indexed,
            symbol_count: symbols.len() as i32,
            error_message: None,
        };

        let symbol_fts: Vec<FtsRow> = symbols
            .iter()
            .map(|s| FtsRow {
                content_id: s.id.clone(),
                content_type: Granularity::Symbol,
                branch: branch.clone(),
                file_path: s.file_path.clone(),
                name: s.name.clone(),
                content: s.content.clone(),
            })
            .collect();
        let chunk_fts: Vec<FtsRow> = chunks
            .iter()
            .map(|c| FtsRow {
                content_id: c.id.clone(),
                content_type: match c.chunk_type {
                    ChunkType::File => Granularity::File,
                    _ => Granularity::Chunk,
                },
                branch: branch.clone(),
                file_path: c.file_path.clone(),
                name: String::new(),
                content: c.content.clone(),
            })
            .collect();

        // Delete-then-insert for the whole file is one transactional unit.
        {
            let rel = rel_path.to_string();
            let branch = branch.clone();
            let stale_symbol_ids = stale_symbol_ids.clone();
            let stale_vector_ids = stale_vector_ids.clone();
            let symbols = symbols.clone();
            let chunks = chunks.clone();
            let edges = edges.clone();
            let record = record.clone();
            self.db
                .transaction(move |conn| {
                    SymbolStore::delete_by_file_tx(conn, &rel, &branch)?;
                    ChunkStore::delete_by_file_tx(conn, &rel, &branch)?;
                    FtsStore::delete_by_file_tx(conn, &rel, &branch)?;
                    EdgeStore::delete_by_symbol_ids_tx(conn, &stale_symbol_ids, &branch)?;
                    VectorStore::delete_by_ids_tx(conn, &stale_vector_ids)?;
                    SymbolStore::insert_batch_tx(conn, &symbols)?;
                    ChunkStore::insert_batch_tx(conn, &chunks)?;
                    FtsStore::insert_batch_tx(conn, &symbol_fts)?;
                    FtsStore::insert_batch_tx(conn, &chunk_fts)?;
                    EdgeStore::insert_batch_tx(conn, &edges)?;
                    FileStore::upsert_tx(conn, &record)?;
                    Ok(())
                })
                .await?;
        }

        // Partition chunks: reuse-snapshot hits write directly, the rest go
        // through a branch-wide hash lookup, and what is left becomes
        // pending embedding work.
        let mut reused_writes: Vec<(String, Vec<f32>, Granularity)> = Vec::new();
        let mut missing: Vec<(&Chunk, String, Granularity)> = Vec::new();
        for chunk in &chunks {
            let (vector_id, granularity) = vector_identity(chunk);
            match reuse.get(&chunk.content_hash) {
                Some(embedding) => reused_writes.push((vector_id, embedding.clone(), granularity)),
                None => missing.push((chunk, vector_id, granularity)),
            }
        }

        if !missing.is_empty() {
            let hashes: Vec<String> = missing
                .iter()
                .map(|(c, _, _)| c.content_hash.clone())
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            let candidates = self.chunks.find_by_hashes(&hashes, &branch).await?;
            let candidate_ids: Vec<String> = candidates
                .iter()
                .map(|c| vector_identity(c).0)
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            let candidate_vectors: HashMap<String, Vec<f32>> = self
                .vectors
                .get_many(&candidate_ids)
                .await?
                .into_iter()
                .map(|(id, embedding, _)| (id, embedding))
                .collect();

            let mut by_hash: HashMap<String, Vec<f32>> = HashMap::new();
            for candidate in &candidates {
                let (vector_id, _) = vector_identity(candidate);
                if let Some(embedding) = candidate_vectors.get(&vector_id) {
                    by_hash
                        .entry(candidate.content_hash.clone())
                        .or_insert_with(|| embedding.clone());
                }
            }

            missing.retain(|(chunk, vector_id, granularity)| {
                if let Some(embedding) = by_hash.get(&chunk.content_hash) {
                    reused_writes.push((vector_id.clone(), embedding.clone(), *granularity));
                    false
                } else {
                    true
                }
            });
        }

        let reused = reused_writes.len();
        if !reused_writes.is_empty() {
            self.vectors.upsert_batch(reused_writes).await?;
        }

        {
            let mut pending = lock(&self.pending);
            for (chunk, vector_id, granularity) in missing {
                pending.push(EmbeddingItem {
                    id: vector_id,
                    text: chunk.content.clone(),
                    granularity,
                });
            }
        }

        lock(&self.sync_cache).update(rel_path, file_hash, mtime, size);
        self.searcher.invalidate_file(rel_path);

        Ok(FileOutcome::Indexed { reused })
    }

    /// Record a recoverable per-file failure and keep the run going.
    async fn fail_file(&self, rel_path: &str, branch: &str, message: &str) -> Result<FileOutcome> {
        tracing::warn!(file = rel_path, error = message, "file indexing failed");
        self.files.mark_error(rel_path, branch, message).await?;
        Ok(FileOutcome::Failed)
    }

    /// Remove every row a file owns: symbols, chunks, FTS, edges, vectors,
    /// file record.
    async fn delete_file_rows(&self, rel_path: &str) -> Result<()> {
        let branch = self.current_branch();
        let stale_symbol_ids = self.symbols.ids_by_file(rel_path, &branch).await?;
        let stale_chunks = self.chunks.get_by_file(rel_path, &branch).await?;
        let mut vector_ids: HashSet<String> = stale_chunks
            .iter()
            .map(|c| vector_identity(c).0)
            .collect();
        vector_ids.extend(stale_symbol_ids.iter().cloned());
        let vector_ids: Vec<String> = vector_ids.into_iter().collect();

        {
            let rel = rel_path.to_string();
            let branch = branch.clone();
            let stale_symbol_ids = stale_symbol_ids.clone();
            self.db
                .transaction(move |conn| {
                    SymbolStore::delete_by_file_tx(conn, &rel, &branch)?;
                    ChunkStore::delete_by_file_tx(conn, &rel, &branch)?;
                    FtsStore::delete_by_file_tx(conn, &rel, &branch)?;
                    EdgeStore::delete_by_symbol_ids_tx(conn, &stale_symbol_ids, &branch)?;
                    VectorStore::delete_by_ids_tx(conn, &vector_ids)?;
                    FileStore::delete_tx(conn, &rel, &branch)?;
                    Ok(())
                })
                .await?;
        }

        {
            let mut map = lock(&self.symbol_map);
            for id in &stale_symbol_ids {
                map.remove(id);
            }
        }
        lock(&self.sync_cache).remove(rel_path);
        self.searcher.invalidate_file(rel_path);
        Ok(())
    }

    fn is_external(&self, rel_path: &str) -> bool {
        Path::new(rel_path).components().any(|component| {
            component
                .as_os_str()
                .to_str()
                .map(|name| {
                    self.config
                        .indexing
                        .external_dirs
                        .iter()
                        .any(|dir| dir == name)
                })
                .unwrap_or(false)
        })
    }

    fn save_sync_cache(&self) -> Result<()> {
        lock(&self.sync_cache).save()
    }

    fn report_progress(&self, current: usize, total: usize, phase: IndexPhase) {
        let _ = self.lifecycle.set_progress(current, total, phase);
        let callback = lock(&self.progress).clone();
        if let Some(callback) = callback {
            callback(current, total, phase);
        }
    }
}

/// Vector row identity for a chunk: symbol chunks share their parent
/// symbol's id (so the vector row points at the Symbol), block and file
/// chunks use their own.
fn vector_identity(chunk: &Chunk) -> (String, Granularity) {
    match chunk.chunk_type {
        ChunkType::Symbol => (
            chunk
                .parent_symbol_id
                .clone()
                .unwrap_or_else(|| chunk.id.clone()),
            Granularity::Symbol,
        ),
        ChunkType::Block => (chunk.id.clone(), Granularity::Chunk),
        ChunkType::File => (chunk.id.clone(), Granularity::File),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
