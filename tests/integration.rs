//! End-to-end tests over an in-memory database with deterministic fakes for
//! the embedding, web search, and rerank backends.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use ragmill::config::{
    ChunkingConfig, RerankConfig, RetrievalConfig, StrategyConfig, WebSearchConfig,
};
use ragmill::embedding::{l2_normalize, EmbeddingClient};
use ragmill::engine::KnowledgeEngine;
use ragmill::error::{Error, Result};
use ragmill::models::{Provenance, SearchResult, TaskStatus};
use ragmill::retrieval::RetrievalEngine;
use ragmill::strategy::SearchStrategy;
use ragmill::tasks::IngestionTaskManager;
use ragmill::vector_store::{SqliteVectorStore, VectorStore};
use ragmill::websearch::WebSearchClient;
use ragmill::{db, migrate};

const DIMS: usize = 256;

/// Bag-of-tokens embedding: identical text maps to an identical unit
/// vector, so a verbatim match scores 1.0 and shared vocabulary raises the
/// score proportionally.
struct FakeEmbedder {
    calls: AtomicUsize,
    fail_from_call: Option<usize>,
}

impl FakeEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_from_call: None,
        }
    }

    fn failing_from(call: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_from_call: Some(call),
        }
    }
}

fn token_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for token in text.split_whitespace() {
        let mut hasher = DefaultHasher::new();
        token.to_lowercase().hash(&mut hasher);
        v[(hasher.finish() as usize) % DIMS] += 1.0;
    }
    l2_normalize(&mut v);
    v
}

#[async_trait]
impl EmbeddingClient for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake-bag-of-tokens"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(fail_from) = self.fail_from_call {
            if call >= fail_from {
                return Err(Error::PermanentUpstream {
                    stage: "embedding",
                    message: "injected failure".into(),
                });
            }
        }
        Ok(texts.iter().map(|t| token_vector(t)).collect())
    }
}

struct FakeWebSearch {
    results: Vec<SearchResult>,
    called: AtomicBool,
}

impl FakeWebSearch {
    fn with_results(results: Vec<SearchResult>) -> Self {
        Self {
            results,
            called: AtomicBool::new(false),
        }
    }

    fn empty() -> Self {
        Self::with_results(Vec::new())
    }
}

#[async_trait]
impl WebSearchClient for FakeWebSearch {
    async fn search(&self, _query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        self.called.store(true, Ordering::SeqCst);
        Ok(self.results.iter().take(top_k).cloned().collect())
    }
}

struct FailingWebSearch;

#[async_trait]
impl WebSearchClient for FailingWebSearch {
    async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<SearchResult>> {
        Err(Error::TransientUpstream {
            stage: "web_search",
            message: "injected outage".into(),
        })
    }
}

fn web_result(content: &str, title: &str) -> SearchResult {
    SearchResult {
        content: content.to_string(),
        score: 0.8,
        provenance: Provenance::Web,
        source: format!("https://example.com/{title}"),
        title: title.to_string(),
        group_id: None,
    }
}

struct Harness {
    pool: sqlx::SqlitePool,
    store: Arc<SqliteVectorStore>,
    manager: Arc<IngestionTaskManager>,
    embedder: Arc<FakeEmbedder>,
}

async fn harness() -> Harness {
    harness_with_embedder(FakeEmbedder::new()).await
}

async fn harness_with_embedder(embedder: FakeEmbedder) -> Harness {
    let pool = db::connect_in_memory().await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    let store = Arc::new(SqliteVectorStore::new(pool.clone()));
    let embedder = Arc::new(embedder);
    let manager = Arc::new(IngestionTaskManager::new(
        pool.clone(),
        store.clone(),
        embedder.clone(),
        ChunkingConfig {
            chunk_size: 80,
            overlap: 0,
        },
        2,
    ));
    Harness {
        pool,
        store,
        manager,
        embedder,
    }
}

fn engine_for(
    harness: &Harness,
    web: Arc<dyn WebSearchClient>,
    similarity_threshold: f32,
) -> KnowledgeEngine {
    let retrieval_config = RetrievalConfig {
        similarity_threshold,
        ..RetrievalConfig::default()
    };
    let retrieval = RetrievalEngine::new(
        harness.store.clone(),
        harness.embedder.clone(),
        retrieval_config.clone(),
    );
    KnowledgeEngine::new(
        retrieval,
        web,
        None,
        &retrieval_config,
        StrategyConfig::default(),
        &WebSearchConfig::default(),
        &RerankConfig::default(),
    )
}

const THREE_PARAGRAPHS: &str = "The kernel scheduler assigns tasks to cores.\n\n\
    Memory pages are reclaimed under pressure by the evictor.\n\n\
    Network buffers are pooled and reused across connections.";

#[tokio::test]
async fn test_ingest_completes_with_full_progress() {
    let h = harness().await;
    let snapshot = h
        .manager
        .submit_text("u1", None, "kernel-notes", THREE_PARAGRAPHS)
        .await
        .unwrap();
    assert_eq!(snapshot.status, TaskStatus::Pending);
    assert_eq!(snapshot.progress, 0);

    h.manager.run_task(&snapshot.task_id).await.unwrap();

    let done = h.manager.task_status(&snapshot.task_id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.progress, 100);
    assert!(done.error_message.is_none());

    let task = h.manager.load_task(&snapshot.task_id).await.unwrap();
    assert_eq!(task.total_chunks, 3);
    assert_eq!(task.processed_chunks, 3);
    assert_eq!(h.store.count_document(&task.document_id).await.unwrap(), 3);
}

#[tokio::test]
async fn test_rerunning_a_task_does_not_duplicate_vectors() {
    let h = harness().await;
    let snapshot = h
        .manager
        .submit_text("u1", None, "kernel-notes", THREE_PARAGRAPHS)
        .await
        .unwrap();
    h.manager.run_task(&snapshot.task_id).await.unwrap();

    let task = h.manager.load_task(&snapshot.task_id).await.unwrap();
    let before = h.store.count_document(&task.document_id).await.unwrap();

    // Force the task back to pending, as if a worker died mid-handoff.
    sqlx::query("UPDATE ingestion_tasks SET status = 'pending' WHERE id = ?")
        .bind(&snapshot.task_id)
        .execute(&h.pool)
        .await
        .unwrap();
    h.manager.run_task(&snapshot.task_id).await.unwrap();

    let after = h.store.count_document(&task.document_id).await.unwrap();
    assert_eq!(before, after);
    let done = h.manager.task_status(&snapshot.task_id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_resubmitting_a_document_replaces_its_vectors() {
    let h = harness().await;
    let first = h
        .manager
        .submit_text("u1", None, "kernel-notes", THREE_PARAGRAPHS)
        .await
        .unwrap();
    h.manager.run_task(&first.task_id).await.unwrap();

    let second = h
        .manager
        .submit_text("u1", None, "kernel-notes", THREE_PARAGRAPHS)
        .await
        .unwrap();
    h.manager.run_task(&second.task_id).await.unwrap();

    let a = h.manager.load_task(&first.task_id).await.unwrap();
    let b = h.manager.load_task(&second.task_id).await.unwrap();
    assert_eq!(a.document_id, b.document_id);
    assert_eq!(h.store.count_document(&a.document_id).await.unwrap(), 3);
}

#[tokio::test]
async fn test_claimed_task_is_not_claimed_twice() {
    let h = harness().await;
    let snapshot = h
        .manager
        .submit_text("u1", None, "doc", THREE_PARAGRAPHS)
        .await
        .unwrap();
    h.manager.run_task(&snapshot.task_id).await.unwrap();

    // Terminal task: a second run must be a no-op.
    let calls_before = h.embedder.calls.load(Ordering::SeqCst);
    h.manager.run_task(&snapshot.task_id).await.unwrap();
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), calls_before);
}

#[tokio::test]
async fn test_empty_text_rejected_at_submission() {
    let h = harness().await;
    let err = h
        .manager
        .submit_text("u1", None, "empty", "   \n\n  ")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Input(_)));
}

#[tokio::test]
async fn test_whitespace_file_fails_without_completing() {
    let h = harness().await;
    let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
    file.write_all(b"  \n\n \t \n").unwrap();

    let snapshot = h.manager.submit_file("u1", None, file.path()).await.unwrap();
    h.manager.run_task(&snapshot.task_id).await.unwrap();

    let done = h.manager.task_status(&snapshot.task_id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done
        .error_message
        .unwrap()
        .contains("no extractable content"));
    assert!(done.progress < 100);
}

#[tokio::test]
async fn test_unsupported_file_type_rejected() {
    let h = harness().await;
    let file = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
    let err = h
        .manager
        .submit_file("u1", None, file.path())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Input(_)));
}

#[tokio::test]
async fn test_embedding_failure_rolls_back_partial_vectors() {
    // First batch succeeds, second fails: the already-written vectors must
    // not survive.
    let h = harness_with_embedder(FakeEmbedder::failing_from(1)).await;
    let snapshot = h
        .manager
        .submit_text("u1", None, "doc", THREE_PARAGRAPHS)
        .await
        .unwrap();
    h.manager.run_task(&snapshot.task_id).await.unwrap();

    let done = h.manager.task_status(&snapshot.task_id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.error_message.unwrap().contains("embedding"));

    let task = h.manager.load_task(&snapshot.task_id).await.unwrap();
    assert_eq!(h.store.count_document(&task.document_id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancelled_task_ends_failed_with_no_vectors() {
    let h = harness().await;
    let snapshot = h
        .manager
        .submit_text("u1", None, "doc", THREE_PARAGRAPHS)
        .await
        .unwrap();
    h.manager.cancel_task(&snapshot.task_id, "u1").await.unwrap();
    h.manager.run_task(&snapshot.task_id).await.unwrap();

    let done = h.manager.task_status(&snapshot.task_id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.error_message.unwrap().contains("cancelled"));

    let task = h.manager.load_task(&snapshot.task_id).await.unwrap();
    assert_eq!(h.store.count_document(&task.document_id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancel_completed_task_is_an_error() {
    let h = harness().await;
    let snapshot = h
        .manager
        .submit_text("u1", None, "doc", THREE_PARAGRAPHS)
        .await
        .unwrap();
    h.manager.run_task(&snapshot.task_id).await.unwrap();
    assert!(h
        .manager
        .cancel_task(&snapshot.task_id, "u1")
        .await
        .is_err());
}

#[tokio::test]
async fn test_status_of_unknown_task_is_an_error() {
    let h = harness().await;
    assert!(h.manager.task_status("no-such-task").await.is_err());
}

#[tokio::test]
async fn test_delete_document_purges_vectors_and_tombstones_task() {
    let h = harness().await;
    let snapshot = h
        .manager
        .submit_text("u1", None, "doc", THREE_PARAGRAPHS)
        .await
        .unwrap();
    h.manager.run_task(&snapshot.task_id).await.unwrap();
    let task = h.manager.load_task(&snapshot.task_id).await.unwrap();

    let deleted = h
        .manager
        .delete_document(&task.document_id, "u1")
        .await
        .unwrap();
    assert_eq!(deleted, 3);
    assert_eq!(h.store.count_document(&task.document_id).await.unwrap(), 0);

    // Status survives the tombstone; only `active` flips.
    let after = h.manager.load_task(&snapshot.task_id).await.unwrap();
    assert_eq!(after.status, TaskStatus::Completed);
    assert!(!after.active);
}

#[tokio::test]
async fn test_group_lifecycle_scopes_and_cascades() {
    let h = harness().await;
    let group = h.manager.create_group("u1", "manuals", "").await.unwrap();

    let snapshot = h
        .manager
        .submit_text("u1", Some(group.id), "doc", THREE_PARAGRAPHS)
        .await
        .unwrap();
    h.manager.run_task(&snapshot.task_id).await.unwrap();

    let engine = engine_for(&h, Arc::new(FakeWebSearch::empty()), 0.3);
    let scoped = engine
        .search(
            "Memory pages are reclaimed under pressure by the evictor.",
            "u1",
            Some(group.id),
            SearchStrategy::KnowledgeOnly,
        )
        .await
        .unwrap();
    assert!(!scoped.results.is_empty());

    let removed = h.manager.delete_group(group.id, "u1").await.unwrap();
    assert_eq!(removed, 3);
    assert!(h.manager.list_groups("u1").await.unwrap().is_empty());

    // The group is gone; new submissions against it are rejected.
    assert!(h
        .manager
        .submit_text("u1", Some(group.id), "doc2", "More text.")
        .await
        .is_err());
}

#[tokio::test]
async fn test_deleting_a_group_cancels_its_pending_tasks() {
    let h = harness().await;
    let group = h.manager.create_group("u1", "manuals", "").await.unwrap();
    let snapshot = h
        .manager
        .submit_text("u1", Some(group.id), "doc", THREE_PARAGRAPHS)
        .await
        .unwrap();

    // Group deleted while the task is still queued: the worker must not
    // repopulate the deleted group when it eventually runs.
    h.manager.delete_group(group.id, "u1").await.unwrap();
    h.manager.run_task(&snapshot.task_id).await.unwrap();

    let done = h.manager.task_status(&snapshot.task_id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.error_message.unwrap().contains("cancelled"));

    let task = h.manager.load_task(&snapshot.task_id).await.unwrap();
    assert!(!task.active);
    assert_eq!(h.store.count_document(&task.document_id).await.unwrap(), 0);

    let engine = engine_for(&h, Arc::new(FakeWebSearch::empty()), 0.3);
    let scoped = engine
        .search(
            "Memory pages are reclaimed under pressure by the evictor.",
            "u1",
            Some(group.id),
            SearchStrategy::KnowledgeOnly,
        )
        .await
        .unwrap();
    assert!(scoped.results.is_empty());
}

#[tokio::test]
async fn test_failed_completion_update_rolls_back_instead_of_stranding() {
    let h = harness().await;
    let snapshot = h
        .manager
        .submit_text("u1", None, "doc", THREE_PARAGRAPHS)
        .await
        .unwrap();

    // Make the completion update itself fail after all vectors are written.
    sqlx::query(
        r#"
        CREATE TRIGGER block_completion BEFORE UPDATE ON ingestion_tasks
        WHEN NEW.status = 'completed'
        BEGIN SELECT RAISE(ABORT, 'injected fault'); END
        "#,
    )
    .execute(&h.pool)
    .await
    .unwrap();

    h.manager.run_task(&snapshot.task_id).await.unwrap();

    // The task must not be stranded in `processing` with vectors intact.
    let done = h.manager.task_status(&snapshot.task_id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.error_message.is_some());

    let task = h.manager.load_task(&snapshot.task_id).await.unwrap();
    assert_eq!(h.store.count_document(&task.document_id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_submission_to_unknown_group_rejected() {
    let h = harness().await;
    let err = h
        .manager
        .submit_text("u1", Some(999), "doc", "Some text.")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Input(_)));
}

#[tokio::test]
async fn test_duplicate_group_name_rejected() {
    let h = harness().await;
    h.manager.create_group("u1", "manuals", "").await.unwrap();
    assert!(h.manager.create_group("u1", "manuals", "").await.is_err());
    // Same name under another user is fine.
    assert!(h.manager.create_group("u2", "manuals", "").await.is_ok());
}

#[tokio::test]
async fn test_workers_drain_the_queue() {
    let h = harness().await;
    h.manager.spawn_workers(2).unwrap();

    let snapshot = h
        .manager
        .submit_text("u1", None, "doc", THREE_PARAGRAPHS)
        .await
        .unwrap();

    let mut status = h.manager.task_status(&snapshot.task_id).await.unwrap();
    for _ in 0..200 {
        if status.status.is_terminal() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        status = h.manager.task_status(&snapshot.task_id).await.unwrap();
    }
    assert_eq!(status.status, TaskStatus::Completed);
    assert_eq!(status.progress, 100);
}

// --- Query-side scenarios ---

#[tokio::test]
async fn test_verbatim_chunk_query_ranks_its_chunk_first() {
    let h = harness().await;
    let snapshot = h
        .manager
        .submit_text("u1", None, "kernel-notes", THREE_PARAGRAPHS)
        .await
        .unwrap();
    h.manager.run_task(&snapshot.task_id).await.unwrap();

    let engine = engine_for(&h, Arc::new(FakeWebSearch::empty()), 0.5);
    let response = engine
        .search(
            "Memory pages are reclaimed under pressure by the evictor.",
            "u1",
            None,
            SearchStrategy::KnowledgeOnly,
        )
        .await
        .unwrap();

    let first = &response.results[0];
    assert!(first.content.contains("Memory pages are reclaimed"));
    assert!(first.score >= 0.5);
    assert_eq!(first.provenance, Provenance::Knowledge);
}

#[tokio::test]
async fn test_auto_with_empty_knowledge_base_goes_web_only() {
    let h = harness().await;
    let web = Arc::new(FakeWebSearch::with_results(vec![
        web_result("The web knows things.", "page-1"),
        web_result("More web knowledge.", "page-2"),
    ]));
    let engine = engine_for(&h, web, 0.7);

    let response = engine
        .search("anything at all", "u1", None, SearchStrategy::Auto)
        .await
        .unwrap();

    assert_eq!(response.strategy, SearchStrategy::WebOnly);
    assert!(response.reasoning.contains("no knowledge base results"));
    assert_eq!(response.results.len(), 2);
    assert!(response
        .results
        .iter()
        .all(|r| r.provenance == Provenance::Web));
}

#[tokio::test]
async fn test_auto_with_confident_knowledge_skips_web() {
    let h = harness().await;
    // Three near-identical chunks so the probe finds >= 3 results, each
    // sharing most tokens with the query.
    let text = "alpha beta gamma delta alpha beta gamma delta variant one.\n\n\
                alpha beta gamma delta alpha beta gamma delta variant two.\n\n\
                alpha beta gamma delta alpha beta gamma delta variant three.";
    let snapshot = h.manager.submit_text("u1", None, "doc", text).await.unwrap();
    h.manager.run_task(&snapshot.task_id).await.unwrap();

    let web = Arc::new(FakeWebSearch::with_results(vec![web_result(
        "should never appear",
        "page",
    )]));
    let engine = engine_for(&h, web.clone(), 0.7);

    let response = engine
        .search("alpha beta gamma delta", "u1", None, SearchStrategy::Auto)
        .await
        .unwrap();

    assert_eq!(response.strategy, SearchStrategy::KnowledgeOnly);
    assert!(response.reasoning.contains("sufficient"));
    assert!(!web.called.load(Ordering::SeqCst));
    assert!(response
        .results
        .iter()
        .all(|r| r.provenance == Provenance::Knowledge));
}

#[tokio::test]
async fn test_auto_with_weak_knowledge_goes_hybrid_and_dedupes() {
    let h = harness().await;
    // One chunk sharing only a few tokens with the query: present but weak.
    let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa.";
    let snapshot = h.manager.submit_text("u1", None, "doc", text).await.unwrap();
    h.manager.run_task(&snapshot.task_id).await.unwrap();

    let web = Arc::new(FakeWebSearch::with_results(vec![
        // Near-duplicate of the stored chunk; fusion must collapse it.
        web_result(
            "alpha beta gamma delta epsilon zeta eta theta iota kappa.",
            "dupe",
        ),
        web_result("Fresh evidence from the web.", "fresh"),
    ]));
    let engine = engine_for(&h, web, 0.4);

    let response = engine
        .search("alpha beta gamma", "u1", None, SearchStrategy::Auto)
        .await
        .unwrap();

    assert_eq!(response.strategy, SearchStrategy::Hybrid);
    // 1 knowledge + 2 web, minus the collapsed duplicate.
    assert_eq!(response.results.len(), 2);
    assert!(response
        .results
        .iter()
        .any(|r| r.provenance == Provenance::Web));
    let dupes = response
        .results
        .iter()
        .filter(|r| r.content.contains("epsilon zeta"))
        .count();
    assert_eq!(dupes, 1);
}

#[tokio::test]
async fn test_hybrid_survives_web_outage() {
    let h = harness().await;
    let snapshot = h
        .manager
        .submit_text("u1", None, "doc", THREE_PARAGRAPHS)
        .await
        .unwrap();
    h.manager.run_task(&snapshot.task_id).await.unwrap();

    let engine = engine_for(&h, Arc::new(FailingWebSearch), 0.5);
    let response = engine
        .search(
            "Network buffers are pooled and reused across connections.",
            "u1",
            None,
            SearchStrategy::Hybrid,
        )
        .await
        .unwrap();

    assert!(response.reasoning.contains("web search failed"));
    assert!(!response.results.is_empty());
    assert!(response
        .results
        .iter()
        .all(|r| r.provenance == Provenance::Knowledge));
}

#[tokio::test]
async fn test_strategy_none_returns_no_evidence() {
    let h = harness().await;
    let engine = engine_for(&h, Arc::new(FakeWebSearch::empty()), 0.7);
    let response = engine
        .search("whatever", "u1", None, SearchStrategy::None)
        .await
        .unwrap();
    assert_eq!(response.strategy, SearchStrategy::None);
    assert!(response.results.is_empty());
}

#[tokio::test]
async fn test_chat_search_renders_context_block() {
    let h = harness().await;
    let snapshot = h
        .manager
        .submit_text("u1", None, "kernel-notes", THREE_PARAGRAPHS)
        .await
        .unwrap();
    h.manager.run_task(&snapshot.task_id).await.unwrap();

    let engine = engine_for(&h, Arc::new(FakeWebSearch::empty()), 0.5);
    let response = engine
        .chat_search(
            "The kernel scheduler assigns tasks to cores.",
            "u1",
            None,
            SearchStrategy::KnowledgeOnly,
        )
        .await
        .unwrap();

    assert!(response.context.starts_with("[1] (knowledge)"));
    assert!(response.context.contains("kernel scheduler"));
}

#[tokio::test]
async fn test_per_call_overrides_adjust_threshold_and_top_k() {
    let h = harness().await;
    let snapshot = h
        .manager
        .submit_text("u1", None, "kernel-notes", THREE_PARAGRAPHS)
        .await
        .unwrap();
    h.manager.run_task(&snapshot.task_id).await.unwrap();

    let engine = engine_for(&h, Arc::new(FakeWebSearch::empty()), 0.95);
    let query = "Memory pages are reclaimed under pressure by the evictor.";

    // Configured threshold is strict: only the verbatim chunk clears it.
    let strict = engine
        .search(query, "u1", None, SearchStrategy::KnowledgeOnly)
        .await
        .unwrap();
    assert_eq!(strict.results.len(), 1);

    // A per-call threshold lets weakly-related chunks through.
    let loose = engine
        .search_with(
            query,
            "u1",
            None,
            SearchStrategy::KnowledgeOnly,
            ragmill::QueryOverrides {
                top_k: None,
                similarity_threshold: Some(0.05),
            },
        )
        .await
        .unwrap();
    assert!(loose.results.len() > strict.results.len());

    // A per-call top_k caps the same query.
    let capped = engine
        .search_with(
            query,
            "u1",
            None,
            SearchStrategy::KnowledgeOnly,
            ragmill::QueryOverrides {
                top_k: Some(1),
                similarity_threshold: Some(0.05),
            },
        )
        .await
        .unwrap();
    assert_eq!(capped.results.len(), 1);
}

#[tokio::test]
async fn test_results_isolated_between_users() {
    let h = harness().await;
    let snapshot = h
        .manager
        .submit_text("u1", None, "doc", THREE_PARAGRAPHS)
        .await
        .unwrap();
    h.manager.run_task(&snapshot.task_id).await.unwrap();

    let engine = engine_for(&h, Arc::new(FakeWebSearch::empty()), 0.3);
    let response = engine
        .search(
            "The kernel scheduler assigns tasks to cores.",
            "someone-else",
            None,
            SearchStrategy::KnowledgeOnly,
        )
        .await
        .unwrap();
    assert!(response.results.is_empty());
}
