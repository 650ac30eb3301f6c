//! End-to-end workflow scenarios
//!
//! Drives the orchestrator with a scripted provider and stub backends
//! through the full node graph: happy path, refinement loops, skipped
//! retrieval, web routing, backend timeouts, and cancellation.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use noesis::llm::{LLMRequest, LLMResponse, RetryConfig};
use noesis::prelude::*;
use noesis::retrieval::BackendError;

/// Provider that replays a fixed sequence of completions
struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedProvider {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
        })
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn generate_request(&self, _request: &LLMRequest) -> noesis::Result<LLMResponse> {
        let content = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| NoesisError::OracleTransport("script exhausted".to_string()))?;
        Ok(LLMResponse {
            content,
            usage: None,
        })
    }
}

/// One scripted backend response
enum BackendStep {
    Items(Vec<ContextItem>),
    Empty,
    Hang,
}

/// Backend that replays scripted responses, repeating the last one
struct ScriptedBackend {
    kind: SourceKind,
    steps: Mutex<VecDeque<BackendStep>>,
}

impl ScriptedBackend {
    fn new(kind: SourceKind, steps: Vec<BackendStep>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            steps: Mutex::new(steps.into()),
        })
    }
}

#[async_trait]
impl SourceBackend for ScriptedBackend {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn retrieve(
        &self,
        _query: &str,
        _mode: Option<KnowledgeMode>,
    ) -> std::result::Result<RetrievalResult, BackendError> {
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(BackendStep::Items(items)) => Ok(RetrievalResult::new(self.kind, items)),
            Some(BackendStep::Empty) | None => Ok(RetrievalResult::empty(self.kind)),
            Some(BackendStep::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(RetrievalResult::empty(self.kind))
            }
        }
    }
}

fn ks_item(id: &str, text: &str, score: f32) -> ContextItem {
    ContextItem::new(SourceKind::KnowledgeStore, id, text, score)
}

fn orchestrator(
    provider: Arc<dyn LLMProvider>,
    backends: Vec<Arc<dyn SourceBackend>>,
    config: NoesisConfig,
) -> Orchestrator {
    let mut builder = Orchestrator::builder()
        .config(config)
        .provider(provider)
        .oracle_retry(RetryConfig::no_retry());
    for backend in backends {
        builder = match backend.kind() {
            SourceKind::KnowledgeStore => builder.knowledge_backend(backend),
            SourceKind::Web => builder.web_backend(backend),
            SourceKind::ToolApi => builder.tool_backend(backend),
        };
    }
    builder.build().unwrap()
}

/// Every recorded transition must be an edge of the node graph
fn assert_legal_history(state: &WorkflowState) {
    for transition in &state.history {
        assert!(
            WorkflowNode::is_legal_edge(transition.from_node, transition.to_node),
            "illegal edge {:?} -> {:?}",
            transition.from_node,
            transition.to_node
        );
    }
}

fn history_bound(max_retries: u32) -> usize {
    9 * (max_retries as usize + 1) + 1
}

const GOOD_GRADE: &str = r#"{"relevancy": 0.9, "faithfulness": 0.9, "context_quality": 0.85, "coherence": 0.92, "improvement_reason": ""}"#;

fn low_grade(context_quality: f32) -> String {
    format!(
        r#"{{"relevancy": 0.4, "faithfulness": 0.5, "context_quality": {}, "coherence": 0.6, "improvement_reason": "retrieved context was insufficient"}}"#,
        context_quality
    )
}

#[tokio::test]
async fn s1_happy_path_terminates_at_accept() {
    let provider = ScriptedProvider::new(&[
        r#"{"rewritten_query": "definition of machine learning", "reasoning": "expanded"}"#,
        r#"{"decision": "YES", "reason": "fact-seeking"}"#,
        r#"{"source": "knowledge_store"}"#,
        "Machine learning is the study of algorithms that improve with data.",
        GOOD_GRADE,
    ]);
    let backend = ScriptedBackend::new(
        SourceKind::KnowledgeStore,
        vec![BackendStep::Items(vec![ks_item(
            "ml-doc",
            "Machine learning studies data-driven algorithms.",
            0.95,
        )])],
    );
    let orchestrator = orchestrator(provider, vec![backend], NoesisConfig::default());

    let query_id = Uuid::new_v4();
    let mut snapshots = orchestrator.store().subscribe(query_id).await;

    let response = orchestrator
        .process_query_with(
            "What is machine learning?",
            ProcessOptions {
                query_id: Some(query_id),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(response.confidence >= 0.7);
    assert_eq!(response.sources, vec!["ml-doc"]);
    assert_eq!(response.metadata.query_rewrites, 1);
    assert_eq!(response.metadata.completed_at_node, 11);
    assert_eq!(response.metadata.retrieval_method, "knowledge_store");
    assert!(!response.metadata.degraded);

    let state = orchestrator.store().get(&query_id).await.unwrap();
    assert_eq!(state.status, RunStatus::Accepted);
    assert_eq!(
        state.visited_numbers(),
        vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]
    );
    assert_legal_history(&state);
    assert!(state.history.len() <= history_bound(state.max_retries));

    // Snapshot totality: one snapshot per node visited, in node order
    let mut observed = Vec::new();
    while let Ok(snapshot) = snapshots.try_recv() {
        observed.push(snapshot.current_node.number());
    }
    assert_eq!(observed, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]);
}

#[tokio::test]
async fn s2_refinement_loop_falls_back_to_best_candidate() {
    // Three full iterations; the second one grades best
    let replies = [
        // iteration 1
        r#"{"rewritten_query": "rewrite one", "reasoning": ""}"#.to_string(),
        r#"{"decision": "YES", "reason": "unclear"}"#.to_string(),
        r#"{"source": "knowledge_store"}"#.to_string(),
        "answer v1".to_string(),
        low_grade(0.1),
        // iteration 2
        r#"{"rewritten_query": "rewrite two", "reasoning": ""}"#.to_string(),
        r#"{"decision": "YES", "reason": "unclear"}"#.to_string(),
        r#"{"source": "knowledge_store"}"#.to_string(),
        "answer v2".to_string(),
        low_grade(0.2),
        // iteration 3
        r#"{"rewritten_query": "rewrite three", "reasoning": ""}"#.to_string(),
        r#"{"decision": "YES", "reason": "unclear"}"#.to_string(),
        r#"{"source": "knowledge_store"}"#.to_string(),
        "answer v3".to_string(),
        low_grade(0.05),
    ];
    let reply_refs: Vec<&str> = replies.iter().map(String::as_str).collect();
    let provider = ScriptedProvider::new(&reply_refs);
    let backend = ScriptedBackend::new(SourceKind::KnowledgeStore, vec![BackendStep::Empty]);
    let orchestrator = orchestrator(provider, vec![backend], NoesisConfig::default());

    let query_id = Uuid::new_v4();
    let mut snapshots = orchestrator.store().subscribe(query_id).await;
    let response = orchestrator
        .process_query_with(
            "xyz nonsense",
            ProcessOptions {
                query_id: Some(query_id),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Fallback emits the highest-graded answer, not the last one
    assert_eq!(response.answer, "answer v2");
    assert!(response.confidence < 0.7);
    assert_eq!(response.metadata.completed_at_node, 12);
    assert!(response.metadata.degraded);
    assert!(response
        .metadata
        .notes
        .iter()
        .any(|n| n == "max_retries_reached"));
    assert_eq!(response.metadata.query_rewrites, 3);

    let state = orchestrator.store().get(&query_id).await.unwrap();
    assert_eq!(state.status, RunStatus::FallbackAccepted);
    assert_legal_history(&state);

    // Bounded work holds with equality when every iteration runs the
    // full spine
    assert_eq!(state.history.len(), history_bound(state.max_retries));

    // Best-candidate fallback dominates every graded answer
    let best = state.best_candidate.as_ref().unwrap();
    assert_eq!(best.grading.overall, response.grading_scores.overall);
    assert_eq!(best.produced_at_retry, 1);

    // Monotone retries across the observed snapshot stream
    let mut last_retry = 0;
    while let Ok(snapshot) = snapshots.try_recv() {
        assert!(snapshot.retry_count >= last_retry);
        last_retry = snapshot.retry_count;
    }
    assert_eq!(last_retry, state.max_retries);
    assert_eq!(state.retry_count, state.max_retries);

    // Hints accumulated once per loopback
    assert_eq!(state.query.enhancement_hints.len(), 2);
}

#[tokio::test]
async fn s2_exhaustion_without_candidate_errors() {
    // Answer generation yields nothing every iteration, so grading is
    // synthetic and no candidate is ever recorded
    let replies = [
        r#"{"rewritten_query": "r1", "reasoning": ""}"#,
        r#"{"decision": "YES", "reason": ""}"#,
        r#"{"source": "knowledge_store"}"#,
        "",
        r#"{"rewritten_query": "r2", "reasoning": ""}"#,
        r#"{"decision": "YES", "reason": ""}"#,
        r#"{"source": "knowledge_store"}"#,
        "",
        r#"{"rewritten_query": "r3", "reasoning": ""}"#,
        r#"{"decision": "YES", "reason": ""}"#,
        r#"{"source": "knowledge_store"}"#,
        "",
    ];
    let provider = ScriptedProvider::new(&replies);
    let backend = ScriptedBackend::new(SourceKind::KnowledgeStore, vec![]);
    let orchestrator = orchestrator(provider, vec![backend], NoesisConfig::default());

    let result = orchestrator.process_query("xyz nonsense").await;
    assert!(matches!(result, Err(NoesisError::WorkflowExhausted(_))));
}

#[tokio::test]
async fn s3_skip_retrieval_loops_without_answering() {
    let replies = [
        r#"{"rewritten_query": "say hello", "reasoning": ""}"#,
        r#"{"decision": "NO", "reason": "self-contained"}"#,
        r#"{"rewritten_query": "say hello again", "reasoning": ""}"#,
        r#"{"decision": "NO", "reason": "self-contained"}"#,
        r#"{"rewritten_query": "say hello once more", "reasoning": ""}"#,
        r#"{"decision": "NO", "reason": "self-contained"}"#,
    ];
    let provider = ScriptedProvider::new(&replies);
    let backend = ScriptedBackend::new(SourceKind::KnowledgeStore, vec![]);
    let orchestrator = orchestrator(provider, vec![backend], NoesisConfig::default());

    let query_id = Uuid::new_v4();
    let result = orchestrator
        .process_query_with(
            "Say hello",
            ProcessOptions {
                query_id: Some(query_id),
                ..Default::default()
            },
        )
        .await;

    // No iteration generated an answer, so there is nothing to fall back to
    assert!(matches!(result, Err(NoesisError::WorkflowExhausted(_))));

    let state = orchestrator.store().get(&query_id).await.unwrap();
    assert_eq!(state.status, RunStatus::Exhausted);
    assert_legal_history(&state);

    // First pass is exactly start, rewrite, publish, assess, loopback
    assert_eq!(state.visited_numbers()[..5], [1, 2, 3, 4, 12]);
    assert!(state.history.len() <= history_bound(state.max_retries));
    assert_eq!(state.retry_count, state.max_retries);

    // The no-retrieval hint is appended on each loopback
    assert_eq!(state.query.enhancement_hints.len(), 2);
    assert!(state.query.enhancement_hints[0].contains("retrieval need"));
}

#[tokio::test]
async fn s4_web_routing_reaches_acceptance() {
    let provider = ScriptedProvider::new(&[
        r#"{"rewritten_query": "latest AI news 2024", "reasoning": ""}"#,
        r#"{"decision": "YES", "reason": "needs current info"}"#,
        r#"{"source": "web"}"#,
        "Recent AI developments include new foundation models.",
        GOOD_GRADE,
    ]);
    let backend = ScriptedBackend::new(
        SourceKind::Web,
        vec![BackendStep::Items(vec![ContextItem::new(
            SourceKind::Web,
            "https://news.example/ai",
            "AI news roundup",
            0.8,
        )])],
    );
    let orchestrator = orchestrator(provider, vec![backend], NoesisConfig::default());

    let response = orchestrator
        .process_query("latest AI news in 2024")
        .await
        .unwrap();

    assert_eq!(response.metadata.retrieval_method, "web");
    assert_eq!(response.metadata.completed_at_node, 11);
    assert_eq!(response.sources, vec!["https://news.example/ai"]);
}

#[tokio::test]
async fn s5_backend_timeout_is_recovered_by_loopback() {
    // First retrieval hangs past the backend timeout; the loop retries and
    // the second iteration routes to web and succeeds
    let low = low_grade(0.1);
    let replies: Vec<&str> = vec![
        r#"{"rewritten_query": "what is X", "reasoning": ""}"#,
        r#"{"decision": "YES", "reason": ""}"#,
        r#"{"source": "knowledge_store"}"#,
        "tentative answer without context",
        low.as_str(),
        r#"{"rewritten_query": "what is X, precisely", "reasoning": ""}"#,
        r#"{"decision": "YES", "reason": ""}"#,
        r#"{"source": "web"}"#,
        "X is a well-documented concept.",
        GOOD_GRADE,
    ];
    let provider = ScriptedProvider::new(&replies);
    let knowledge = ScriptedBackend::new(SourceKind::KnowledgeStore, vec![BackendStep::Hang]);
    let web = ScriptedBackend::new(
        SourceKind::Web,
        vec![BackendStep::Items(vec![ContextItem::new(
            SourceKind::Web,
            "https://x.example",
            "X explained",
            0.9,
        )])],
    );

    let mut config = NoesisConfig::default();
    config.retrieval.backend_timeout = Duration::from_millis(50);
    let orchestrator = orchestrator(provider, vec![knowledge, web], config);

    let query_id = Uuid::new_v4();
    let response = orchestrator
        .process_query_with(
            "What is X?",
            ProcessOptions {
                query_id: Some(query_id),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // No exception crossed the retrieval boundary; the run recovered
    assert_eq!(response.metadata.completed_at_node, 11);
    assert_eq!(response.metadata.query_rewrites, 2);
    assert!(response.metadata.degraded);
    assert!(response
        .metadata
        .notes
        .iter()
        .any(|n| n.contains("retrieval from knowledge_store failed")));

    let state = orchestrator.store().get(&query_id).await.unwrap();
    assert_eq!(state.retry_count, 1);
    assert_legal_history(&state);
}

#[tokio::test]
async fn s6_cancellation_mid_retrieval() {
    let provider = ScriptedProvider::new(&[
        r#"{"rewritten_query": "anything", "reasoning": ""}"#,
        r#"{"decision": "YES", "reason": ""}"#,
        r#"{"source": "knowledge_store"}"#,
    ]);
    let backend = ScriptedBackend::new(SourceKind::KnowledgeStore, vec![BackendStep::Hang]);
    let orchestrator = orchestrator(provider, vec![backend], NoesisConfig::default());

    let query_id = Uuid::new_v4();
    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        })
    };

    let result = orchestrator
        .process_query_with(
            "anything",
            ProcessOptions {
                query_id: Some(query_id),
                cancel: Some(cancel),
                ..Default::default()
            },
        )
        .await;
    canceller.await.unwrap();

    assert!(matches!(result, Err(NoesisError::WorkflowCancelled)));

    let state = orchestrator.store().get(&query_id).await.unwrap();
    assert_eq!(state.status, RunStatus::Cancelled);
    assert_eq!(state.current_node, WorkflowNode::Retrieve);
}

#[tokio::test]
async fn wall_clock_timeout_without_candidate_cancels() {
    let provider = ScriptedProvider::new(&[
        r#"{"rewritten_query": "anything", "reasoning": ""}"#,
        r#"{"decision": "YES", "reason": ""}"#,
        r#"{"source": "knowledge_store"}"#,
    ]);
    let backend = ScriptedBackend::new(SourceKind::KnowledgeStore, vec![BackendStep::Hang]);
    let orchestrator = orchestrator(provider, vec![backend], NoesisConfig::default());

    let result = orchestrator
        .process_query_with(
            "anything",
            ProcessOptions {
                overrides: WorkflowOverrides {
                    wall_clock_timeout: Some(Duration::from_millis(150)),
                    ..Default::default()
                },
                ..Default::default()
            },
        )
        .await;

    assert!(matches!(result, Err(NoesisError::WorkflowCancelled)));
}

#[tokio::test]
async fn oracle_parse_failure_applies_conservative_default() {
    // The need-assessment reply is free text; the engine must assume YES
    // and keep moving toward retrieval
    let provider = ScriptedProvider::new(&[
        r#"{"rewritten_query": "clarified", "reasoning": ""}"#,
        "hmm, probably yes?",
        r#"{"source": "knowledge_store"}"#,
        "grounded answer",
        GOOD_GRADE,
    ]);
    let backend = ScriptedBackend::new(
        SourceKind::KnowledgeStore,
        vec![BackendStep::Items(vec![ks_item("doc", "evidence", 0.9)])],
    );
    let orchestrator = orchestrator(provider, vec![backend], NoesisConfig::default());

    let query_id = Uuid::new_v4();
    let response = orchestrator
        .process_query_with(
            "ambiguous",
            ProcessOptions {
                query_id: Some(query_id),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(response.metadata.completed_at_node, 11);
    assert!(response.metadata.degraded);
    assert!(response
        .metadata
        .notes
        .iter()
        .any(|n| n.contains("assuming yes")));

    let state = orchestrator.store().get(&query_id).await.unwrap();
    assert!(state
        .degradations
        .iter()
        .any(|d| d.contains("retrieval-need decision failed")));
}

#[tokio::test]
async fn snapshots_observed_through_handler_subscription() {
    let provider = ScriptedProvider::new(&[
        r#"{"rewritten_query": "q", "reasoning": ""}"#,
        r#"{"decision": "YES", "reason": ""}"#,
        r#"{"source": "knowledge_store"}"#,
        "answer",
        GOOD_GRADE,
    ]);
    let backend = ScriptedBackend::new(
        SourceKind::KnowledgeStore,
        vec![BackendStep::Items(vec![ks_item("doc", "evidence", 0.9)])],
    );
    let orchestrator = orchestrator(provider, vec![backend], NoesisConfig::default());

    let query_id = Uuid::new_v4();
    let observed = Arc::new(Mutex::new(Vec::new()));
    let handle = {
        let observed = observed.clone();
        orchestrator
            .store()
            .subscribe_with(query_id, move |snapshot| {
                let observed = observed.clone();
                Box::pin(async move {
                    observed.lock().unwrap().push(snapshot.current_node.number());
                })
            })
            .await
    };

    orchestrator
        .process_query_with(
            "q",
            ProcessOptions {
                query_id: Some(query_id),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.unsubscribe();

    let observed = observed.lock().unwrap().clone();
    assert_eq!(observed, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]);
}

#[tokio::test]
async fn concurrent_runs_share_a_store_without_interference() {
    let store = SessionStore::new();
    let make = |answer: &'static str, store: SessionStore| {
        let provider = ScriptedProvider::new(&[
            r#"{"rewritten_query": "q", "reasoning": ""}"#,
            r#"{"decision": "YES", "reason": ""}"#,
            r#"{"source": "knowledge_store"}"#,
            answer,
            GOOD_GRADE,
        ]);
        let backend = ScriptedBackend::new(
            SourceKind::KnowledgeStore,
            vec![BackendStep::Items(vec![ks_item("doc", "evidence", 0.9)])],
        );
        Orchestrator::builder()
            .provider(provider)
            .knowledge_backend(backend)
            .store(store)
            .oracle_retry(RetryConfig::no_retry())
            .build()
            .unwrap()
    };

    let a = {
        let orchestrator = make("answer from run A", store.clone());
        tokio::spawn(async move { orchestrator.process_query("q").await })
    };
    let b = {
        let orchestrator = make("answer from run B", store.clone());
        tokio::spawn(async move { orchestrator.process_query("q").await })
    };

    let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
    assert_eq!(a.answer, "answer from run A");
    assert_eq!(b.answer, "answer from run B");

    // Both runs recorded their snapshots in the shared store
    assert_eq!(store.len().await, 2);
}
