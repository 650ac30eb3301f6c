//! The twelve-node workflow engine
//!
//! Drives one query through rewrite, routing, retrieval, generation, and
//! self-grading, with a bounded loopback budget. A run is sequential within
//! itself; the only suspension points are the oracle and retrieval calls,
//! and cancellation plus the wall-clock deadline are observed at every one
//! of them.

use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::WorkflowConfig;
use crate::context::{CompiledContext, ContextCompiler};
use crate::error::{NoesisError, Result};
use crate::grading::{Grader, GradingResult};
use crate::oracle::{Oracle, RetrievalNeed};
use crate::retrieval::{Retriever, SourceKind};
use crate::session::SessionStore;
use crate::workflow::node::WorkflowNode;
use crate::workflow::state::{
    Candidate, FinalResponse, ResponseMetadata, RunStatus, WorkflowState,
};

/// Hint appended when the need-assessment declines retrieval
const NO_RETRIEVAL_HINT: &str =
    "the prior rewrite did not surface a retrieval need; reformulate for concreteness";

/// An interrupt observed at a suspension point
enum Interrupted {
    Cancelled,
    Deadline,
}

/// Executes workflow runs against shared, stateless adapters
pub struct WorkflowEngine {
    oracle: Arc<Oracle>,
    grader: Grader,
    retriever: Arc<Retriever>,
    compiler: ContextCompiler,
    store: SessionStore,
}

impl WorkflowEngine {
    /// Create an engine over the given collaborators
    pub fn new(
        oracle: Arc<Oracle>,
        retriever: Arc<Retriever>,
        compiler: ContextCompiler,
        store: SessionStore,
    ) -> Self {
        Self {
            grader: Grader::new(oracle.clone()),
            oracle,
            retriever,
            compiler,
            store,
        }
    }

    /// Run one query to a terminal state.
    ///
    /// # Errors
    ///
    /// - [`NoesisError::WorkflowCancelled`] on cooperative cancellation, or
    ///   on a wall-clock timeout with no candidate answer
    /// - [`NoesisError::WorkflowExhausted`] when retries run out without any
    ///   gradable answer
    pub async fn run(
        &self,
        query_id: Uuid,
        original_text: &str,
        config: WorkflowConfig,
        cancel: CancellationToken,
    ) -> Result<FinalResponse> {
        let mut state = WorkflowState::new(query_id, original_text, &config);
        let deadline = Instant::now() + config.wall_clock_timeout;
        self.publish(&state).await;

        let mut compiled = CompiledContext::default();
        let mut answer = String::new();

        loop {
            match state.current_node {
                WorkflowNode::Start => {
                    self.advance(&mut state, WorkflowNode::RewriteQuery, None).await;
                }

                WorkflowNode::RewriteQuery => {
                    let original = state.query.original_text.clone();
                    let hints = state.query.enhancement_hints.clone();
                    match self
                        .supervised(&cancel, deadline, self.oracle.rewrite(&original, &hints))
                        .await
                    {
                        Ok(Ok(rewritten)) => state.query.current_text = rewritten,
                        Ok(Err(e)) => state.record_degradation(format!(
                            "rewrite failed, keeping previous query: {}",
                            e
                        )),
                        Err(interrupted) => {
                            return self.finish_interrupted(&mut state, interrupted).await
                        }
                    }
                    self.advance(&mut state, WorkflowNode::PublishQuery, None).await;
                }

                WorkflowNode::PublishQuery => {
                    self.advance(&mut state, WorkflowNode::AssessNeed, None).await;
                }

                WorkflowNode::AssessNeed => {
                    let query = state.query.current_text.clone();
                    let need = match self
                        .supervised(&cancel, deadline, self.oracle.needs_more_information(&query))
                        .await
                    {
                        Ok(Ok(need)) => need,
                        Ok(Err(e)) => {
                            // Conservative default: proceed toward retrieval
                            state.record_degradation(format!(
                                "retrieval-need decision failed, assuming yes: {}",
                                e
                            ));
                            RetrievalNeed {
                                needs_more: true,
                                reason: "conservative default".to_string(),
                            }
                        }
                        Err(interrupted) => {
                            return self.finish_interrupted(&mut state, interrupted).await
                        }
                    };

                    if need.needs_more {
                        self.advance(
                            &mut state,
                            WorkflowNode::ChooseSource,
                            Some(format!("yes: {}", need.reason)),
                        )
                        .await;
                    } else {
                        let decision = format!("no: {}", need.reason);
                        if let Some(outcome) = self
                            .enter_loopback(&mut state, NO_RETRIEVAL_HINT.to_string(), decision)
                            .await
                        {
                            return outcome;
                        }
                    }
                }

                WorkflowNode::ChooseSource => {
                    let query = state.query.current_text.clone();
                    let kind = match self
                        .supervised(&cancel, deadline, self.oracle.choose_source(&query))
                        .await
                    {
                        Ok(Ok(kind)) => kind,
                        Ok(Err(e)) => {
                            state.record_degradation(format!(
                                "source selection failed, defaulting to knowledge store: {}",
                                e
                            ));
                            SourceKind::KnowledgeStore
                        }
                        Err(interrupted) => {
                            return self.finish_interrupted(&mut state, interrupted).await
                        }
                    };

                    state.last_source = Some(kind);
                    self.advance(
                        &mut state,
                        WorkflowNode::Retrieve,
                        Some(kind.label().to_string()),
                    )
                    .await;
                }

                WorkflowNode::Retrieve => {
                    let query = state.query.current_text.clone();
                    let kind = state.last_source.unwrap_or(SourceKind::KnowledgeStore);
                    let result = match self
                        .supervised(&cancel, deadline, self.retriever.retrieve(&query, kind, None))
                        .await
                    {
                        Ok(result) => result,
                        Err(interrupted) => {
                            return self.finish_interrupted(&mut state, interrupted).await
                        }
                    };

                    if result.is_failure() {
                        if let Some(error) = result.raw_metadata.get("error") {
                            state.record_degradation(format!(
                                "retrieval from {} failed: {}",
                                kind, error
                            ));
                        }
                    }

                    compiled = self.compiler.compile(&[result]);
                    self.advance(&mut state, WorkflowNode::CompileContext, None).await;
                }

                WorkflowNode::CompileContext => {
                    self.advance(&mut state, WorkflowNode::EnhanceQuery, None).await;
                }

                WorkflowNode::EnhanceQuery => {
                    self.advance(&mut state, WorkflowNode::GenerateAnswer, None).await;
                }

                WorkflowNode::GenerateAnswer => {
                    let query = state.query.current_text.clone();
                    answer = match self
                        .supervised(&cancel, deadline, self.oracle.answer(&query, &compiled))
                        .await
                    {
                        Ok(Ok(text)) => text,
                        Ok(Err(e)) => {
                            state.record_degradation(format!("answer generation failed: {}", e));
                            String::new()
                        }
                        Err(interrupted) => {
                            return self.finish_interrupted(&mut state, interrupted).await
                        }
                    };
                    self.advance(&mut state, WorkflowNode::GradeAnswer, None).await;
                }

                WorkflowNode::GradeAnswer => {
                    let grading = if answer.trim().is_empty() {
                        GradingResult::rejected("no answer generated")
                    } else {
                        let query = state.query.current_text.clone();
                        let threshold = state.acceptance_threshold;
                        let last_source = state.last_source;
                        match self
                            .supervised(
                                &cancel,
                                deadline,
                                self.grader
                                    .grade(&query, &compiled, &answer, threshold, last_source),
                            )
                            .await
                        {
                            Ok(Ok(grading)) => grading,
                            Ok(Err(e)) => {
                                // Conservative default: reject and loop back
                                state.record_degradation(format!(
                                    "grading failed, rejecting answer: {}",
                                    e
                                ));
                                GradingResult::rejected(format!("grading unavailable: {}", e))
                            }
                            Err(interrupted) => {
                                return self.finish_interrupted(&mut state, interrupted).await
                            }
                        }
                    };

                    if !answer.trim().is_empty() && grading.overall > 0.0 {
                        state.offer_candidate(Candidate {
                            answer: answer.clone(),
                            grading: grading.clone(),
                            sources: compiled.source_ids(),
                            retrieval_method: retrieval_method(&state),
                            produced_at_retry: state.retry_count,
                        });
                    }

                    if !grading.needs_improvement {
                        state.status = RunStatus::Accepted;
                        self.advance(&mut state, WorkflowNode::Accept, Some("yes".to_string()))
                            .await;
                        return Ok(accepted_response(&state, grading, &answer, &compiled));
                    }

                    let hint = derive_hint(&grading);
                    let decision = format!("no: {}", grading.improvement_reason);
                    if let Some(outcome) = self.enter_loopback(&mut state, hint, decision).await {
                        return outcome;
                    }
                }

                WorkflowNode::Accept | WorkflowNode::Loopback => {
                    // Both are resolved at their decision sites above
                    unreachable!("terminal nodes never appear at the top of the loop");
                }
            }
        }
    }

    /// Record the transition to `to` and publish the resulting snapshot
    async fn advance(
        &self,
        state: &mut WorkflowState,
        to: WorkflowNode,
        decision: Option<String>,
    ) {
        state.record_transition(to, decision);
        self.publish(state).await;
    }

    async fn publish(&self, state: &WorkflowState) {
        self.store.put(state.clone()).await;
    }

    /// Enter the loopback node. Loops back when retries remain: the
    /// traversal back to the rewrite node is folded, so the retry counter
    /// and hint are applied and the re-entry is published without a history
    /// append, keeping the history bound at `9 * (max_retries + 1) + 1`.
    /// Returns the terminal outcome otherwise.
    async fn enter_loopback(
        &self,
        state: &mut WorkflowState,
        hint: String,
        decision: String,
    ) -> Option<Result<FinalResponse>> {
        if state.retry_count < state.max_retries {
            self.advance(state, WorkflowNode::Loopback, Some(decision)).await;
            state.retry_count += 1;
            state.query.enhancement_hints.push(hint);
            state.current_node = WorkflowNode::RewriteQuery;
            tracing::debug!(
                query_id = %state.query_id,
                "loopback, retry {}/{}",
                state.retry_count,
                state.max_retries
            );
            self.publish(state).await;
            return None;
        }

        match state.best_candidate.clone() {
            Some(best) => {
                state.status = RunStatus::FallbackAccepted;
                self.advance(state, WorkflowNode::Loopback, Some(decision)).await;
                Some(Ok(fallback_response(state, best, "max_retries_reached")))
            }
            None => {
                state.status = RunStatus::Exhausted;
                self.advance(state, WorkflowNode::Loopback, Some(decision)).await;
                let cause = state
                    .degradations
                    .last()
                    .cloned()
                    .unwrap_or_else(|| "no gradable answer produced".to_string());
                Some(Err(NoesisError::WorkflowExhausted(cause)))
            }
        }
    }

    /// Await an operation while watching for cancellation and the deadline
    async fn supervised<T>(
        &self,
        cancel: &CancellationToken,
        deadline: Instant,
        operation: impl Future<Output = T>,
    ) -> std::result::Result<T, Interrupted> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Interrupted::Cancelled),
            _ = tokio::time::sleep_until(deadline) => Err(Interrupted::Deadline),
            value = operation => Ok(value),
        }
    }

    /// Terminate a run that was interrupted between nodes
    async fn finish_interrupted(
        &self,
        state: &mut WorkflowState,
        interrupted: Interrupted,
    ) -> Result<FinalResponse> {
        if let Interrupted::Deadline = interrupted {
            // The deadline yields the best candidate when one exists
            if let Some(best) = state.best_candidate.clone() {
                state.status = RunStatus::FallbackAccepted;
                self.publish(state).await;
                return Ok(fallback_response(state, best, "wall_clock_timeout"));
            }
        }

        state.status = RunStatus::Cancelled;
        self.publish(state).await;
        Err(NoesisError::WorkflowCancelled)
    }
}

fn retrieval_method(state: &WorkflowState) -> String {
    state
        .last_source
        .map(|kind| kind.label().to_string())
        .unwrap_or_else(|| "none".to_string())
}

fn accepted_response(
    state: &WorkflowState,
    grading: GradingResult,
    answer: &str,
    compiled: &CompiledContext,
) -> FinalResponse {
    FinalResponse {
        answer: answer.to_string(),
        confidence: grading.overall,
        sources: compiled.source_ids(),
        metadata: ResponseMetadata {
            retrieval_method: retrieval_method(state),
            query_rewrites: state.retry_count + 1,
            completed_at_node: WorkflowNode::Accept.number(),
            degraded: !state.degradations.is_empty(),
            notes: state.degradations.clone(),
        },
        grading_scores: grading,
    }
}

fn fallback_response(state: &WorkflowState, best: Candidate, note: &str) -> FinalResponse {
    let mut notes = state.degradations.clone();
    notes.push(note.to_string());
    FinalResponse {
        answer: best.answer,
        confidence: best.grading.overall,
        sources: best.sources,
        metadata: ResponseMetadata {
            retrieval_method: best.retrieval_method,
            query_rewrites: state.retry_count + 1,
            completed_at_node: WorkflowNode::Loopback.number(),
            degraded: true,
            notes,
        },
        grading_scores: best.grading,
    }
}

/// Derive a loopback hint from the grader's feedback
fn derive_hint(grading: &GradingResult) -> String {
    let reason = grading.improvement_reason.to_lowercase();
    if reason.is_empty() {
        return "the previous answer fell below the acceptance threshold; reformulate the query"
            .to_string();
    }
    if reason.contains("specific") {
        "request more specific detail".to_string()
    } else if reason.contains("context") || reason.contains("relevant") {
        "broaden the query so retrieval surfaces more comprehensive context".to_string()
    } else if reason.contains("recent") || reason.contains("current") {
        "emphasize current, up-to-date information".to_string()
    } else if reason.contains("faithfulness") || reason.contains("hallucination") {
        "restrict the query to verifiable facts".to_string()
    } else {
        format!("address the grader's feedback: {}", grading.improvement_reason)
    }
}
