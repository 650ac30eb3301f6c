//! Workflow run state and terminal output types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::WorkflowConfig;
use crate::grading::GradingResult;
use crate::retrieval::SourceKind;
use crate::workflow::node::WorkflowNode;

/// The user's query, original and evolving forms
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// Immutable original text
    pub original_text: String,

    /// Rewritten form; mutated only at the rewrite node
    pub current_text: String,

    /// Hints appended on each loopback, oldest first
    pub enhancement_hints: Vec<String>,
}

impl Query {
    /// Create a query from the original text
    pub fn new(original_text: impl Into<String>) -> Self {
        let original_text = original_text.into();
        Self {
            current_text: original_text.clone(),
            original_text,
            enhancement_hints: Vec::new(),
        }
    }
}

/// One traversed edge in the workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTransition {
    pub from_node: WorkflowNode,
    pub to_node: WorkflowNode,
    /// Branch decision, when the edge came out of a decision node
    pub decision: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Run status carried in every snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Accepted at the terminal node
    Accepted,
    /// Retries exhausted; best-seen answer emitted
    FallbackAccepted,
    /// Retries exhausted with no gradable answer
    Exhausted,
    /// Cooperative cancellation or wall-clock timeout without a candidate
    Cancelled,
}

impl RunStatus {
    /// Whether the run has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Best graded answer seen so far, retained for the fallback contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub answer: String,
    pub grading: GradingResult,
    pub sources: Vec<String>,
    pub retrieval_method: String,
    /// Retry counter value when this answer was produced
    pub produced_at_retry: u32,
}

/// Full state of one workflow run; snapshots are clones of this value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub query_id: Uuid,
    pub query: Query,
    pub current_node: WorkflowNode,
    pub retry_count: u32,
    pub max_retries: u32,
    pub acceptance_threshold: f32,
    pub started_at: DateTime<Utc>,
    pub history: Vec<NodeTransition>,
    pub status: RunStatus,
    /// Source used by the most recent retrieval
    pub last_source: Option<SourceKind>,
    pub best_candidate: Option<Candidate>,
    /// Recoverable failures applied as conservative defaults, in order
    pub degradations: Vec<String>,
}

impl WorkflowState {
    /// Create the initial state at the start node
    pub fn new(query_id: Uuid, original_text: impl Into<String>, config: &WorkflowConfig) -> Self {
        Self {
            query_id,
            query: Query::new(original_text),
            current_node: WorkflowNode::Start,
            retry_count: 0,
            max_retries: config.max_retries,
            acceptance_threshold: config.acceptance_threshold,
            started_at: Utc::now(),
            history: Vec::new(),
            status: RunStatus::Running,
            last_source: None,
            best_candidate: None,
            degradations: Vec::new(),
        }
    }

    /// Record a traversal of `current_node -> to` and make `to` current.
    ///
    /// Panics in debug builds if the edge is not in the legal set; the
    /// engine is the only caller and never constructs an illegal edge.
    pub fn record_transition(&mut self, to: WorkflowNode, decision: Option<String>) {
        debug_assert!(
            WorkflowNode::is_legal_edge(self.current_node, to),
            "illegal workflow edge {:?} -> {:?}",
            self.current_node,
            to
        );
        self.history.push(NodeTransition {
            from_node: self.current_node,
            to_node: to,
            decision,
            timestamp: Utc::now(),
        });
        self.current_node = to;
    }

    /// Keep `candidate` if it grades higher than the current best
    pub fn offer_candidate(&mut self, candidate: Candidate) {
        let better = match &self.best_candidate {
            Some(best) => candidate.grading.overall > best.grading.overall,
            None => true,
        };
        if better {
            self.best_candidate = Some(candidate);
        }
    }

    /// Record a recoverable failure that was absorbed by a default
    pub fn record_degradation(&mut self, note: impl Into<String>) {
        let note = note.into();
        tracing::warn!(query_id = %self.query_id, "workflow degradation: {}", note);
        self.degradations.push(note);
    }

    /// Node numbers visited so far, starting with the initial node
    pub fn visited_numbers(&self) -> Vec<u8> {
        let mut numbers = vec![WorkflowNode::Start.number()];
        numbers.extend(self.history.iter().map(|t| t.to_node.number()));
        numbers
    }
}

/// Metadata attached to a terminal response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Source kind used for the answer's retrieval, or `none`
    pub retrieval_method: String,

    /// Number of rewrite passes, i.e. final retry count plus one
    pub query_rewrites: u32,

    /// 11 for acceptance, 12 for the fallback path
    pub completed_at_node: u8,

    /// Whether the response was produced under degraded conditions
    pub degraded: bool,

    /// Degradation notes, in the order they occurred
    pub notes: Vec<String>,
}

/// Terminal output of a workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResponse {
    pub answer: String,

    /// Equal to the overall grade of the emitted answer
    pub confidence: f32,

    /// Distinct source identifiers cited by the answer's context
    pub sources: Vec<String>,

    pub metadata: ResponseMetadata,

    pub grading_scores: GradingResult,
}
