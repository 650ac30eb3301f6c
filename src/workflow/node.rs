//! The twelve-node workflow graph
//!
//! Nodes are a closed enum; the legal edge set is defined here and nowhere
//! else. The engine may only move along these edges.

use serde::{Deserialize, Serialize};

/// A node in the workflow graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowNode {
    /// N1: run start
    Start,
    /// N2: rewrite the query
    RewriteQuery,
    /// N3: publish the updated query
    PublishQuery,
    /// N4: decide whether retrieval is needed
    AssessNeed,
    /// N5: choose the retrieval source
    ChooseSource,
    /// N6: retrieve from the chosen source
    Retrieve,
    /// N7: publish the compiled context
    CompileContext,
    /// N8: publish the query enhanced with context
    EnhanceQuery,
    /// N9: generate the answer
    GenerateAnswer,
    /// N10: decide whether the answer is acceptable
    GradeAnswer,
    /// N11: terminal acceptance
    Accept,
    /// N12: loop back with a hint, or terminate on exhausted retries
    Loopback,
}

impl WorkflowNode {
    /// Node number, 1 through 12
    pub fn number(&self) -> u8 {
        match self {
            WorkflowNode::Start => 1,
            WorkflowNode::RewriteQuery => 2,
            WorkflowNode::PublishQuery => 3,
            WorkflowNode::AssessNeed => 4,
            WorkflowNode::ChooseSource => 5,
            WorkflowNode::Retrieve => 6,
            WorkflowNode::CompileContext => 7,
            WorkflowNode::EnhanceQuery => 8,
            WorkflowNode::GenerateAnswer => 9,
            WorkflowNode::GradeAnswer => 10,
            WorkflowNode::Accept => 11,
            WorkflowNode::Loopback => 12,
        }
    }

    /// Legal successor nodes
    pub fn successors(&self) -> &'static [WorkflowNode] {
        use WorkflowNode::*;
        match self {
            Start => &[RewriteQuery],
            RewriteQuery => &[PublishQuery],
            PublishQuery => &[AssessNeed],
            AssessNeed => &[ChooseSource, Loopback],
            ChooseSource => &[Retrieve],
            Retrieve => &[CompileContext],
            CompileContext => &[EnhanceQuery],
            EnhanceQuery => &[GenerateAnswer],
            GenerateAnswer => &[GradeAnswer],
            GradeAnswer => &[Accept, Loopback],
            Accept => &[],
            Loopback => &[RewriteQuery],
        }
    }

    /// Whether `from -> to` is in the legal edge set
    pub fn is_legal_edge(from: WorkflowNode, to: WorkflowNode) -> bool {
        from.successors().contains(&to)
    }

    /// Whether the node ends the run unconditionally
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowNode::Accept)
    }
}
