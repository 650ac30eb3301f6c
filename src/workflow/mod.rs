//! Workflow state machine
//!
//! The twelve-node graph, its per-run state, and the engine that drives a
//! query from rewrite through retrieval, generation, and self-grading to a
//! terminal response.

mod engine;
mod node;
mod state;

pub use engine::WorkflowEngine;
pub use node::WorkflowNode;
pub use state::{
    Candidate, FinalResponse, NodeTransition, Query, ResponseMetadata, RunStatus, WorkflowState,
};
