//! # Noesis - Agentic Retrieval-Augmented Generation
//!
//! Noesis (Νόησις) drives a language model through a deterministic
//! twelve-node workflow: query rewriting, retrieval-need assessment, source
//! routing, retrieval, context compilation, answer generation, and
//! self-grading, with a bounded loopback budget when quality falls short.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use noesis::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> noesis::Result<()> {
//!     let mut config = NoesisConfig::default();
//!     config.retrieval.knowledge_store_url = Some("http://localhost:9621".into());
//!
//!     let orchestrator = Orchestrator::builder()
//!         .config(config)
//!         .provider(Arc::new(OpenAIProvider::from_env("gpt-4o-mini")?))
//!         .build()?;
//!
//!     let response = orchestrator.process_query("What is machine learning?").await?;
//!     println!("{} (confidence {:.2})", response.answer, response.confidence);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Oracle** ([`oracle::Oracle`]): typed decision and generation calls
//!   against an injected [`llm::LLMProvider`], with transport retry and
//!   strict reply parsing
//! - **Retrieval** ([`retrieval::Retriever`]): one façade over knowledge
//!   store, web search, and tool backends, dispatched by a closed tag;
//!   failures never escape the boundary
//! - **Context** ([`context::ContextCompiler`]): pure dedup/rank/budget
//!   compilation preserving attribution
//! - **Grading** ([`grading::Grader`]): multi-axis rubric with a bounded
//!   aggregate and routing recommendations
//! - **Workflow** ([`workflow::WorkflowEngine`]): the twelve-node state
//!   machine with retry budget, best-candidate fallback, cancellation, and
//!   a wall-clock ceiling
//! - **Session** ([`session::SessionStore`]): ordered snapshot fan-out, the
//!   sole observability surface

pub mod config;
pub mod context;
pub mod error;
pub mod grading;
pub mod llm;
pub mod oracle;
pub mod orchestrator;
pub mod parsing;
pub mod retrieval;
pub mod session;
pub mod workflow;

pub use error::{NoesisError, Result};

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{NoesisConfig, WorkflowOverrides};
    pub use crate::context::{CompiledContext, ContextCompiler, ContextItem};
    pub use crate::error::{NoesisError, Result};
    pub use crate::grading::{GradingResult, Recommendation};
    pub use crate::llm::{LLMProvider, OpenAIProvider};
    pub use crate::oracle::Oracle;
    pub use crate::orchestrator::{Orchestrator, ProcessOptions};
    pub use crate::retrieval::{
        KnowledgeMode, RetrievalResult, Retriever, SourceBackend, SourceKind, ToolCallable,
        ToolRegistry,
    };
    pub use crate::session::SessionStore;
    pub use crate::workflow::{FinalResponse, RunStatus, WorkflowNode, WorkflowState};
}
