//! Answer quality grading
//!
//! Wraps the oracle's grading operation and enforces the rubric contract:
//! axis scores clamped to [0, 1], an aggregate that never exceeds the
//! weakest axis by more than 0.1, and a routing recommendation derived from
//! whichever axis is weakest.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::context::CompiledContext;
use crate::error::Result;
use crate::oracle::Oracle;
use crate::retrieval::SourceKind;

/// How much the aggregate may exceed the weakest axis
const OVERALL_HEADROOM: f32 = 0.1;

/// Axis scores as returned by the model, before rubric enforcement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawGrade {
    pub relevancy: f32,
    pub faithfulness: f32,
    pub context_quality: f32,
    pub coherence: f32,
    #[serde(default)]
    pub improvement_reason: Option<String>,
}

/// What the workflow should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    RetryRetrieval,
    WebSearch,
    Accept,
    ClarifyQuery,
}

/// Multi-axis rubric score for a generated answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingResult {
    /// Does the answer address the rewritten query?
    pub relevancy: f32,

    /// Is every substantive claim supported by the context?
    pub faithfulness: f32,

    /// Was the compiled context sufficient and on-topic?
    pub context_quality: f32,

    /// Is the answer internally consistent and fluent?
    pub coherence: f32,

    /// Aggregate; never exceeds the weakest axis by more than 0.1
    pub overall: f32,

    /// Whether the answer falls below the acceptance threshold
    pub needs_improvement: bool,

    /// The grader's explanation of what is wrong
    pub improvement_reason: String,

    /// Suggested next step
    pub recommendation: Recommendation,
}

impl GradingResult {
    /// Derive the full rubric result from raw axis scores.
    ///
    /// `last_source` steers the recommendation when context quality is the
    /// weakest axis: a knowledge-store miss retries retrieval, anything else
    /// escalates to web search.
    pub fn derive(raw: &RawGrade, threshold: f32, last_source: Option<SourceKind>) -> Self {
        let relevancy = raw.relevancy.clamp(0.0, 1.0);
        let faithfulness = raw.faithfulness.clamp(0.0, 1.0);
        let context_quality = raw.context_quality.clamp(0.0, 1.0);
        let coherence = raw.coherence.clamp(0.0, 1.0);

        let axes = [relevancy, faithfulness, context_quality, coherence];
        let min_axis = axes.iter().copied().fold(1.0f32, f32::min);
        let mean = axes.iter().sum::<f32>() / axes.len() as f32;
        let overall = mean.min(min_axis + OVERALL_HEADROOM).clamp(0.0, 1.0);

        let needs_improvement = overall < threshold;

        let recommendation = if !needs_improvement {
            Recommendation::Accept
        } else {
            // Route by the weakest axis
            let (weakest, _) = [
                (Recommendation::ClarifyQuery, relevancy),
                (Recommendation::RetryRetrieval, faithfulness),
                (
                    match last_source {
                        Some(SourceKind::KnowledgeStore) => Recommendation::RetryRetrieval,
                        _ => Recommendation::WebSearch,
                    },
                    context_quality,
                ),
                (Recommendation::ClarifyQuery, coherence),
            ]
            .into_iter()
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or((Recommendation::ClarifyQuery, 0.0));
            weakest
        };

        Self {
            relevancy,
            faithfulness,
            context_quality,
            coherence,
            overall,
            needs_improvement,
            improvement_reason: raw.improvement_reason.clone().unwrap_or_default(),
            recommendation,
        }
    }

    /// Synthetic rejection for an answer that was never generated.
    ///
    /// Used by the engine when generation failed or produced nothing; no
    /// oracle call is spent on grading an empty answer.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            relevancy: 0.0,
            faithfulness: 0.0,
            context_quality: 0.0,
            coherence: 0.0,
            overall: 0.0,
            needs_improvement: true,
            improvement_reason: reason.into(),
            recommendation: Recommendation::RetryRetrieval,
        }
    }
}

/// Grades generated answers via the oracle
pub struct Grader {
    oracle: Arc<Oracle>,
}

impl Grader {
    /// Create a grader over the given oracle
    pub fn new(oracle: Arc<Oracle>) -> Self {
        Self { oracle }
    }

    /// Grade an answer against the query and its compiled context.
    ///
    /// # Errors
    ///
    /// Propagates oracle transport and parse failures; the engine maps both
    /// to its conservative rejection default.
    pub async fn grade(
        &self,
        query: &str,
        context: &CompiledContext,
        answer: &str,
        threshold: f32,
        last_source: Option<SourceKind>,
    ) -> Result<GradingResult> {
        let raw = self.oracle.grade(query, context, answer).await?;
        Ok(GradingResult::derive(&raw, threshold, last_source))
    }
}
