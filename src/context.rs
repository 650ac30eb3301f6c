//! Context compilation
//!
//! Merges heterogeneous retrieval results into a single ranked, attributed
//! bundle for answer generation. The compiler is pure: no I/O, no clock.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::config::ContextConfig;
use crate::retrieval::{RetrievalResult, SourceKind};

/// One citable unit of evidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    /// Evidence text
    pub text: String,

    /// Stable identifier within `source_kind`
    pub source_id: String,

    /// The backend kind that produced this item
    pub source_kind: SourceKind,

    /// Relevance score; higher is more relevant
    pub score: f32,

    /// Entities the source associated with this item
    #[serde(default)]
    pub entities: Vec<String>,

    /// Retrieval mode, e.g. `local`/`global`/`hybrid` for knowledge stores
    #[serde(default)]
    pub mode: Option<String>,
}

impl ContextItem {
    /// Create a new context item
    pub fn new(
        source_kind: SourceKind,
        source_id: impl Into<String>,
        text: impl Into<String>,
        score: f32,
    ) -> Self {
        Self {
            text: text.into(),
            source_id: source_id.into(),
            source_kind,
            score,
            entities: Vec::new(),
            mode: None,
        }
    }

    /// Attach entities
    pub fn with_entities(mut self, entities: Vec<String>) -> Self {
        self.entities = entities;
        self
    }

    /// Attach the retrieval mode
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }
}

/// Ranked, deduplicated context bundle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompiledContext {
    /// Items sorted by effective rank
    pub ordered_items: Vec<ContextItem>,

    /// Count of retained items per source kind
    pub source_mix: BTreeMap<SourceKind, usize>,
}

impl CompiledContext {
    /// Whether compilation produced no usable evidence.
    ///
    /// Downstream nodes must treat this as a valid state: answer generation
    /// is still attempted, the grader just tends to reject the result.
    pub fn is_empty(&self) -> bool {
        self.ordered_items.is_empty()
    }

    /// Distinct source identifiers, in rank order
    pub fn source_ids(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut ids = Vec::new();
        for item in &self.ordered_items {
            if seen.insert(item.source_id.clone()) {
                ids.push(item.source_id.clone());
            }
        }
        ids
    }

    /// Render the bundle as a prompt block, one attributed entry per item
    pub fn as_prompt_block(&self) -> String {
        if self.is_empty() {
            return "(no retrieved context)".to_string();
        }

        let mut block = String::new();
        for (i, item) in self.ordered_items.iter().enumerate() {
            block.push_str(&format!(
                "[{}] (source: {}) {}\n",
                i + 1,
                item.source_id,
                item.text
            ));
        }
        block
    }
}

/// Compiles retrieval results into a [`CompiledContext`]
#[derive(Debug, Clone)]
pub struct ContextCompiler {
    config: ContextConfig,
}

impl ContextCompiler {
    /// Create a compiler with the given budgets
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    /// Compile one or more retrieval results.
    ///
    /// Deduplicates by `(source_kind, source_id)` keeping the higher score,
    /// ranks by descending score with source-kind priority and insertion
    /// order as tie-breakers, then truncates to the configured budgets
    /// keeping the ranked prefix. Attribution is never fused away.
    pub fn compile(&self, results: &[RetrievalResult]) -> CompiledContext {
        let mut items: Vec<ContextItem> = Vec::new();
        let mut index: HashMap<(SourceKind, String), usize> = HashMap::new();

        for result in results {
            for item in &result.items {
                let key = (item.source_kind, item.source_id.clone());
                match index.get(&key) {
                    Some(&at) => {
                        if item.score > items[at].score {
                            items[at] = item.clone();
                        }
                    }
                    None => {
                        index.insert(key, items.len());
                        items.push(item.clone());
                    }
                }
            }
        }

        // Stable sort: equal keys keep insertion order
        items.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.source_kind.priority().cmp(&b.source_kind.priority()))
        });

        let mut ordered_items = Vec::new();
        let mut chars = 0usize;
        for item in items {
            if ordered_items.len() >= self.config.max_items {
                break;
            }
            let item_chars = item.text.chars().count();
            if chars + item_chars > self.config.max_chars {
                break;
            }
            chars += item_chars;
            ordered_items.push(item);
        }

        let mut source_mix = BTreeMap::new();
        for item in &ordered_items {
            *source_mix.entry(item.source_kind).or_insert(0) += 1;
        }

        CompiledContext {
            ordered_items,
            source_mix,
        }
    }
}
