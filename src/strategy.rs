//! Search strategies and the automatic strategy decision.
//!
//! `auto` probes the knowledge base first, then picks a concrete strategy
//! from the probe's result count and confidence. The decision itself is a
//! pure function so the thresholds can be tested without any I/O.

use serde::{Deserialize, Serialize};

use crate::config::StrategyConfig;

/// How a query sources its evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Knowledge base only.
    KnowledgeOnly,
    /// Web search only.
    WebOnly,
    /// Both sources, fused.
    Hybrid,
    /// Probe the knowledge base, then decide.
    Auto,
    /// No retrieval at all; the caller answers from the model alone.
    None,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategy::KnowledgeOnly => "knowledge_only",
            SearchStrategy::WebOnly => "web_only",
            SearchStrategy::Hybrid => "hybrid",
            SearchStrategy::Auto => "auto",
            SearchStrategy::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<SearchStrategy> {
        match s {
            "knowledge_only" => Some(SearchStrategy::KnowledgeOnly),
            "web_only" => Some(SearchStrategy::WebOnly),
            "hybrid" => Some(SearchStrategy::Hybrid),
            "auto" => Some(SearchStrategy::Auto),
            "none" => Some(SearchStrategy::None),
            _ => None,
        }
    }
}

/// Outcome of resolving `auto` against a knowledge probe. The chosen
/// strategy is always concrete (never `Auto`), and the reasoning explains
/// the choice in terms of what the probe actually found.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyDecision {
    pub strategy: SearchStrategy,
    pub reasoning: String,
}

/// Pick a concrete strategy from the knowledge probe.
///
/// - No results at all: the knowledge base has nothing to offer, go to the
///   web alone.
/// - At least `min_results` hits with a top score at or above
///   `high_confidence`: the knowledge base is authoritative, skip the web.
/// - Anything in between: fuse both sources.
pub fn decide(
    knowledge_count: usize,
    top_score: Option<f32>,
    config: &StrategyConfig,
) -> StrategyDecision {
    if knowledge_count == 0 {
        return StrategyDecision {
            strategy: SearchStrategy::WebOnly,
            reasoning: "no knowledge base results above the similarity threshold; \
                        falling back to web search"
                .to_string(),
        };
    }

    let top = top_score.unwrap_or(0.0);
    if knowledge_count >= config.min_results && top >= config.high_confidence {
        return StrategyDecision {
            strategy: SearchStrategy::KnowledgeOnly,
            reasoning: format!(
                "{knowledge_count} knowledge results with top score {top:.2} \
                 (>= {:.2}); knowledge base is sufficient",
                config.high_confidence
            ),
        };
    }

    StrategyDecision {
        strategy: SearchStrategy::Hybrid,
        reasoning: format!(
            "{knowledge_count} knowledge results with top score {top:.2}; \
             supplementing with web search"
        ),
    }
}
