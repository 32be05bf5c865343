// Swarm Gate - Context Budget
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Approximate token cost of an advertised tool list. Per-tool costs are
// computed once after catalog load; a filtered set costs the sum of its
// members. Two thresholds: warn (log only) and hard (error when strict).

use crate::catalog::{Catalog, Tool, ToolSet};
use std::collections::HashMap;
use thiserror::Error;

/// Characters per token for the fallback estimate.
pub const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BudgetError {
    #[error("tool list context size {size} exceeds hard limit {limit}")]
    HardLimit { size: usize, limit: usize },
}

/// Token counting strategy.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    fn method(&self) -> &'static str;
}

/// Serialized length / 4.
#[derive(Debug, Default, Clone, Copy)]
pub struct CharRatioCounter;

impl TokenCounter for CharRatioCounter {
    fn count(&self, text: &str) -> usize {
        text.chars().count() / CHARS_PER_TOKEN
    }

    fn method(&self) -> &'static str {
        "char_ratio"
    }
}

/// Exact counts from a HuggingFace `tokenizer.json`.
#[cfg(feature = "hf-tokenizer")]
pub struct HfTokenCounter {
    tokenizer: tokenizers::Tokenizer,
}

#[cfg(feature = "hf-tokenizer")]
impl HfTokenCounter {
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let tokenizer = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer {:?}: {e}", path))?;
        Ok(Self { tokenizer })
    }
}

#[cfg(feature = "hf-tokenizer")]
impl TokenCounter for HfTokenCounter {
    fn count(&self, text: &str) -> usize {
        match self.tokenizer.encode(text, false) {
            Ok(encoding) => encoding.len(),
            Err(e) => {
                log::debug!("tokenizer failed ({e}), using character estimate");
                CharRatioCounter.count(text)
            }
        }
    }

    fn method(&self) -> &'static str {
        "tokenizer"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimits {
    pub warn: usize,
    pub hard: usize,
    /// Over-hard is an error instead of a log line.
    pub enforce_hard: bool,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            warn: 5000,
            hard: 7600,
            enforce_hard: false,
        }
    }
}

// ============================================================================
// SIZE ESTIMATOR
// ============================================================================

pub struct SizeEstimator {
    counter: Box<dyn TokenCounter>,
    /// `None` when precomputation failed; sizes are then computed live.
    cache: Option<HashMap<String, usize>>,
    limits: ContextLimits,
}

impl SizeEstimator {
    pub fn new(catalog: &Catalog, counter: Box<dyn TokenCounter>, limits: ContextLimits) -> Self {
        let cache = precompute(catalog, counter.as_ref());
        match &cache {
            Some(c) => log::info!(
                "Precomputed context sizes for {} tools ({}), total {} tokens",
                c.len(),
                counter.method(),
                c.values().sum::<usize>()
            ),
            None => log::warn!("Context size precomputation failed, sizes will be computed per request"),
        }
        Self { counter, cache, limits }
    }

    pub fn limits(&self) -> ContextLimits {
        self.limits
    }

    pub fn method(&self) -> &'static str {
        self.counter.method()
    }

    pub fn tool_cost(&self, tool: &Tool) -> usize {
        if let Some(cost) = self.cache.as_ref().and_then(|c| c.get(tool.name())) {
            return *cost;
        }
        match serde_json::to_string(tool) {
            Ok(text) => self.counter.count(&text),
            Err(e) => {
                log::warn!("Could not serialize tool '{}' for sizing: {e}", tool.name());
                0
            }
        }
    }

    pub fn size_of(&self, tools: &ToolSet) -> usize {
        tools.values().map(|t| self.tool_cost(t)).sum()
    }

    /// Size plus threshold enforcement.
    pub fn check(&self, tools: &ToolSet) -> Result<usize, BudgetError> {
        let size = self.size_of(tools);
        if size > self.limits.hard {
            if self.limits.enforce_hard {
                return Err(BudgetError::HardLimit {
                    size,
                    limit: self.limits.hard,
                });
            }
            log::error!(
                "Tool list context size {} exceeds hard limit {} ({} tools); check max_tools",
                size,
                self.limits.hard,
                tools.len()
            );
        } else if size > self.limits.warn {
            log::warn!(
                "Tool list context size {} exceeds warning threshold {} ({} tools)",
                size,
                self.limits.warn,
                tools.len()
            );
        }
        Ok(size)
    }
}

fn precompute(catalog: &Catalog, counter: &dyn TokenCounter) -> Option<HashMap<String, usize>> {
    let mut cache = HashMap::with_capacity(catalog.len());
    for tool in catalog.iter() {
        match serde_json::to_string(tool.as_ref()) {
            Ok(text) => {
                cache.insert(tool.name().to_string(), counter.count(&text));
            }
            Err(e) => {
                log::warn!("Failed to serialize tool '{}': {e}", tool.name());
                return None;
            }
        }
    }
    Some(cache)
}

// ============================================================================
// TESTS
// ============================================================================
