// Swarm Gate - Gate Controller (Primary Enforcement Point)
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Every advertised tool list is produced here. Full catalog in, filter
// pipeline applied in order, stages that changed the set reported out.
// No hidden state: same catalog + config + context = same answer.

use crate::budget::{BudgetError, ContextLimits, SizeEstimator, TokenCounter};
use crate::catalog::{Catalog, ToolSet};
use crate::config::{FilterConfig, GatingPolicy};
use crate::filter::{self, FilterContext, ToolFilter};
use std::sync::Arc;

/// Result of one pass through the pipeline.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub tools: ToolSet,
    /// Names of stages whose output differed from their input.
    pub filters_applied: Vec<&'static str>,
}

impl GateOutcome {
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }
}

pub struct GateController {
    catalog: Arc<Catalog>,
    config: FilterConfig,
    policy: GatingPolicy,
    filters: Vec<Box<dyn ToolFilter>>,
    estimator: SizeEstimator,
}

impl GateController {
    pub fn new(
        catalog: Arc<Catalog>,
        config: FilterConfig,
        policy: GatingPolicy,
        counter: Box<dyn TokenCounter>,
        limits: ContextLimits,
    ) -> Self {
        let filters = filter::pipeline(&config, policy);
        let estimator = SizeEstimator::new(&catalog, counter, limits);
        log::info!(
            "Gate ready: {} tools, {} filter stages, max_tools={}",
            catalog.len(),
            filters.len(),
            config.max_tools
        );
        Self {
            catalog,
            config,
            policy,
            filters,
            estimator,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn policy(&self) -> GatingPolicy {
        self.policy
    }

    /// Run the pipeline from the full catalog.
    pub fn get_available_tools(&self, ctx: &FilterContext) -> GateOutcome {
        let mut tools = self.catalog.get_all();
        let mut filters_applied = Vec::new();

        for stage in &self.filters {
            let before: Vec<String> = tools.keys().cloned().collect();
            tools = stage.apply(tools, ctx);
            if !tools.keys().eq(before.iter()) {
                filters_applied.push(stage.name());
            }
        }

        log::debug!(
            "[{}] gate: {} of {} tools after {:?}",
            ctx.request_id,
            tools.len(),
            self.catalog.len(),
            filters_applied
        );
        GateOutcome {
            tools,
            filters_applied,
        }
    }

    pub fn get_context_size(&self, tools: &ToolSet) -> Result<usize, BudgetError> {
        self.estimator.check(tools)
    }

    pub fn estimator(&self) -> &SizeEstimator {
        &self.estimator
    }

    /// Every catalog name, unfiltered. Diagnostics only.
    pub fn list_active_tools(&self) -> Vec<String> {
        self.catalog.names()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::CharRatioCounter;
    use crate::catalog::fixtures::{abc, catalog, def};
    use crate::catalog::META_OPS;

    fn gate(cat: Catalog, config: FilterConfig, policy: GatingPolicy) -> GateController {
        GateController::new(
            Arc::new(cat),
            config,
            policy,
            Box::new(CharRatioCounter),
            ContextLimits::default(),
        )
    }

    fn x_config(max_tools: usize, blocklist: &[&str]) -> FilterConfig {
        let mut config = FilterConfig {
            max_tools,
            blocklist: blocklist.iter().map(|s| s.to_string()).collect(),
            ..FilterConfig::default()
        };
        config.task_type_allowlists.insert("x".into(), vec!["A".into(), "B".into()]);
        config
    }

    fn task(t: &str) -> FilterContext {
        FilterContext {
            task_type: Some(t.into()),
            ..FilterContext::new("req")
        }
    }

    #[test]
    fn truncation_keeps_highest_priority() {
        let g = gate(abc(), x_config(1, &[]), GatingPolicy::default());
        let out = g.get_available_tools(&task("x"));
        assert_eq!(out.names(), vec!["B"]);
        assert_eq!(out.filters_applied, vec!["TaskTypeFilter", "ResourceFilter"]);
    }

    #[test]
    fn blocklist_applies_after_truncation() {
        let g = gate(abc(), x_config(10, &["B"]), GatingPolicy::default());
        let out = g.get_available_tools(&task("x"));
        assert_eq!(out.names(), vec!["A"]);
        assert_eq!(out.filters_applied, vec!["TaskTypeFilter", "SecurityFilter"]);
    }

    #[test]
    fn blocked_tool_never_appears() {
        let g = gate(abc(), x_config(10, &["B", "C"]), GatingPolicy::default());
        let contexts = [
            FilterContext::new("r"),
            task("x"),
            task("y"),
            task("unknown"),
            FilterContext {
                query: Some("q".into()),
                detected_task_types: Some(vec![]),
                ..FilterContext::new("r")
            },
        ];
        for ctx in &contexts {
            let out = g.get_available_tools(ctx);
            assert!(!out.tools.contains_key("B"), "B leaked for {:?}", ctx);
            assert!(!out.tools.contains_key("C"), "C leaked for {:?}", ctx);
        }
    }

    #[test]
    fn repeated_calls_are_deterministic() {
        let cat = catalog((0..30).map(|i| def(&format!("t{i:02}"), &["x"], i % 4)).collect());
        let mut config = FilterConfig { max_tools: 7, ..FilterConfig::default() };
        config.task_type_allowlists.insert("x".into(), cat.names());
        let g = gate(cat, config, GatingPolicy::default());
        let first = g.get_available_tools(&task("x"));
        for _ in 0..10 {
            let again = g.get_available_tools(&task("x"));
            assert_eq!(again.names(), first.names());
            assert_eq!(again.filters_applied, first.filters_applied);
        }
        assert_eq!(first.tools.len(), 7);
    }

    #[test]
    fn default_view_vs_explicit_meta_ops() {
        let cat = catalog(vec![def("a", &["x"], 0), def("discover-tools", &[META_OPS], 0)]);
        let mut config = FilterConfig::default();
        config.task_type_allowlists.insert(META_OPS.into(), vec!["discover-tools".into()]);
        let g = gate(cat, config, GatingPolicy::default());

        let default = g.get_available_tools(&FilterContext::new("r"));
        assert_eq!(default.names(), vec!["a"]);
        let meta = g.get_available_tools(&task(META_OPS));
        assert_eq!(meta.names(), vec!["discover-tools"]);
    }

    #[test]
    fn unchanged_set_reports_no_stages() {
        let g = gate(abc(), FilterConfig::default(), GatingPolicy::default());
        let out = g.get_available_tools(&FilterContext::new("r"));
        assert_eq!(out.tools.len(), 3);
        assert!(out.filters_applied.is_empty());
        assert_eq!(g.list_active_tools(), vec!["A", "B", "C"]);
    }

    #[test]
    fn context_size_delegates_to_estimator() {
        let g = gate(abc(), FilterConfig::default(), GatingPolicy::default());
        let all = g.catalog().get_all();
        assert_eq!(g.get_context_size(&all).unwrap(), g.estimator().size_of(&all));
    }
}
