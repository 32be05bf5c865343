// Swarm Gate - Filter Pipeline
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Three stages, always applied in this order:
//   TaskTypeFilter -> ResourceFilter -> SecurityFilter
// Each stage is a pure function of (tool set, request context). The
// blocklist runs last so no earlier stage can re-admit a blocked tool.

use crate::catalog::{ToolSet, META_OPS};
use crate::config::{FilterConfig, GatingPolicy, Precedence};
use indexmap::{IndexMap, IndexSet};
use std::collections::HashSet;

/// Per-request parameters threaded through the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterContext {
    pub request_id: String,
    pub session_id: Option<String>,
    /// Explicit single category from params or the X-Task-Type header.
    pub task_type: Option<String>,
    pub query: Option<String>,
    /// `None` = classification did not run; `Some([])` = ran, no match.
    pub detected_task_types: Option<Vec<String>>,
}

impl FilterContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Self::default()
        }
    }

    /// A query was classified and nothing matched.
    pub fn is_no_match(&self) -> bool {
        self.query.is_some() && matches!(&self.detected_task_types, Some(d) if d.is_empty())
    }
}

/// One pipeline stage.
pub trait ToolFilter: Send + Sync {
    /// Stage name reported in `filters_applied`.
    fn name(&self) -> &'static str;

    fn apply(&self, tools: ToolSet, ctx: &FilterContext) -> ToolSet;
}

// ============================================================================
// TASK TYPE FILTER
// ============================================================================

/// Outcome of precedence resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// No query and no explicit task type: the default view.
    Unspecified,
    Types(Vec<String>),
}

pub struct TaskTypeFilter {
    allowlists: IndexMap<String, Vec<String>>,
    policy: GatingPolicy,
}

impl TaskTypeFilter {
    pub fn new(allowlists: IndexMap<String, Vec<String>>, policy: GatingPolicy) -> Self {
        Self { allowlists, policy }
    }

    pub fn resolve(&self, ctx: &FilterContext) -> Resolution {
        let explicit = ctx.task_type.as_ref().map(|t| vec![t.clone()]);
        let detected = ctx.detected_task_types.clone();
        let chosen = match self.policy.precedence {
            Precedence::Intent => detected.or(explicit),
            Precedence::Explicit => explicit.or(detected),
        };
        match chosen {
            Some(types) => Resolution::Types(types),
            None => Resolution::Unspecified,
        }
    }

    fn merged_allowlist(&self, types: &[String]) -> HashSet<&str> {
        types
            .iter()
            .filter_map(|t| self.allowlists.get(t))
            .flatten()
            .map(String::as_str)
            .collect()
    }
}

impl ToolFilter for TaskTypeFilter {
    fn name(&self) -> &'static str {
        "TaskTypeFilter"
    }

    fn apply(&self, mut tools: ToolSet, ctx: &FilterContext) -> ToolSet {
        // Evaluated before precedence: an unmatched query empties the set
        // even when an explicit task type is also present.
        if ctx.is_no_match() && self.policy.restrictive() {
            log::info!(
                "[{}] query matched no task types and fallback is disabled, returning no tools",
                ctx.request_id
            );
            return ToolSet::new();
        }

        let types = match self.resolve(ctx) {
            Resolution::Unspecified => {
                tools.retain(|_, tool| !tool.has_task_type(META_OPS));
                return tools;
            }
            Resolution::Types(types) => types,
        };

        let permitted = self.merged_allowlist(&types);
        if permitted.is_empty() {
            if self.policy.restrictive() {
                log::warn!("[{}] unknown task types {:?}, returning no tools", ctx.request_id, types);
                return ToolSet::new();
            }
            log::warn!("[{}] unknown task types {:?}, returning all tools", ctx.request_id, types);
            return tools;
        }

        tools.retain(|name, tool| {
            permitted.contains(name.as_str()) && types.iter().any(|t| tool.has_task_type(t))
        });
        log::debug!("[{}] task types {:?} -> {} tools", ctx.request_id, types, tools.len());
        tools
    }
}

// ============================================================================
// RESOURCE FILTER
// ============================================================================

pub struct ResourceFilter {
    max_tools: usize,
}

impl ResourceFilter {
    pub fn new(max_tools: usize) -> Self {
        Self { max_tools }
    }
}

impl ToolFilter for ResourceFilter {
    fn name(&self) -> &'static str {
        "ResourceFilter"
    }

    /// Highest priority first, ties by name. Deterministic for any input order.
    fn apply(&self, mut tools: ToolSet, ctx: &FilterContext) -> ToolSet {
        if tools.len() <= self.max_tools {
            return tools;
        }
        let before = tools.len();
        tools.sort_by(|an, a, bn, b| b.priority().cmp(&a.priority()).then_with(|| an.cmp(bn)));
        tools.truncate(self.max_tools);
        log::info!(
            "[{}] truncated tool list from {} to {} (max_tools)",
            ctx.request_id,
            before,
            self.max_tools
        );
        tools
    }
}

// ============================================================================
// SECURITY FILTER
// ============================================================================

pub struct SecurityFilter {
    blocklist: IndexSet<String>,
}

impl SecurityFilter {
    pub fn new(blocklist: impl IntoIterator<Item = String>) -> Self {
        Self {
            blocklist: blocklist.into_iter().collect(),
        }
    }
}

impl ToolFilter for SecurityFilter {
    fn name(&self) -> &'static str {
        "SecurityFilter"
    }

    fn apply(&self, mut tools: ToolSet, ctx: &FilterContext) -> ToolSet {
        let before = tools.len();
        tools.retain(|name, _| !self.blocklist.contains(name));
        if tools.len() != before {
            log::debug!("[{}] blocklist removed {} tools", ctx.request_id, before - tools.len());
        }
        tools
    }
}

/// Standard pipeline in its fixed order.
pub fn pipeline(config: &FilterConfig, policy: GatingPolicy) -> Vec<Box<dyn ToolFilter>> {
    vec![
        Box::new(TaskTypeFilter::new(config.task_type_allowlists.clone(), policy)),
        Box::new(ResourceFilter::new(config.max_tools)),
        Box::new(SecurityFilter::new(config.blocklist.iter().cloned())),
    ]
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::{abc, catalog, def};

    fn allow(pairs: &[(&str, &[&str])]) -> IndexMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(t, ns)| (t.to_string(), ns.iter().map(|n| n.to_string()).collect()))
            .collect()
    }

    fn names(tools: &ToolSet) -> Vec<&str> {
        tools.keys().map(String::as_str).collect()
    }

    fn ctx_task(t: &str) -> FilterContext {
        FilterContext {
            task_type: Some(t.into()),
            ..FilterContext::new("t")
        }
    }

    fn ctx_query(q: &str, detected: &[&str]) -> FilterContext {
        FilterContext {
            query: Some(q.into()),
            detected_task_types: Some(detected.iter().map(|s| s.to_string()).collect()),
            ..FilterContext::new("t")
        }
    }

    fn strict() -> GatingPolicy {
        GatingPolicy { strict: true, ..GatingPolicy::default() }
    }

    #[test]
    fn default_view_hides_meta_ops() {
        let cat = catalog(vec![def("a", &["x"], 0), def("help", &[META_OPS], 0)]);
        let f = TaskTypeFilter::new(allow(&[(META_OPS, &["help"])]), GatingPolicy::default());
        assert_eq!(names(&f.apply(cat.get_all(), &FilterContext::new("t"))), vec!["a"]);
        assert_eq!(names(&f.apply(cat.get_all(), &ctx_task(META_OPS))), vec!["help"]);
    }

    #[test]
    fn double_condition_allowlist_and_declared_type() {
        // C is allowlisted for x but only declares y.
        let f = TaskTypeFilter::new(allow(&[("x", &["A", "C"])]), GatingPolicy::default());
        assert_eq!(names(&f.apply(abc().get_all(), &ctx_task("x"))), vec!["A"]);
    }

    #[test]
    fn multiple_types_merge_allowlists() {
        let f = TaskTypeFilter::new(allow(&[("x", &["A"]), ("y", &["C"])]), GatingPolicy::default());
        let out = f.apply(abc().get_all(), &ctx_query("q", &["x", "y"]));
        assert_eq!(names(&out), vec!["A", "C"]);
    }

    #[test]
    fn unknown_task_type_fallback() {
        let permissive = TaskTypeFilter::new(allow(&[("x", &["A"])]), GatingPolicy::default());
        assert_eq!(permissive.apply(abc().get_all(), &ctx_task("zzz")).len(), 3);

        let restrictive = TaskTypeFilter::new(allow(&[("x", &["A"])]), strict());
        assert!(restrictive.apply(abc().get_all(), &ctx_task("zzz")).is_empty());

        let no_fallback = GatingPolicy { fallback_to_all: false, ..GatingPolicy::default() };
        let f = TaskTypeFilter::new(allow(&[("x", &["A"])]), no_fallback);
        assert!(f.apply(abc().get_all(), &ctx_task("zzz")).is_empty());
    }

    #[test]
    fn strict_no_match_short_circuits_even_with_explicit_type() {
        let policy = GatingPolicy { precedence: Precedence::Explicit, ..strict() };
        let f = TaskTypeFilter::new(allow(&[("x", &["A", "B"])]), policy);
        let mut ctx = ctx_query("zzznonsense", &[]);
        ctx.task_type = Some("x".into());
        assert!(f.apply(abc().get_all(), &ctx).is_empty());
    }

    #[test]
    fn permissive_no_match_returns_everything() {
        let f = TaskTypeFilter::new(allow(&[("x", &["A", "B"])]), GatingPolicy::default());
        assert_eq!(f.apply(abc().get_all(), &ctx_query("zzz", &[])).len(), 3);
    }

    #[test]
    fn precedence_switch() {
        let lists = allow(&[("x", &["A", "B"]), ("y", &["C"])]);
        let mut ctx = ctx_query("q", &["y"]);
        ctx.task_type = Some("x".into());

        let intent = TaskTypeFilter::new(lists.clone(), GatingPolicy::default());
        assert_eq!(intent.resolve(&ctx), Resolution::Types(vec!["y".into()]));
        assert_eq!(names(&intent.apply(abc().get_all(), &ctx)), vec!["C"]);

        let explicit = TaskTypeFilter::new(
            lists,
            GatingPolicy { precedence: Precedence::Explicit, ..GatingPolicy::default() },
        );
        assert_eq!(names(&explicit.apply(abc().get_all(), &ctx)), vec!["A", "B"]);
        assert_eq!(explicit.resolve(&FilterContext::new("t")), Resolution::Unspecified);
    }

    #[test]
    fn resource_filter_truncates_by_priority_then_name() {
        let cat = catalog(vec![
            def("d", &["x"], 1),
            def("c", &["x"], 5),
            def("b", &["x"], 5),
            def("a", &["x"], 0),
        ]);
        let f = ResourceFilter::new(2);
        let once = f.apply(cat.get_all(), &FilterContext::new("t"));
        assert_eq!(names(&once), vec!["b", "c"]);
        let twice = f.apply(once.clone(), &FilterContext::new("t"));
        assert_eq!(names(&twice), names(&once));
    }

    #[test]
    fn resource_filter_noop_under_cap_keeps_order() {
        let f = ResourceFilter::new(10);
        assert_eq!(names(&f.apply(abc().get_all(), &FilterContext::new("t"))), vec!["A", "B", "C"]);
    }

    #[test]
    fn security_filter_is_absolute() {
        let f = SecurityFilter::new(vec!["B".to_string(), "ghost".to_string()]);
        assert_eq!(names(&f.apply(abc().get_all(), &FilterContext::new("t"))), vec!["A", "C"]);
    }

    #[test]
    fn pipeline_order_is_fixed() {
        let stages = pipeline(&FilterConfig::default(), GatingPolicy::default());
        let order: Vec<_> = stages.iter().map(|s| s.name()).collect();
        assert_eq!(order, vec!["TaskTypeFilter", "ResourceFilter", "SecurityFilter"]);
    }
}
