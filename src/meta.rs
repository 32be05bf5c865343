// Swarm Gate - Meta Tools and Prompts
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Self-description for LLM clients: the three meta-ops tools and the
// matching prompts/list + prompts/get content. Derived from the filter
// policy, or from catalog task types when no allowlists are configured.

use crate::catalog::{Catalog, META_OPS};
use crate::config::FilterConfig;
use indexmap::{IndexMap, IndexSet};
use serde_json::{json, Value};
use std::sync::Arc;

pub const DISCOVER_TOOLS: &str = "discover-tools";
pub const LIST_TASK_TYPES: &str = "list-task-types";
pub const INTENT_QUERY_HELP: &str = "intent-query-help";

/// Tool names shown per task type in prompt text before eliding.
const PROMPT_SAMPLE: usize = 5;
/// Example tools per task type in the discover-tools payload.
const EXAMPLE_TOOLS: usize = 3;

const QUERY_EXAMPLES: &[(&str, &str, &str)] = &[
    ("Show me running containers", "container-ops", "Container management tools"),
    ("Deploy a compose stack", "compose-ops", "Compose stack tools"),
    ("Scale a service", "service-ops", "Swarm service tools"),
    ("Create a network", "network-ops", "Network management tools"),
    ("Check Docker system info", "system-ops", "System information tools"),
    ("How do I discover tools?", META_OPS, "Discovery and guidance tools"),
];

#[derive(Debug, Clone)]
pub struct Guide {
    catalog: Arc<Catalog>,
    config: FilterConfig,
    classification_enabled: bool,
}

impl Guide {
    pub fn new(catalog: Arc<Catalog>, config: FilterConfig, classification_enabled: bool) -> Self {
        Self {
            catalog,
            config,
            classification_enabled,
        }
    }

    /// Task type -> tool names. Policy allowlists when present, else the
    /// catalog's own tags.
    fn task_type_source(&self) -> (IndexMap<String, Vec<String>>, bool) {
        if self.config.task_type_allowlists.is_empty() {
            (self.catalog.task_type_groups().into_iter().collect(), false)
        } else {
            (self.config.task_type_allowlists.clone(), true)
        }
    }

    // ========================================================================
    // TOOLS
    // ========================================================================

    pub fn discover_tools(&self) -> Value {
        let (source, _) = self.task_type_source();
        let mut task_types: Vec<Value> = source
            .iter()
            .map(|(name, tools)| {
                json!({
                    "name": name,
                    "tool_count": tools.len(),
                    "example_tools": tools.iter().take(EXAMPLE_TOOLS).collect::<Vec<_>>(),
                })
            })
            .collect();
        task_types.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        let guidance = format!(
            "This Docker MCP server exposes {} tools in {} task types. tools/list returns at most {} tools \
             per request. Narrow the list with the task_type parameter, e.g. {{\"task_type\": \"container-ops\"}}, \
             or {{\"task_type\": \"meta-ops\"}} for discovery tools.",
            self.catalog.len(),
            source.len(),
            self.config.max_tools
        );
        json!({
            "guidance": guidance,
            "task_types": task_types,
            "example_request": json!({ "task_type": "container-ops" }).to_string(),
        })
    }

    pub fn list_task_types(&self) -> Value {
        let (source, _) = self.task_type_source();
        let unique: IndexSet<&String> = source.values().flatten().collect();
        let mut names: Vec<&str> = source.keys().map(String::as_str).collect();
        names.sort_unstable();
        json!({
            "task_types": source,
            "total_tools": unique.len(),
            "max_tools_per_request": self.config.max_tools,
            "usage_hint": format!(
                "Pass task_type to tools/list to filter, e.g. {{\"task_type\": \"container-ops\"}}. \
                 Available task types: {}.",
                names.join(", ")
            ),
        })
    }

    pub fn intent_query_help(&self) -> Value {
        let enabled = self.classification_enabled;
        let examples: Vec<Value> = QUERY_EXAMPLES
            .iter()
            .map(|(query, task_type, description)| {
                json!({
                    "query": query,
                    "detected_task_type": task_type,
                    "description": description,
                })
            })
            .collect();
        let mut out = json!({
            "guidance": format!(
                "Pass a natural language query in the 'query' parameter of tools/list. The server detects \
                 the matching task types and returns their tools. Intent classification is currently {}.",
                if enabled { "enabled" } else { "disabled" }
            ),
            "examples": examples,
            "enabled": enabled,
            "example_request": json!({ "query": "Show me running containers" }).to_string(),
        });
        if !enabled {
            out["note"] = json!("Intent classification is disabled. Use the explicit task_type parameter instead.");
        }
        out
    }

    // ========================================================================
    // PROMPTS
    // ========================================================================

    pub fn prompts_list(&self) -> Value {
        json!({
            "prompts": [
                {
                    "name": DISCOVER_TOOLS,
                    "title": "Discover Tools Guide",
                    "description": "How to discover tools by task type",
                    "arguments": [],
                },
                {
                    "name": LIST_TASK_TYPES,
                    "title": "Task Types List",
                    "description": "Every task type and its tools",
                    "arguments": [],
                },
                {
                    "name": INTENT_QUERY_HELP,
                    "title": "Natural Language Query Help",
                    "description": "How to use natural language queries for tool discovery",
                    "arguments": [],
                },
            ]
        })
    }

    /// `None` for an unknown prompt name.
    pub fn prompt(&self, name: &str) -> Option<Value> {
        let (description, text) = match name {
            DISCOVER_TOOLS => ("Guide to discovering Docker tools by task type", self.discover_text()),
            LIST_TASK_TYPES => ("Complete list of task types and tools", self.task_types_text()),
            INTENT_QUERY_HELP => ("Guide to using natural language queries", intent_text()),
            _ => return None,
        };
        Some(json!({
            "description": description,
            "messages": [{
                "role": "user",
                "content": { "type": "text", "text": text },
            }],
        }))
    }

    fn discover_text(&self) -> String {
        let (source, _) = self.task_type_source();
        let mut entries: Vec<(&String, &Vec<String>)> = source.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let lines: Vec<String> = entries
            .into_iter()
            .map(|(task_type, tools)| {
                let mut sorted = tools.clone();
                sorted.sort();
                format!("- {}: {} tools (e.g., {})", task_type, tools.len(), sample(&sorted))
            })
            .collect();
        format!(
            "This server exposes {} Docker tools in {} task types. By default at most {} tools are shown; \
             use the task_type parameter of tools/list to reach a specific group.\n\n\
             Available task types:\n{}\n\n\
             Example: {{\"method\": \"tools/list\", \"params\": {{\"task_type\": \"container-ops\"}}}}",
            self.catalog.len(),
            source.len(),
            self.config.max_tools,
            lines.join("\n")
        )
    }

    fn task_types_text(&self) -> String {
        let (source, configured) = self.task_type_source();
        let blocks: Vec<String> = source
            .iter()
            .map(|(task_type, tools)| {
                format!(
                    "Task Type: {} ({} tools)\nTools: {}",
                    task_type,
                    tools.len(),
                    sample(tools)
                )
            })
            .collect();
        let mut text = String::new();
        if !configured {
            text.push_str("No task type policy configured. Tools grouped by their declared task types:\n\n");
        }
        text.push_str(&blocks.join("\n\n"));
        text.push_str("\n\nNote: use tools/list for full details of every tool.");
        text
    }
}

fn intent_text() -> String {
    let lines: Vec<String> = QUERY_EXAMPLES
        .iter()
        .filter(|(_, task_type, _)| *task_type != META_OPS)
        .map(|(query, task_type, _)| format!("- '{query}' -> {task_type} tools"))
        .collect();
    format!(
        "Instead of a task_type you can send a natural language query; the server detects the relevant \
         task types.\n\nExamples:\n{}\n\n\
         Use the query parameter: {{\"method\": \"tools/list\", \"params\": {{\"query\": \"your request\"}}}}",
        lines.join("\n")
    )
}

/// First few names, then "... (and N more)".
fn sample(names: &[String]) -> String {
    if names.len() > PROMPT_SAMPLE {
        format!(
            "{} ... (and {} more)",
            names[..PROMPT_SAMPLE].join(", "),
            names.len() - PROMPT_SAMPLE
        )
    } else {
        names.join(", ")
    }
}

// ============================================================================
// TESTS
// ============================================================================
