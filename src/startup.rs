// Swarm Gate - Startup Wiring
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Builds the gate, classifier, executor and dispatcher from Settings.
// Catalog and policy problems stop startup here, before any transport
// accepts a request.

use crate::budget::{CharRatioCounter, ContextLimits, TokenCounter};
use crate::catalog::Catalog;
use crate::classify::{IntentClassifier, KeywordClassifier, LlmClassifier};
use crate::config::{ClassifierKind, FilterConfig, Settings};
use crate::docker::{DockerApi, DockerClient};
use crate::gate::GateController;
use crate::mcp::McpServer;
use crate::meta::Guide;
use crate::ops::ToolExecutor;
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;

const STARTUP_PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Catalog plus the policy that gates it.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub catalog: Arc<Catalog>,
    pub config: FilterConfig,
    /// Non-fatal findings, already logged.
    pub warnings: Vec<String>,
}

/// Load the catalog and filter policy and audit both.
pub fn load(settings: &Settings) -> Result<Loaded> {
    let catalog = Catalog::load(&settings.tools_path)
        .with_context(|| format!("Failed to load tool catalog {:?}", settings.tools_path))?;
    let config = FilterConfig::load(&settings.filter_config_path)?;
    let warnings = audit(&catalog, &config, settings.escalate_security_warnings)?;
    Ok(Loaded {
        catalog: Arc::new(catalog),
        config,
        warnings,
    })
}

/// Security findings are fatal when escalated; policy typos never are.
pub fn audit(catalog: &Catalog, config: &FilterConfig, escalate: bool) -> Result<Vec<String>> {
    let security = catalog.security_warnings();
    if escalate && !security.is_empty() {
        for w in &security {
            log::error!("{}", w);
        }
        bail!(
            "{} security warning(s) with ESCALATE_SECURITY_WARNINGS=true; add required_scopes to destructive tools",
            security.len()
        );
    }

    let mut warnings = security;
    warnings.extend(config.unknown_tool_warnings(catalog));
    for w in &warnings {
        log::warn!("{}", w);
    }
    Ok(warnings)
}

/// `None` when classification is disabled.
pub fn classifier(settings: &Settings, config: &FilterConfig) -> Result<Option<Box<dyn IntentClassifier>>> {
    if settings.classifier == ClassifierKind::Llm {
        let llm = LlmClassifier::new().context("INTENT_CLASSIFIER=llm")?;
        return Ok(Some(Box::new(llm)));
    }
    if !settings.policy.classification_enabled {
        log::info!("Intent classification disabled");
        return Ok(None);
    }
    // An empty mapping means "use the defaults", not "match nothing".
    let keyword = match config.intent_keywords.as_ref().filter(|m| !m.is_empty()) {
        Some(mapping) => {
            log::info!("Intent keywords loaded from filter config ({} task types)", mapping.len());
            KeywordClassifier::new(mapping)?
        }
        None => KeywordClassifier::with_defaults()?,
    };
    Ok(Some(Box::new(keyword)))
}

#[cfg(feature = "hf-tokenizer")]
pub fn token_counter(settings: &Settings) -> Result<Box<dyn TokenCounter>> {
    match &settings.tokenizer_path {
        Some(path) => Ok(Box::new(crate::budget::HfTokenCounter::from_file(path)?)),
        None => Ok(Box::new(CharRatioCounter)),
    }
}

#[cfg(not(feature = "hf-tokenizer"))]
pub fn token_counter(settings: &Settings) -> Result<Box<dyn TokenCounter>> {
    if settings.tokenizer_path.is_some() {
        log::warn!("TOKENIZER_PATH set but built without the hf-tokenizer feature; using character estimate");
    }
    Ok(Box::new(CharRatioCounter))
}

pub fn limits(settings: &Settings) -> ContextLimits {
    ContextLimits {
        warn: settings.context_warn_tokens,
        hard: settings.context_hard_tokens,
        enforce_hard: settings.policy.strict,
    }
}

pub fn gate(settings: &Settings, loaded: &Loaded) -> Result<GateController> {
    Ok(GateController::new(
        Arc::clone(&loaded.catalog),
        loaded.config.clone(),
        settings.policy,
        token_counter(settings)?,
        limits(settings),
    ))
}

/// Engine client plus a reachability probe. An unreachable engine is
/// logged, not fatal: calls fail individually until it comes back.
pub async fn connect_docker(settings: &Settings) -> Result<Arc<dyn DockerApi>> {
    let client = DockerClient::from_settings(settings).context("Invalid Docker configuration")?;
    match tokio::time::timeout(STARTUP_PING_TIMEOUT, client.ping()).await {
        Ok(Ok(_)) => log::info!("Docker engine reachable at {}", settings.docker_host),
        Ok(Err(e)) => log::warn!("Docker engine not reachable at {}: {}", settings.docker_host, e),
        Err(_) => log::warn!("Docker engine ping timed out at {}", settings.docker_host),
    }
    Ok(Arc::new(client))
}

/// Full dispatcher over an already-connected engine.
pub fn server(settings: &Settings, loaded: &Loaded, docker: Arc<dyn DockerApi>) -> Result<McpServer> {
    let classifier = classifier(settings, &loaded.config)?;
    let gate = gate(settings, loaded)?;
    let guide = Guide::new(
        Arc::clone(&loaded.catalog),
        loaded.config.clone(),
        classifier.is_some(),
    );
    let executor = ToolExecutor::new(docker, guide, settings.timeouts);
    log::info!(
        "Gating policy: precedence={:?}, strict={}, fallback_to_all={}, classifier={}",
        settings.policy.precedence,
        settings.policy.strict,
        settings.policy.fallback_to_all,
        classifier.as_ref().map(|c| c.method()).unwrap_or("none")
    );
    Ok(McpServer::new(gate, classifier, executor, settings.enforce_output_schema))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::{catalog, def};
    use crate::docker::fake::FakeDocker;
    use crate::mcp::RequestMeta;
    use serde_json::json;
    use std::path::Path;

    const SHIPPED_TOOLS: &str = include_str!("../tools.yaml");
    const SHIPPED_POLICY: &str = include_str!("../filter-config.json");

    fn shipped(dir: &Path) -> Settings {
        let tools = dir.join("tools.yaml");
        let policy = dir.join("filter-config.json");
        std::fs::write(&tools, SHIPPED_TOOLS).unwrap();
        std::fs::write(&policy, SHIPPED_POLICY).unwrap();
        Settings {
            tools_path: tools,
            filter_config_path: policy,
            escalate_security_warnings: true,
            ..Settings::default()
        }
    }

    #[test]
    fn shipped_catalog_passes_strict_audit() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load(&shipped(dir.path())).unwrap();
        assert_eq!(loaded.catalog.len(), 22);
        assert!(loaded.warnings.is_empty(), "{:?}", loaded.warnings);
        for (task_type, tools) in &loaded.config.task_type_allowlists {
            assert!(tools.len() <= loaded.config.max_tools, "{task_type} exceeds max_tools");
        }
    }

    #[test]
    fn missing_catalog_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            tools_path: dir.path().join("absent.yaml"),
            filter_config_path: dir.path().join("absent.json"),
            ..Settings::default()
        };
        assert!(load(&settings).is_err());
    }

    #[test]
    fn unscoped_destructive_tool_fails_only_when_escalated() {
        let cat = catalog(vec![def("remove-volume", &["volume-ops"], 0)]);
        let config = FilterConfig::default();
        let warnings = audit(&cat, &config, false).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(audit(&cat, &config, true).is_err());
    }

    #[test]
    fn unknown_policy_names_only_warn() {
        let cat = catalog(vec![def("list-volumes", &["volume-ops"], 0)]);
        let mut config = FilterConfig::default();
        config.blocklist.push("no-such-tool".into());
        let warnings = audit(&cat, &config, true).unwrap();
        assert_eq!(warnings, vec!["Blocklist references unknown tool 'no-such-tool'"]);
    }

    #[test]
    fn llm_classifier_is_a_startup_error() {
        let settings = Settings {
            classifier: ClassifierKind::Llm,
            ..Settings::default()
        };
        assert!(classifier(&settings, &FilterConfig::default()).is_err());
    }

    #[test]
    fn disabled_classification_builds_nothing() {
        let mut settings = Settings::default();
        settings.policy.classification_enabled = false;
        assert!(classifier(&settings, &FilterConfig::default()).unwrap().is_none());
    }

    #[test]
    fn policy_keywords_override_defaults() {
        let mut config = FilterConfig::default();
        let mut mapping = indexmap::IndexMap::new();
        mapping.insert("volume-ops".to_string(), vec!["disk".to_string()]);
        config.intent_keywords = Some(mapping);
        let c = classifier(&Settings::default(), &config).unwrap().unwrap();
        assert_eq!(c.classify("need a disk").unwrap(), vec!["volume-ops"]);
        assert!(c.classify("show containers").unwrap().is_empty());
    }

    #[test]
    fn empty_policy_keywords_fall_back_to_defaults() {
        let config = FilterConfig {
            intent_keywords: Some(indexmap::IndexMap::new()),
            ..FilterConfig::default()
        };
        let c = classifier(&Settings::default(), &config).unwrap().unwrap();
        assert!(!c.classify("list all running containers").unwrap().is_empty());
    }

    #[test]
    fn strict_mode_enforces_hard_limit() {
        let mut settings = Settings::default();
        assert!(!limits(&settings).enforce_hard);
        settings.policy.strict = true;
        settings.context_hard_tokens = 900;
        let l = limits(&settings);
        assert!(l.enforce_hard);
        assert_eq!(l.hard, 900);
    }

    #[tokio::test]
    async fn shipped_setup_serves_container_group() {
        let dir = tempfile::tempdir().unwrap();
        let settings = shipped(dir.path());
        let loaded = load(&settings).unwrap();
        let server = server(&settings, &loaded, Arc::new(FakeDocker::default())).unwrap();

        let request = json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/list",
            "params": {"task_type": "container-ops"}
        });
        let response = server.handle_value(request, &RequestMeta::stdio()).await.unwrap();
        let value = serde_json::to_value(&response).unwrap();
        let names: Vec<&str> = value["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"list-containers"));
        assert!(names.iter().all(|n| !n.contains("network")));
    }

    #[tokio::test]
    async fn shipped_output_schemas_match_engine_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = shipped(dir.path());
        settings.enforce_output_schema = true;
        let loaded = load(&settings).unwrap();
        let server = server(&settings, &loaded, Arc::new(FakeDocker::default())).unwrap();
        let meta = RequestMeta::stdio();

        let calls = [
            ("ping", json!({})),
            ("info", json!({})),
            ("create-container", json!({"image": "nginx:alpine", "name": "web"})),
            ("stop-container", json!({"id": "abc"})),
            ("scale-service", json!({"name": "web", "replicas": 3})),
            ("create-network", json!({"name": "backend"})),
            ("create-volume", json!({"name": "data"})),
            ("list-containers", json!({})),
            ("get-logs", json!({"id": "abc"})),
            ("list-stacks", json!({})),
            ("list-services", json!({})),
            ("list-networks", json!({})),
            ("list-volumes", json!({})),
            ("list-task-types", json!({})),
            ("discover-tools", json!({})),
            ("intent-query-help", json!({})),
        ];
        for (name, arguments) in calls {
            let request = json!({
                "jsonrpc": "2.0", "id": name, "method": "tools/call",
                "params": {"name": name, "arguments": arguments}
            });
            let response = server.handle_value(request, &meta).await.unwrap();
            let value = serde_json::to_value(&response).unwrap();
            assert!(value.get("error").is_none(), "{name}: {}", value["error"]);
        }
    }
}
