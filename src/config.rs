// Swarm Gate - Configuration
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Two layers: process Settings read from environment variables, and the
// operator FilterConfig policy read from filter-config.json. Settings take
// an injectable lookup so tests never touch the real environment.

use crate::catalog::Catalog;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_MAX_TOOLS: usize = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("token file {path} could not be read: {source}")]
    TokenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("token file {0} is empty")]
    EmptyTokenFile(PathBuf),
    #[error(
        "No authentication configured. Set MCP_ACCESS_TOKEN, MCP_ACCESS_TOKEN_FILE or TOKEN_SCOPES \
         (generate a token with: openssl rand -hex 32)"
    )]
    NoAuth,
    #[error("filter config {path} is invalid: {reason}")]
    FilterConfig { path: PathBuf, reason: String },
}

// ============================================================================
// GATING POLICY
// ============================================================================

/// Which task-type source wins when a request carries both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precedence {
    /// Classified task types override an explicit `task_type`.
    #[default]
    Intent,
    /// Explicit `task_type` overrides classification.
    Explicit,
}

impl std::str::FromStr for Precedence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "intent" => Ok(Self::Intent),
            "explicit" => Ok(Self::Explicit),
            other => Err(format!("expected 'intent' or 'explicit', got '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatingPolicy {
    pub precedence: Precedence,
    pub strict: bool,
    pub fallback_to_all: bool,
    pub classification_enabled: bool,
}

impl Default for GatingPolicy {
    fn default() -> Self {
        Self {
            precedence: Precedence::Intent,
            strict: false,
            fallback_to_all: true,
            classification_enabled: true,
        }
    }
}

impl GatingPolicy {
    /// Unmatched or unknown task types yield nothing instead of everything.
    pub fn restrictive(&self) -> bool {
        self.strict || !self.fallback_to_all
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierKind {
    Keyword,
    Llm,
}

/// Per-class deadlines for Docker operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub read: Duration,
    pub write: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(10),
            write: Duration::from_secs(30),
            delete: Duration::from_secs(60),
        }
    }
}

// ============================================================================
// SETTINGS - environment
// ============================================================================

#[derive(Debug, Clone)]
pub struct Settings {
    pub access_token: Option<String>,
    pub token_scopes: IndexMap<String, Vec<String>>,
    pub docker_host: String,
    pub docker_tls_verify: bool,
    pub docker_cert_path: Option<PathBuf>,
    pub bind_addr: String,
    pub tools_path: PathBuf,
    pub filter_config_path: PathBuf,
    pub classifier: ClassifierKind,
    pub policy: GatingPolicy,
    pub enforce_output_schema: bool,
    pub escalate_security_warnings: bool,
    pub context_warn_tokens: usize,
    pub context_hard_tokens: usize,
    pub timeouts: Timeouts,
    pub tokenizer_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            access_token: None,
            token_scopes: IndexMap::new(),
            docker_host: DEFAULT_DOCKER_HOST.to_string(),
            docker_tls_verify: false,
            docker_cert_path: None,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            tools_path: PathBuf::from("tools.yaml"),
            filter_config_path: PathBuf::from("filter-config.json"),
            classifier: ClassifierKind::Keyword,
            policy: GatingPolicy::default(),
            enforce_output_schema: false,
            escalate_security_warnings: false,
            context_warn_tokens: 5000,
            context_hard_tokens: 7600,
            timeouts: Timeouts::default(),
            tokenizer_path: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);
        let defaults = Self::default();

        let access_token = match env.get("MCP_ACCESS_TOKEN_FILE") {
            Some(path) => Some(read_token_file(Path::new(&path))?),
            None => env.get("MCP_ACCESS_TOKEN"),
        };

        let token_scopes = match env.get("TOKEN_SCOPES") {
            Some(raw) => serde_json::from_str::<IndexMap<String, Vec<String>>>(&raw).map_err(|e| {
                ConfigError::Invalid {
                    var: "TOKEN_SCOPES",
                    value: "<redacted>".into(),
                    reason: e.to_string(),
                }
            })?,
            None => IndexMap::new(),
        };

        let classifier = match env.get("INTENT_CLASSIFIER").as_deref().map(str::to_lowercase) {
            None => ClassifierKind::Keyword,
            Some(v) if v == "keyword" => ClassifierKind::Keyword,
            Some(v) if v == "llm" => ClassifierKind::Llm,
            Some(v) => {
                return Err(ConfigError::Invalid {
                    var: "INTENT_CLASSIFIER",
                    value: v,
                    reason: "expected 'keyword' or 'llm'".into(),
                })
            }
        };

        let precedence = match env.get("INTENT_PRECEDENCE") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                var: "INTENT_PRECEDENCE",
                value: raw.clone(),
                reason,
            })?,
            None => Precedence::Intent,
        };

        let policy = GatingPolicy {
            precedence,
            strict: env.flag("STRICT_CONTEXT_LIMIT", defaults.policy.strict)?,
            fallback_to_all: env.flag("INTENT_FALLBACK_TO_ALL", defaults.policy.fallback_to_all)?,
            classification_enabled: env
                .flag("INTENT_CLASSIFICATION_ENABLED", defaults.policy.classification_enabled)?,
        };

        let timeouts = Timeouts {
            read: env.seconds("MCP_TIMEOUT_READ_OPS", defaults.timeouts.read)?,
            write: env.seconds("MCP_TIMEOUT_WRITE_OPS", defaults.timeouts.write)?,
            delete: env.seconds("MCP_TIMEOUT_DELETE_OPS", defaults.timeouts.delete)?,
        };

        Ok(Self {
            access_token,
            token_scopes,
            docker_host: env.get("DOCKER_HOST").unwrap_or(defaults.docker_host),
            docker_tls_verify: env.flag("DOCKER_TLS_VERIFY", false)?,
            docker_cert_path: env.get("DOCKER_CERT_PATH").map(PathBuf::from),
            bind_addr: env.get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            tools_path: env.get("TOOLS_PATH").map(PathBuf::from).unwrap_or(defaults.tools_path),
            filter_config_path: env
                .get("FILTER_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.filter_config_path),
            classifier,
            policy,
            enforce_output_schema: env.flag("ENFORCE_OUTPUT_SCHEMA", false)?,
            escalate_security_warnings: env.flag("ESCALATE_SECURITY_WARNINGS", false)?,
            context_warn_tokens: env.number("CONTEXT_WARN_TOKENS", defaults.context_warn_tokens)?,
            context_hard_tokens: env.number("CONTEXT_HARD_TOKENS", defaults.context_hard_tokens)?,
            timeouts,
            tokenizer_path: env.get("TOKENIZER_PATH").map(PathBuf::from),
        })
    }

    pub fn auth_configured(&self) -> bool {
        self.access_token.is_some() || !self.token_scopes.is_empty()
    }

    /// HTTP serving refuses to start without credentials.
    pub fn require_auth(&self) -> Result<(), ConfigError> {
        if self.auth_configured() {
            Ok(())
        } else {
            Err(ConfigError::NoAuth)
        }
    }
}

/// Token file contents, whitespace-trimmed. Empty is an error.
fn read_token_file(path: &Path) -> Result<String, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::TokenFile {
        path: path.to_path_buf(),
        source,
    })?;
    let token = raw.trim();
    if token.is_empty() {
        return Err(ConfigError::EmptyTokenFile(path.to_path_buf()));
    }
    Ok(token.to_string())
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Unset and blank are the same thing.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => match v.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    var: key,
                    value: v,
                    reason: "expected a boolean".into(),
                }),
            },
        }
    }

    fn number(&self, key: &'static str, default: usize) -> Result<usize, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                var: key,
                value: v,
                reason: e.to_string(),
            }),
        }
    }

    fn seconds(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => match v.parse::<f64>() {
                Ok(secs) if secs > 0.0 && secs.is_finite() => Ok(Duration::from_secs_f64(secs)),
                _ => Err(ConfigError::Invalid {
                    var: key,
                    value: v,
                    reason: "expected a positive number of seconds".into(),
                }),
            },
        }
    }
}

// ============================================================================
// FILTER CONFIG - operator policy file
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub task_type_allowlists: IndexMap<String, Vec<String>>,
    #[serde(default = "default_max_tools")]
    pub max_tools: usize,
    #[serde(default)]
    pub blocklist: Vec<String>,
    /// Overrides the classifier's built-in keyword table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_keywords: Option<IndexMap<String, Vec<String>>>,
}

fn default_max_tools() -> usize {
    DEFAULT_MAX_TOOLS
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            task_type_allowlists: IndexMap::new(),
            max_tools: DEFAULT_MAX_TOOLS,
            blocklist: Vec::new(),
            intent_keywords: None,
        }
    }
}

impl FilterConfig {
    /// Load policy from JSON file, falling back to the empty default policy
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::warn!("Filter config not found at {:?}, using default empty policy", path);
            return Ok(Self::default());
        }
        let invalid = |reason: String| ConfigError::FilterConfig {
            path: path.to_path_buf(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;
        log::info!(
            "Filter config loaded: {} task types, max_tools={}, {} blocked",
            config.task_type_allowlists.len(),
            config.max_tools,
            config.blocklist.len()
        );
        Ok(config)
    }

    /// Names referenced by the policy that the catalog does not define.
    pub fn unknown_tool_warnings(&self, catalog: &Catalog) -> Vec<String> {
        let mut warnings = Vec::new();
        for (task_type, names) in &self.task_type_allowlists {
            for name in names.iter().filter(|n| !catalog.contains(n)) {
                warnings.push(format!(
                    "Allowlist for '{task_type}' references unknown tool '{name}'"
                ));
            }
        }
        for name in self.blocklist.iter().filter(|n| !catalog.contains(n)) {
            warnings.push(format!("Blocklist references unknown tool '{name}'"));
        }
        warnings
    }
}

// ============================================================================
// TESTS
// ============================================================================
