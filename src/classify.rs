// Swarm Gate - Intent Classifier
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Maps a free-text query to zero or more task types. Keyword matching
// only: phrases match by substring, single words by word boundary, no
// stemming. Pure: no state survives between calls.

use indexmap::IndexMap;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("LLM-based classification is not implemented")]
    Unimplemented,
    #[error("keyword '{keyword}' for task type '{task_type}' is not a valid pattern: {source}")]
    Pattern {
        task_type: String,
        keyword: String,
        #[source]
        source: regex::Error,
    },
}

/// Strategy seam for classification.
pub trait IntentClassifier: Send + Sync {
    fn classify(&self, query: &str) -> Result<Vec<String>, ClassifyError>;

    /// Reported in observability metadata.
    fn method(&self) -> &'static str;
}

// ============================================================================
// KEYWORD CLASSIFIER
// ============================================================================

#[derive(Debug)]
enum Matcher {
    Phrase(String),
    Word { text: String, pattern: Regex },
}

impl Matcher {
    fn matches(&self, query: &str) -> bool {
        match self {
            Self::Phrase(p) => query.contains(p.as_str()),
            Self::Word { text, pattern } => query.contains(text.as_str()) && pattern.is_match(query),
        }
    }
}

#[derive(Debug)]
struct TaskRule {
    task_type: String,
    matchers: Vec<Matcher>,
}

#[derive(Debug)]
pub struct KeywordClassifier {
    rules: Vec<TaskRule>,
}

impl KeywordClassifier {
    /// Rules keep the mapping's order, so results do too.
    pub fn new(mapping: &IndexMap<String, Vec<String>>) -> Result<Self, ClassifyError> {
        let mut rules = Vec::with_capacity(mapping.len());
        for (task_type, keywords) in mapping {
            let mut matchers = Vec::with_capacity(keywords.len());
            for keyword in keywords {
                let text = keyword.trim().to_lowercase();
                if text.is_empty() {
                    continue;
                }
                if text.split_whitespace().count() > 1 {
                    matchers.push(Matcher::Phrase(text));
                } else {
                    let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(&text))).map_err(
                        |source| ClassifyError::Pattern {
                            task_type: task_type.clone(),
                            keyword: keyword.clone(),
                            source,
                        },
                    )?;
                    matchers.push(Matcher::Word { text, pattern });
                }
            }
            rules.push(TaskRule {
                task_type: task_type.clone(),
                matchers,
            });
        }
        log::info!("Intent classifier initialized with {} task types", rules.len());
        Ok(Self { rules })
    }

    pub fn with_defaults() -> Result<Self, ClassifyError> {
        Self::new(&default_keywords())
    }

    pub fn task_types(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.task_type.as_str()).collect()
    }
}

impl IntentClassifier for KeywordClassifier {
    fn classify(&self, query: &str) -> Result<Vec<String>, ClassifyError> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let detected: Vec<String> = self
            .rules
            .iter()
            .filter(|rule| rule.matchers.iter().any(|m| m.matches(&query)))
            .map(|rule| rule.task_type.clone())
            .collect();

        if detected.is_empty() {
            log::debug!("No task types detected for query: {}", preview(&query, 50));
        } else {
            log::info!(
                "Intent classifier detected task types {:?} for query: {}",
                detected,
                preview(&query, 100)
            );
        }
        Ok(detected)
    }

    fn method(&self) -> &'static str {
        "keyword"
    }
}

// ============================================================================
// LLM CLASSIFIER - placeholder strategy
// ============================================================================

/// Reserved for model-backed classification. Never silently degrades:
/// construction and use both fail.
#[derive(Debug)]
pub struct LlmClassifier {
    _private: (),
}

impl LlmClassifier {
    pub fn new() -> Result<Self, ClassifyError> {
        Err(ClassifyError::Unimplemented)
    }
}

impl IntentClassifier for LlmClassifier {
    fn classify(&self, _query: &str) -> Result<Vec<String>, ClassifyError> {
        Err(ClassifyError::Unimplemented)
    }

    fn method(&self) -> &'static str {
        "llm"
    }
}

fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}...")
    }
}

/// Built-in keyword table for the Docker task types.
pub fn default_keywords() -> IndexMap<String, Vec<String>> {
    let table: [(&str, &[&str]); 6] = [
        (
            "container-ops",
            &[
                "container", "containers", "docker run", "start", "stop", "restart", "logs",
                "exec", "attach", "inspect container", "running container", "container status",
                "docker container", "container logs", "container exec", "container start",
                "container stop", "container restart", "container remove", "container inspect",
                "container list", "container create",
            ],
        ),
        (
            "compose-ops",
            &[
                "compose", "stack", "deploy", "docker-compose", "docker compose", "compose file",
                "compose.yaml", "docker-compose.yml", "multi-container", "orchestrate",
                "compose up", "compose down", "compose build", "compose start", "compose stop",
                "compose restart", "compose logs", "compose ps", "compose scale", "stack deploy",
                "stack remove", "stack list", "stack services",
            ],
        ),
        (
            "service-ops",
            &[
                "service", "services", "swarm", "scale", "replicas", "swarm service",
                "service scale", "update service", "docker service", "service create",
                "service remove", "service inspect", "service logs", "service ps",
                "service update", "service rollback", "service list",
            ],
        ),
        (
            "network-ops",
            &[
                "network", "networks", "bridge", "overlay", "subnet", "network create",
                "network connect", "network disconnect", "docker network", "network inspect",
                "network remove", "network list", "bridge network", "overlay network",
                "network driver", "network ip", "network gateway",
            ],
        ),
        (
            "volume-ops",
            &[
                "volume", "volumes", "storage", "mount", "bind", "volume create",
                "persistent storage", "data volume", "docker volume", "volume inspect",
                "volume remove", "volume list", "volume driver", "volume mount", "bind mount",
                "tmpfs", "volume backup",
            ],
        ),
        (
            "system-ops",
            &[
                "info", "ping", "version", "status", "system", "docker info", "docker version",
                "health check", "connectivity", "daemon", "docker system", "system df",
                "system prune", "system events", "docker events", "docker stats", "docker top",
                "docker history",
            ],
        ),
    ];
    table
        .iter()
        .map(|(task, words)| (task.to_string(), words.iter().map(|w| w.to_string()).collect()))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> KeywordClassifier {
        KeywordClassifier::with_defaults().unwrap()
    }

    fn custom(pairs: &[(&str, &[&str])]) -> KeywordClassifier {
        let mapping: IndexMap<String, Vec<String>> = pairs
            .iter()
            .map(|(t, ws)| (t.to_string(), ws.iter().map(|w| w.to_string()).collect()))
            .collect();
        KeywordClassifier::new(&mapping).unwrap()
    }

    #[test]
    fn empty_and_blank_queries_yield_nothing() {
        let c = classifier();
        assert!(c.classify("").unwrap().is_empty());
        assert!(c.classify("   \t ").unwrap().is_empty());
    }

    #[test]
    fn single_category() {
        assert_eq!(classifier().classify("show me the logs").unwrap(), vec!["container-ops"]);
    }

    #[test]
    fn multiple_categories_in_mapping_order() {
        let detected = classifier().classify("container network info").unwrap();
        assert_eq!(detected, vec!["container-ops", "network-ops", "system-ops"]);
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(classifier().classify("SCALE my Swarm").unwrap(), vec!["service-ops"]);
    }

    #[test]
    fn nonsense_matches_nothing() {
        assert!(classifier().classify("zzznonsense").unwrap().is_empty());
    }

    #[test]
    fn words_respect_boundaries_without_stemming() {
        let c = custom(&[("t", &["cat"])]);
        assert_eq!(c.classify("a cat sat").unwrap(), vec!["t"]);
        assert!(c.classify("concatenate").unwrap().is_empty());
        assert!(c.classify("cats").unwrap().is_empty());
    }

    #[test]
    fn phrases_match_by_substring() {
        let c = custom(&[("t", &["bind mount"])]);
        assert_eq!(c.classify("use a Bind Mount here").unwrap(), vec!["t"]);
        assert!(c.classify("bind the mount").unwrap().is_empty());
    }

    #[test]
    fn hyphenated_keyword_is_a_single_word() {
        let c = custom(&[("t", &["docker-compose"])]);
        assert_eq!(c.classify("run docker-compose up").unwrap(), vec!["t"]);
    }

    #[test]
    fn repeated_calls_are_identical() {
        let c = classifier();
        let first = c.classify("deploy a stack with volumes").unwrap();
        for _ in 0..5 {
            assert_eq!(c.classify("deploy a stack with volumes").unwrap(), first);
        }
        assert_eq!(first, vec!["compose-ops", "volume-ops"]);
    }

    #[test]
    fn llm_classifier_fails_fast() {
        assert!(matches!(LlmClassifier::new(), Err(ClassifyError::Unimplemented)));
        let stub = LlmClassifier { _private: () };
        assert!(matches!(stub.classify("anything"), Err(ClassifyError::Unimplemented)));
    }
}
