// Swarm Gate - Session Tool Bindings
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// In-memory map: session id -> last tool set advertised by tools/list.
// tools/call consults it to refuse tools the client was never shown.
// Lives for the process lifetime. Last writer wins per session.

use crate::catalog::ToolSet;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

/// Session id used by the stdio transport.
pub const STDIO_SESSION: &str = "stdio";

/// Hex chars of the credential digest kept in a derived session id.
const TOKEN_DIGEST_CHARS: usize = 16;

/// One recorded discovery result.
#[derive(Debug, Clone)]
pub struct Binding {
    pub tools: Arc<ToolSet>,
    pub bound_at: DateTime<Utc>,
}

impl Binding {
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }
}

#[derive(Debug, Default)]
pub struct SessionBindings {
    inner: RwLock<HashMap<String, Binding>>,
}

impl SessionBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or overwrite) the set shown to `session_id`.
    pub fn bind(&self, session_id: &str, tools: ToolSet) {
        let binding = Binding {
            tools: Arc::new(tools),
            bound_at: Utc::now(),
        };
        let count = binding.tools.len();
        self.inner.write().insert(session_id.to_string(), binding);
        log::debug!("Session {} bound to {} tools", session_id, count);
    }

    pub fn lookup(&self, session_id: &str) -> Option<Binding> {
        self.inner.read().get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Session key for a request: explicit header, else a digest of the
/// credential, else a fresh random id.
pub fn derive_session_id(explicit: Option<&str>, credential: Option<&str>) -> String {
    if let Some(id) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
        return id.to_string();
    }
    match credential.filter(|c| !c.is_empty()) {
        Some(token) => {
            let digest = hex::encode(Sha256::digest(token.as_bytes()));
            format!("token-{}", &digest[..TOKEN_DIGEST_CHARS])
        }
        None => uuid::Uuid::new_v4().to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::abc;

    #[test]
    fn unknown_session_has_no_binding() {
        let sessions = SessionBindings::new();
        assert!(sessions.lookup("nobody").is_none());
        assert!(sessions.is_empty());
    }

    #[test]
    fn rebinding_overwrites() {
        let sessions = SessionBindings::new();
        let mut all = abc().get_all();
        sessions.bind("s", all.clone());
        let first = sessions.lookup("s").unwrap();
        assert_eq!(first.names(), vec!["A", "B", "C"]);

        all.shift_remove("A");
        sessions.bind("s", all);
        let binding = sessions.lookup("s").unwrap();
        assert!(binding.bound_at >= first.bound_at);
        assert!(!binding.contains("A"));
        assert!(binding.contains("B"));
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn sessions_are_independent() {
        let sessions = SessionBindings::new();
        sessions.bind("one", abc().get_all());
        sessions.bind("two", ToolSet::new());
        assert_eq!(sessions.lookup("one").unwrap().tools.len(), 3);
        assert!(sessions.lookup("two").unwrap().tools.is_empty());
    }

    #[test]
    fn concurrent_binds_on_distinct_sessions() {
        let sessions = Arc::new(SessionBindings::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let sessions = Arc::clone(&sessions);
                std::thread::spawn(move || sessions.bind(&format!("s{i}"), abc().get_all()))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sessions.len(), 8);
    }

    #[test]
    fn explicit_session_id_wins() {
        assert_eq!(derive_session_id(Some("abc"), Some("tok")), "abc");
        assert_ne!(derive_session_id(Some("  "), Some("tok")), "  ");
    }

    #[test]
    fn credential_digest_is_stable() {
        let a = derive_session_id(None, Some("secret-token"));
        let b = derive_session_id(None, Some("secret-token"));
        assert_eq!(a, b);
        assert!(a.starts_with("token-"));
        assert_eq!(a.len(), "token-".len() + 16);
        assert!(!a.contains("secret"));
        assert_ne!(a, derive_session_id(None, Some("other-token")));
    }

    #[test]
    fn anonymous_sessions_are_random() {
        assert_ne!(derive_session_id(None, None), derive_session_id(None, None));
    }
}
