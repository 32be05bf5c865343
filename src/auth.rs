// Swarm Gate - Authentication
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Shared-secret bearer tokens, compared in constant time. A single
// MCP_ACCESS_TOKEN grants the admin scope; TOKEN_SCOPES maps further
// tokens to explicit scope lists.

use crate::catalog::ADMIN_SCOPE;
use crate::config::Settings;
use std::collections::BTreeSet;
use subtle::ConstantTimeEq;
use thiserror::Error;

pub type Scopes = BTreeSet<String>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// No credential presented at all.
    #[error("Not authenticated")]
    Missing,
    #[error("Invalid or missing access token")]
    Invalid,
}

impl AuthError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Missing => 403,
            Self::Invalid => 401,
        }
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// The credential that authenticated; used to derive the session key.
    pub credential: String,
    pub scopes: Scopes,
}

impl Principal {
    /// Local trusted caller (stdio, CLI).
    pub fn local() -> Self {
        Self {
            credential: String::new(),
            scopes: [ADMIN_SCOPE.to_string()].into(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.scopes.contains(ADMIN_SCOPE)
    }
}

#[derive(Clone)]
pub struct Authenticator {
    single: Option<String>,
    scoped: Vec<(String, Scopes)>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("single", &self.single.as_ref().map(|_| "***"))
            .field("scoped_tokens", &self.scoped.len())
            .finish()
    }
}

impl Authenticator {
    pub fn new(single: Option<String>, scoped: Vec<(String, Scopes)>) -> Self {
        Self { single, scoped }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let scoped = settings
            .token_scopes
            .iter()
            .map(|(token, scopes)| (token.clone(), scopes.iter().cloned().collect()))
            .collect();
        Self::new(settings.access_token.clone(), scoped)
    }

    pub fn is_configured(&self) -> bool {
        self.single.is_some() || !self.scoped.is_empty()
    }

    /// Scopes for `token`. Every configured token is compared so timing
    /// does not reveal which one matched.
    pub fn verify(&self, token: &str) -> Option<Scopes> {
        let mut found: Option<Scopes> = None;
        for (candidate, scopes) in &self.scoped {
            if constant_time_eq(candidate, token) && found.is_none() {
                found = Some(scopes.clone());
            }
        }
        if let Some(single) = &self.single {
            if constant_time_eq(single, token) && found.is_none() {
                found = Some([ADMIN_SCOPE.to_string()].into());
            }
        }
        found
    }

    /// A valid Authorization header wins over X-Access-Token.
    pub fn authenticate(
        &self,
        authorization: Option<&str>,
        access_token: Option<&str>,
    ) -> Result<Principal, AuthError> {
        let candidates: Vec<&str> = [authorization.and_then(bearer_token), access_token.map(str::trim)]
            .into_iter()
            .flatten()
            .filter(|t| !t.is_empty())
            .collect();
        if candidates.is_empty() {
            return Err(AuthError::Missing);
        }
        for token in candidates {
            if let Some(scopes) = self.verify(token) {
                return Ok(Principal {
                    credential: token.to_string(),
                    scopes,
                });
            }
        }
        log::warn!("Rejected request with invalid access token");
        Err(AuthError::Invalid)
    }
}

/// `Bearer <token>` -> token; any other shape is taken whole.
pub fn bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();
    let parts: Vec<&str> = header.split_whitespace().collect();
    let token = if parts.len() == 2 { parts[1] } else { header };
    Some(token).filter(|t| !t.is_empty())
}

pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

// ============================================================================
// TESTS
// ============================================================================
