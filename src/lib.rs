// Swarm Gate - Library Root
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// All modules exported here for use by the binary and tests.

// ============================================================================
// GATING CORE
// ============================================================================

/// Tool catalog: tools.yaml, compiled schemas, authorization sets
pub mod catalog;

/// Query -> task types
pub mod classify;

/// Task type, resource and security stages
pub mod filter;

/// Context size estimation and thresholds
pub mod budget;

/// Catalog + pipeline + budget
pub mod gate;

/// Per-session bound tool sets
pub mod session;

// ============================================================================
// PROTOCOL + TRANSPORTS
// ============================================================================

pub mod mcp;
pub mod server;
pub mod auth;
pub mod meta;

// ============================================================================
// DOCKER
// ============================================================================

pub mod docker;
pub mod ops;
pub mod retry;

// ============================================================================
// SUPPORT
// ============================================================================

pub mod config;
pub mod redact;
pub mod startup;
