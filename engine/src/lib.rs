//! Kestrel Engine Library
//!
//! The agent runtime behind the `kestrel` binary. It is used by both the
//! binary and the integration tests.

/// Configuration management module
pub mod config;

/// Database persistence module
pub mod db;

/// Tiered memory: stores, ranking and consolidation
pub mod memory;

/// Daily budget enforcement
pub mod admission;

/// Live agent state mirrored into short-term memory
pub mod state;

/// Persistent steering command queue
pub mod steering;

/// LLM provider abstraction layer
pub mod llm;

/// Built-in workspace tools
pub mod tools;

/// Agent loop
pub mod agent;

/// Read-only view of a running agent
pub mod reader;

/// Telemetry and Observability
pub mod telemetry;

/// Daemon lifecycle management module
pub mod daemon;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
