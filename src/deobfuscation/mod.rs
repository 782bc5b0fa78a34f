//! Deobfuscation of method bodies.
//!
//! This module holds the passes and everything needed to run them over a set of methods.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                    Deobfuscation Pipeline                        │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  Input: Workspace (method bodies + class hierarchy)              │
//! │           │                                                      │
//! │           ▼                                                      │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │  DeobfuscationEngine                                       │  │
//! │  │  enabled passes -> PassScheduler (dependency order)        │  │
//! │  │  AnalysisContext: config, events, oracle, interpreter      │  │
//! │  └──────────────────────────┬─────────────────────────────────┘  │
//! │                             │                                    │
//! │                             ▼                                    │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │  Per method, per pass: MethodContext                       │  │
//! │  │  body + lazily computed frames, dropped on every edit      │  │
//! │  │  failure: body restored, failure recorded                  │  │
//! │  └──────────────────────────┬─────────────────────────────────┘  │
//! │                             │                                    │
//! │                             ▼                                    │
//! │  Output: rewritten Workspace + DeobfuscationResult               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Components
//!
//! - [`DeobfuscationEngine`] - entry point
//! - [`EngineConfig`] - iteration caps, budgets and per-pass switches
//! - [`AnalysisContext`] / [`MethodContext`] - run-wide and per-method state
//! - [`Workspace`] - the methods being processed
//! - [`RenameMappings`] - first-writer-wins rename store
//! - [`passes`] - the built-in passes

mod config;
mod context;
mod engine;
mod mappings;
mod result;
mod workspace;

// Built-in passes
pub mod passes;

pub use config::EngineConfig;
pub use context::{AnalysisContext, MethodContext};
pub use engine::DeobfuscationEngine;
pub use mappings::RenameMappings;
pub use result::DeobfuscationResult;
pub use workspace::{ExceptionUsage, Workspace};
