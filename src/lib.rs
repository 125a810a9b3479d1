//! flowcheck: a declarative business-process test DSL.
//!
//! Multi-persona workflows are written as documents, validated into a typed
//! IR, executed step by step against a backend, checked by business-rule
//! oracles, and retargeted to Playwright, Jest, pgTAP or agent instructions.

pub mod backend;
pub mod cli;
pub mod core;
pub mod generators;
pub mod oracle;
pub mod trace;
