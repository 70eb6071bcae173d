//! gamebook-forge
//!
//! Staged, resumable, AI-assisted extraction pipeline: scanned gamebook
//! PDF in, validated engine-ready `gamebook.json` out. The pipeline is a
//! linear DAG of stages communicating only through artifacts on disk;
//! candidate finding is cheap and high-recall, structuring is one global
//! decision, assembly and extraction are deterministic code, and a
//! portable validator gates engine readiness.

pub mod config;
pub mod core;
pub mod escalation;
pub mod extraction;
pub mod gamebook;
pub mod ingestion;
pub mod model;
pub mod pipeline;
pub mod validation;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
