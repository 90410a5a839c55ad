//! Pipeline processing.
//!
//! This module provides:
//! - The pure fixpoint pass over a pipeline snapshot
//! - Atomic and legacy (per-stage) processing strategies
//! - Per-pipeline leases
//! - The engine exposing every external entry point

mod engine;
mod lease;
mod pass;
mod scenario_tests;
mod strategy;

pub use engine::{ProcessingEngine, ProcessingResult};
pub use lease::{Lease, LeaseRegistry};
pub use pass::{default_ceiling, run_pass, PassOptions, PassOutcome};
pub use strategy::{
    commit_fresh, strategy_for, AtomicStrategy, Committed, LegacyStrategy, PassReport,
    ProcessingStrategy,
};
