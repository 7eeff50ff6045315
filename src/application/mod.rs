//! Application layer containing the core orchestration logic.
//!
//! `BatchOrchestrator` is the batch disbursement state machine; the
//! notification receiver and reconciler are its two concurrent terminal-update
//! sources, and `DisbursementService` is the facade the external API layer
//! calls into.

pub mod notification;
pub mod orchestrator;
pub mod reconciler;
pub mod runner;
pub mod service;
