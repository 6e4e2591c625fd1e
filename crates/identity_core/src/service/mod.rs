//! Core use-case services.
//!
//! # Responsibility
//! - Decide cluster writes with pure reconciliation logic (`reconcile`).
//! - Orchestrate store transactions into use-case APIs (`identity_service`).
//! - Keep shells decoupled from storage details.

pub mod identity_service;
pub mod reconcile;
