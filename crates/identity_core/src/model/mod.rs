//! Contact domain model and reconciliation value types.
//!
//! # Responsibility
//! - Define the persisted `Contact` shape shared by store and engine.
//! - Define the inbound `Observation` and outbound `IdentityView`.
//!
//! # Invariants
//! - Every contact is identified by a storage-assigned `ContactId`.
//! - Deletion is represented by a soft-delete marker, never hard delete.

pub mod contact;
pub mod identity;
