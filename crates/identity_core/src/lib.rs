//! Customer identity reconciliation core.
//! This crate is the single source of truth for contact cluster invariants.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use db::{open_db, open_db_in_memory, open_db_with, DbError, DbOptions};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::contact::{Contact, ContactId, ContactValidationError, LinkPrecedence, NewContact};
pub use model::identity::{IdentityView, Observation};
pub use repo::contact_repo::{
    ContactStore, ContactTransaction, SqliteContactStore, SqliteContactTransaction, StoreError,
    StoreResult,
};
pub use service::identity_service::{IdentityError, IdentityService};
pub use service::reconcile::{plan_resolution, ClusterPlan, ReconcileError, ResolutionPlan};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
