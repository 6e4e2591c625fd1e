//! Identity resolution use-case service.
//!
//! # Responsibility
//! - Run one reconciliation per call inside one store transaction.
//! - Load the full cluster closure of the matched rows before planning.
//! - Apply the engine's plan and return the consolidated view.
//!
//! # Invariants
//! - Invalid input is rejected before any store access.
//! - Every exit path after `begin` ends in commit or rollback; partial
//!   cluster updates are never committed.
//! - The service holds no state besides its store handle and never retries.

use crate::model::contact::{Contact, ContactId};
use crate::model::identity::{IdentityView, Observation};
use crate::repo::contact_repo::{ContactStore, ContactTransaction, StoreError};
use crate::service::reconcile::{plan_resolution, ReconcileError, ResolutionPlan};
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Errors from identity resolution.
#[derive(Debug)]
pub enum IdentityError {
    /// Neither email nor phone number was supplied.
    InvalidInput,
    /// Persistence-layer failure; the transaction was rolled back.
    Store(StoreError),
    /// Stored clusters break engine invariants; the transaction was rolled
    /// back.
    Reconcile(ReconcileError),
}

impl IdentityError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::Store(err) if err.is_busy() => "store_busy",
            Self::Store(_) => "store_failed",
            Self::Reconcile(_) => "invariant_broken",
        }
    }
}

impl Display for IdentityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput => write!(f, "email or phoneNumber is required"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Reconcile(err) => write!(f, "{err}"),
        }
    }
}

impl Error for IdentityError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidInput => None,
            Self::Store(err) => Some(err),
            Self::Reconcile(err) => Some(err),
        }
    }
}

impl From<StoreError> for IdentityError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<ReconcileError> for IdentityError {
    fn from(value: ReconcileError) -> Self {
        Self::Reconcile(value)
    }
}

/// How a resolve call changed the stored clusters. Used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    CreatedPrimary,
    Attached,
    Merged,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::CreatedPrimary => "created_primary",
            Self::Attached => "attached",
            Self::Merged => "merged",
        }
    }
}

/// Identity resolution facade over a contact store.
pub struct IdentityService<S: ContactStore> {
    store: S,
}

impl<S: ContactStore> IdentityService<S> {
    /// Creates a service using the provided store implementation.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Reconciles one `(email?, phone?)` observation and returns the
    /// consolidated view of its cluster.
    ///
    /// # Contract
    /// - Blank values count as absent; both absent is `InvalidInput`.
    /// - Matching is exact on the trimmed values.
    /// - Two clusters proven identical are merged under the older primary.
    pub fn resolve(
        &mut self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<IdentityView, IdentityError> {
        let started_at = Instant::now();
        let Some(observation) = Observation::new(email, phone_number) else {
            warn!(
                "event=identity_resolve module=service status=rejected error_code={}",
                IdentityError::InvalidInput.code()
            );
            return Err(IdentityError::InvalidInput);
        };

        let tx = self.store.begin().map_err(|err| {
            let err = IdentityError::from(err);
            log_failure(&observation, &err, started_at);
            err
        })?;

        let result = resolve_in_transaction(&tx, &observation);
        match result {
            Ok((view, outcome)) => {
                if let Err(err) = tx.commit() {
                    let err = IdentityError::from(err);
                    log_failure(&observation, &err, started_at);
                    return Err(err);
                }
                info!(
                    "event=identity_resolve module=service status=ok outcome={} has_email={} has_phone={} secondaries={} duration_ms={}",
                    outcome.as_str(),
                    observation.email().is_some(),
                    observation.phone_number().is_some(),
                    view.secondary_contact_ids.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(view)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(
                        "event=identity_resolve module=service status=rollback_failed error={}",
                        rollback_err
                    );
                }
                log_failure(&observation, &err, started_at);
                Err(err)
            }
        }
    }

    /// Lists every stored contact without reconciliation.
    pub fn list_all(&self) -> Result<Vec<Contact>, IdentityError> {
        Ok(self.store.find_all()?)
    }
}

fn resolve_in_transaction<T: ContactTransaction>(
    tx: &T,
    observation: &Observation,
) -> Result<(IdentityView, Outcome), IdentityError> {
    let matches = tx.find_matching(observation.email(), observation.phone_number())?;
    let cluster = load_cluster_closure(tx, &matches)?;

    match plan_resolution(observation, &matches, &cluster)? {
        ResolutionPlan::CreatePrimary(new_contact) => {
            let created = tx.insert(&new_contact)?;
            Ok((
                IdentityView::from_cluster(&created, &[]),
                Outcome::CreatedPrimary,
            ))
        }
        ResolutionPlan::UpdateCluster(plan) => {
            for contact in &plan.changed {
                tx.update(contact)?;
            }
            let inserted = match &plan.new_secondary {
                Some(new_contact) => Some(tx.insert(new_contact)?),
                None => None,
            };

            let outcome = if plan.demoted_primaries.is_empty() {
                Outcome::Attached
            } else {
                Outcome::Merged
            };
            Ok((plan.view(inserted.as_ref()), outcome))
        }
    }
}

/// Loads every live row connected to `matches` through `linked_id`, walking
/// both towards primaries and towards their members until nothing new turns
/// up.
///
/// Each id is asked for at most once per direction, so dangling links and
/// link cycles terminate.
fn load_cluster_closure<T: ContactTransaction>(
    tx: &T,
    matches: &[Contact],
) -> Result<Vec<Contact>, StoreError> {
    let mut known: BTreeMap<ContactId, Contact> = matches
        .iter()
        .map(|contact| (contact.id, contact.clone()))
        .collect();
    let mut requested_parents: BTreeSet<ContactId> = known.keys().copied().collect();
    let mut expanded: BTreeSet<ContactId> = BTreeSet::new();

    loop {
        let parents: Vec<ContactId> = known
            .values()
            .filter_map(|contact| contact.linked_id)
            .filter(|id| requested_parents.insert(*id))
            .collect();
        let children_of: Vec<ContactId> = known
            .keys()
            .copied()
            .filter(|id| expanded.insert(*id))
            .collect();

        if parents.is_empty() && children_of.is_empty() {
            break;
        }

        for contact in tx
            .find_by_ids(&parents)?
            .into_iter()
            .chain(tx.find_linked_to(&children_of)?)
        {
            requested_parents.insert(contact.id);
            known.entry(contact.id).or_insert(contact);
        }
    }

    Ok(known.into_values().collect())
}

fn log_failure(observation: &Observation, err: &IdentityError, started_at: Instant) {
    warn!(
        "event=identity_resolve module=service status=error has_email={} has_phone={} duration_ms={} error_code={} error={}",
        observation.email().is_some(),
        observation.phone_number().is_some(),
        started_at.elapsed().as_millis(),
        err.code(),
        err
    );
}
