//! Pure cluster reconciliation logic.
//!
//! # Responsibility
//! - Decide, from a snapshot of matched contacts and their full cluster
//!   membership, which writes bring the merged cluster back to a valid state.
//! - Never touch storage; callers apply the returned plan.
//!
//! # Invariants
//! - The surviving primary is the oldest primary in the snapshot
//!   (`created_at`, then `id`). With no primary, the oldest matched contact
//!   is promoted.
//! - Every other row of the snapshot ends up `secondary` and linked directly
//!   to the survivor, including members of demoted clusters that were not
//!   matched themselves.
//! - A new secondary is planned only when the observation carries an email
//!   or phone absent from the matched rows.

use crate::model::contact::{Contact, ContactId, NewContact};
use crate::model::identity::{IdentityView, Observation};
use std::collections::{BTreeSet, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors raised when a snapshot or a computed plan breaks engine invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// Input snapshot is not self-consistent.
    InconsistentSnapshot(String),
    /// Computed post-state does not satisfy the cluster invariant.
    InvariantViolation(String),
}

impl Display for ReconcileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InconsistentSnapshot(details) => {
                write!(f, "inconsistent cluster snapshot: {details}")
            }
            Self::InvariantViolation(details) => {
                write!(f, "cluster invariant violated: {details}")
            }
        }
    }
}

impl Error for ReconcileError {}

/// Writes needed to reconcile one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionPlan {
    /// Nothing matched; start a new cluster.
    CreatePrimary(NewContact),
    /// At least one contact matched; rewrite the merged cluster.
    UpdateCluster(ClusterPlan),
}

/// Post-state of a merged cluster plus the writes that produce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterPlan {
    /// Surviving primary, as it must be persisted.
    pub primary: Contact,
    /// Existing non-primary members, as they must be persisted, by age.
    pub secondaries: Vec<Contact>,
    /// Rows whose link fields differ from storage. The promoted primary, if
    /// any, comes first.
    pub changed: Vec<Contact>,
    /// Former primaries demoted into this cluster.
    pub demoted_primaries: Vec<ContactId>,
    /// Whether `primary` was a secondary (or orphan) before this plan.
    pub promoted: bool,
    /// Row to insert for information the cluster does not hold yet.
    pub new_secondary: Option<NewContact>,
}

impl ClusterPlan {
    /// Builds the caller view once `new_secondary` (if any) has been stored.
    pub fn view(&self, inserted: Option<&Contact>) -> IdentityView {
        let mut secondaries = self.secondaries.clone();
        secondaries.extend(inserted.cloned());
        IdentityView::from_cluster(&self.primary, &secondaries)
    }
}

/// Computes the writes that reconcile `observation` against storage.
///
/// `matches` are the rows matched by email or phone. `cluster` is every live
/// row reachable from them through `linked_id` in either direction; it must
/// contain all of `matches`.
pub fn plan_resolution(
    observation: &Observation,
    matches: &[Contact],
    cluster: &[Contact],
) -> Result<ResolutionPlan, ReconcileError> {
    if matches.is_empty() {
        return Ok(ResolutionPlan::CreatePrimary(NewContact::primary(
            observation.email().map(str::to_string),
            observation.phone_number().map(str::to_string),
        )));
    }

    check_snapshot(matches, cluster)?;

    let survivor = cluster
        .iter()
        .filter(|contact| contact.is_primary())
        .min_by(|left, right| left.cmp_age(right));
    let (mut primary, promoted) = match survivor {
        Some(primary) => (primary.clone(), false),
        None => {
            let oldest = matches
                .iter()
                .min_by(|left, right| left.cmp_age(right))
                .ok_or_else(|| {
                    ReconcileError::InconsistentSnapshot("no matched contact".to_string())
                })?;
            (oldest.clone(), true)
        }
    };

    let mut changed = Vec::new();
    if promoted {
        primary.promote();
        changed.push(primary.clone());
    }

    let mut demoted_primaries = Vec::new();
    let mut secondaries = Vec::new();
    for contact in cluster.iter().filter(|contact| contact.id != primary.id) {
        let mut contact = contact.clone();
        if !contact.is_secondary_of(primary.id) {
            if contact.is_primary() {
                demoted_primaries.push(contact.id);
            }
            contact.link_to(primary.id);
            changed.push(contact.clone());
        }
        secondaries.push(contact);
    }
    secondaries.sort_by(|left, right| left.cmp_age(right));

    let new_secondary = if carries_new_information(observation, matches) {
        Some(NewContact::secondary(
            observation.email().map(str::to_string),
            observation.phone_number().map(str::to_string),
            primary.id,
        ))
    } else {
        None
    };

    let plan = ClusterPlan {
        primary,
        secondaries,
        changed,
        demoted_primaries,
        promoted,
        new_secondary,
    };
    verify_cluster(&plan)?;
    Ok(ResolutionPlan::UpdateCluster(plan))
}

/// Returns whether the observation holds an email or phone that none of the
/// matched rows carries.
pub fn carries_new_information(observation: &Observation, matches: &[Contact]) -> bool {
    let known_emails: HashSet<&str> = matches
        .iter()
        .filter_map(|contact| contact.email.as_deref())
        .collect();
    let known_phones: HashSet<&str> = matches
        .iter()
        .filter_map(|contact| contact.phone_number.as_deref())
        .collect();

    let new_email = observation
        .email()
        .is_some_and(|email| !known_emails.contains(email));
    let new_phone = observation
        .phone_number()
        .is_some_and(|phone| !known_phones.contains(phone));
    new_email || new_phone
}

fn check_snapshot(matches: &[Contact], cluster: &[Contact]) -> Result<(), ReconcileError> {
    let mut ids = BTreeSet::new();
    for contact in cluster {
        if !ids.insert(contact.id) {
            return Err(ReconcileError::InconsistentSnapshot(format!(
                "contact {} appears twice",
                contact.id
            )));
        }
    }

    if let Some(missing) = matches.iter().find(|contact| !ids.contains(&contact.id)) {
        return Err(ReconcileError::InconsistentSnapshot(format!(
            "matched contact {} is missing from its cluster",
            missing.id
        )));
    }

    Ok(())
}

fn verify_cluster(plan: &ClusterPlan) -> Result<(), ReconcileError> {
    if !plan.primary.is_primary() || plan.primary.linked_id.is_some() {
        return Err(ReconcileError::InvariantViolation(format!(
            "primary {} is not a root",
            plan.primary.id
        )));
    }

    if let Some(stray) = plan
        .secondaries
        .iter()
        .find(|contact| !contact.is_secondary_of(plan.primary.id))
    {
        return Err(ReconcileError::InvariantViolation(format!(
            "contact {} is not linked to primary {}",
            stray.id, plan.primary.id
        )));
    }

    Ok(())
}
