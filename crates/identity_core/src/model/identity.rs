//! Inbound observation and consolidated identity view.
//!
//! # Responsibility
//! - Normalize raw `(email?, phone?)` input into an `Observation`.
//! - Project a reconciled cluster into the caller-facing `IdentityView`.
//!
//! # Invariants
//! - An `Observation` always carries at least one identifier.
//! - View lists are deduplicated and lead with the primary's own values.

use crate::model::contact::{Contact, ContactId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Normalized `(email?, phone?)` pair to reconcile.
///
/// Values are trimmed; blank values count as absent. Matching stays exact
/// on the trimmed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    email: Option<String>,
    phone_number: Option<String>,
}

impl Observation {
    /// Returns `None` when neither identifier is present after trimming.
    pub fn new(email: Option<&str>, phone_number: Option<&str>) -> Option<Self> {
        let email = normalize_identifier(email);
        let phone_number = normalize_identifier(phone_number);
        if email.is_none() && phone_number.is_none() {
            return None;
        }
        Some(Self {
            email,
            phone_number,
        })
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }
}

fn normalize_identifier(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Consolidated cluster view returned by identity resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityView {
    pub primary_contact_id: ContactId,
    /// Primary email first, then other distinct emails by contact age.
    pub emails: Vec<String>,
    /// Primary phone first, then other distinct phones by contact age.
    pub phone_numbers: Vec<String>,
    /// All non-primary members by contact age.
    pub secondary_contact_ids: Vec<ContactId>,
}

impl IdentityView {
    /// Builds the view from a cluster primary and its secondaries.
    ///
    /// `secondaries` may be in any order; they are sorted by age here.
    pub fn from_cluster(primary: &Contact, secondaries: &[Contact]) -> Self {
        let mut ordered: Vec<&Contact> = secondaries.iter().collect();
        ordered.sort_by(|left, right| left.cmp_age(right));

        let members = || std::iter::once(primary).chain(ordered.iter().copied());
        Self {
            primary_contact_id: primary.id,
            emails: distinct_in_order(members().filter_map(|c| c.email.as_deref())),
            phone_numbers: distinct_in_order(members().filter_map(|c| c.phone_number.as_deref())),
            secondary_contact_ids: ordered.iter().map(|c| c.id).collect(),
        }
    }
}

fn distinct_in_order<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .filter(|value| seen.insert(*value))
        .map(str::to_string)
        .collect()
}
