//! Contact domain model.
//!
//! # Responsibility
//! - Define the persisted contact record and its link precedence.
//! - Validate the per-row half of the cluster invariant.
//!
//! # Invariants
//! - `id` is assigned by storage and never reused.
//! - A primary has no `linked_id`; a secondary always links to another row.
//! - Every contact carries at least one of `email` or `phone_number`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Storage-assigned surrogate key of a contact row.
pub type ContactId = i64;

/// Role of a contact inside its identity cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPrecedence {
    /// Canonical representative of the cluster.
    Primary,
    /// Member linked to the cluster primary.
    Secondary,
}

impl LinkPrecedence {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }
}

/// Validation failures for contact rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactValidationError {
    /// Neither email nor phone number is present.
    MissingIdentifier,
    /// A primary row carries a `linked_id`.
    PrimaryWithLink {
        id: Option<ContactId>,
        linked_id: ContactId,
    },
    /// A secondary row has no `linked_id`.
    SecondaryWithoutLink { id: Option<ContactId> },
    /// A secondary row links to itself.
    SelfLink(ContactId),
}

impl Display for ContactValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingIdentifier => {
                write!(f, "contact must carry an email or a phone number")
            }
            Self::PrimaryWithLink { id, linked_id } => write!(
                f,
                "primary contact {} must not link to {linked_id}",
                display_id(*id)
            ),
            Self::SecondaryWithoutLink { id } => {
                write!(f, "secondary contact {} has no linked_id", display_id(*id))
            }
            Self::SelfLink(id) => write!(f, "contact {id} links to itself"),
        }
    }
}

impl Error for ContactValidationError {}

fn display_id(id: Option<ContactId>) -> String {
    id.map_or_else(|| "<new>".to_string(), |id| id.to_string())
}

/// Persisted contact row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    /// Primary of this contact's cluster. `None` on primaries.
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
    /// Unix epoch milliseconds. Immutable.
    pub created_at: i64,
    /// Unix epoch milliseconds.
    pub updated_at: i64,
    /// Soft-delete marker. Never set by reconciliation.
    pub deleted_at: Option<i64>,
}

impl Contact {
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// Returns whether this row is already a secondary of `primary_id`.
    pub fn is_secondary_of(&self, primary_id: ContactId) -> bool {
        self.link_precedence == LinkPrecedence::Secondary && self.linked_id == Some(primary_id)
    }

    /// Turns this row into the cluster primary.
    pub fn promote(&mut self) {
        self.link_precedence = LinkPrecedence::Primary;
        self.linked_id = None;
    }

    /// Turns this row into a secondary of `primary_id`.
    pub fn link_to(&mut self, primary_id: ContactId) {
        self.link_precedence = LinkPrecedence::Secondary;
        self.linked_id = Some(primary_id);
    }

    /// Orders contacts by age: earlier `created_at` first, lower `id` on ties.
    pub fn cmp_age(&self, other: &Self) -> Ordering {
        (self.created_at, self.id).cmp(&(other.created_at, other.id))
    }

    pub fn validate(&self) -> Result<(), ContactValidationError> {
        validate_fields(
            Some(self.id),
            self.email.as_deref(),
            self.phone_number.as_deref(),
            self.link_precedence,
            self.linked_id,
        )
    }
}

/// Insert payload; storage assigns `id` and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
}

impl NewContact {
    /// Creates the first row of a new cluster.
    pub fn primary(email: Option<String>, phone_number: Option<String>) -> Self {
        Self {
            email,
            phone_number,
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
        }
    }

    /// Creates a row attached to an existing cluster primary.
    pub fn secondary(
        email: Option<String>,
        phone_number: Option<String>,
        primary_id: ContactId,
    ) -> Self {
        Self {
            email,
            phone_number,
            linked_id: Some(primary_id),
            link_precedence: LinkPrecedence::Secondary,
        }
    }

    pub fn validate(&self) -> Result<(), ContactValidationError> {
        validate_fields(
            None,
            self.email.as_deref(),
            self.phone_number.as_deref(),
            self.link_precedence,
            self.linked_id,
        )
    }
}

fn validate_fields(
    id: Option<ContactId>,
    email: Option<&str>,
    phone_number: Option<&str>,
    link_precedence: LinkPrecedence,
    linked_id: Option<ContactId>,
) -> Result<(), ContactValidationError> {
    if email.is_none() && phone_number.is_none() {
        return Err(ContactValidationError::MissingIdentifier);
    }

    match (link_precedence, linked_id) {
        (LinkPrecedence::Primary, Some(linked_id)) => {
            Err(ContactValidationError::PrimaryWithLink { id, linked_id })
        }
        (LinkPrecedence::Secondary, None) => {
            Err(ContactValidationError::SecondaryWithoutLink { id })
        }
        (LinkPrecedence::Secondary, Some(linked_id)) if id == Some(linked_id) => {
            Err(ContactValidationError::SelfLink(linked_id))
        }
        _ => Ok(()),
    }
}
