//! Contact store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide exact-match lookup and row writes over `contacts` storage.
//! - Scope every reconciliation read-modify-write in one explicit
//!   transaction.
//!
//! # Invariants
//! - Write paths call `validate()` before SQL mutations.
//! - Read paths reject invalid persisted rows instead of masking them.
//! - Soft-deleted rows are invisible to every transactional lookup.
//! - Transactions start `IMMEDIATE`: the write lock is held from the first
//!   lookup to commit, so overlapping reconciliations run one at a time.
//! - Dropping an uncommitted transaction rolls it back.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::contact::{
    Contact, ContactId, ContactValidationError, LinkPrecedence, NewContact,
};
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

const CONTACT_SELECT_SQL: &str = "SELECT
    id,
    email,
    phone_number,
    linked_id,
    link_precedence,
    created_at,
    updated_at,
    deleted_at
FROM contacts";

const CONTACT_COLUMNS: [&str; 8] = [
    "id",
    "email",
    "phone_number",
    "linked_id",
    "link_precedence",
    "created_at",
    "updated_at",
    "deleted_at",
];

/// Current time in epoch milliseconds, evaluated by SQLite.
const NOW_MS_SQL: &str = "CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)";

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from contact store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error, including lock-wait timeouts.
    Db(DbError),
    /// Row failed validation before a write.
    Validation(ContactValidationError),
    /// No live row carries this id.
    NotFound(ContactId),
    /// Persisted data cannot be converted into a valid contact.
    InvalidData(String),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl StoreError {
    /// Returns whether the failure was a lock-wait timeout.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Db(err) if err.is_busy())
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "contact not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted contact data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "contact store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "contact store requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "contact store requires column `{column}` in table `{table}`"
            ),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::NotFound(_) => None,
            Self::InvalidData(_) => None,
            Self::UninitializedConnection { .. } => None,
            Self::MissingRequiredTable(_) => None,
            Self::MissingRequiredColumn { .. } => None,
        }
    }
}

impl From<ContactValidationError> for StoreError {
    fn from(value: ContactValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Handle to durable contact storage.
pub trait ContactStore {
    /// Scoped unit of work returned by [`ContactStore::begin`].
    type Transaction<'tx>: ContactTransaction
    where
        Self: 'tx;

    /// Opens a transaction that excludes every other writer until it ends.
    fn begin(&mut self) -> StoreResult<Self::Transaction<'_>>;

    /// Lists every row, soft-deleted ones included, ordered by id.
    fn find_all(&self) -> StoreResult<Vec<Contact>>;
}

/// Reads and writes inside one store transaction.
pub trait ContactTransaction {
    /// Live contacts whose email equals `email` or whose phone equals
    /// `phone_number`, ordered by `(created_at, id)`.
    fn find_matching(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> StoreResult<Vec<Contact>>;
    /// Live contacts with the given ids. Unknown ids are skipped.
    fn find_by_ids(&self, ids: &[ContactId]) -> StoreResult<Vec<Contact>>;
    /// Live contacts whose `linked_id` is one of `ids`.
    fn find_linked_to(&self, ids: &[ContactId]) -> StoreResult<Vec<Contact>>;
    /// Persists a new row and returns it as stored.
    fn insert(&self, contact: &NewContact) -> StoreResult<Contact>;
    /// Persists `link_precedence` and `linked_id` of an existing live row.
    fn update(&self, contact: &Contact) -> StoreResult<()>;
    fn commit(self) -> StoreResult<()>;
    fn rollback(self) -> StoreResult<()>;
}

/// SQLite-backed contact store.
pub struct SqliteContactStore<'conn> {
    conn: &'conn mut Connection,
}

impl<'conn> SqliteContactStore<'conn> {
    /// Creates a store from a migrated connection.
    pub fn try_new(conn: &'conn mut Connection) -> StoreResult<Self> {
        ensure_contact_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl ContactStore for SqliteContactStore<'_> {
    type Transaction<'tx>
        = SqliteContactTransaction<'tx>
    where
        Self: 'tx;

    fn begin(&mut self) -> StoreResult<SqliteContactTransaction<'_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(SqliteContactTransaction { tx })
    }

    fn find_all(&self) -> StoreResult<Vec<Contact>> {
        query_contacts(
            &*self.conn,
            &format!("{CONTACT_SELECT_SQL} ORDER BY id ASC;"),
            Vec::new(),
        )
    }
}

/// IMMEDIATE SQLite transaction over the `contacts` table.
pub struct SqliteContactTransaction<'conn> {
    tx: Transaction<'conn>,
}

impl ContactTransaction for SqliteContactTransaction<'_> {
    fn find_matching(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> StoreResult<Vec<Contact>> {
        let mut stmt = self.tx.prepare(&format!(
            "{CONTACT_SELECT_SQL}
             WHERE deleted_at IS NULL
               AND (
                 (?1 IS NOT NULL AND email = ?1)
                 OR (?2 IS NOT NULL AND phone_number = ?2)
               )
             ORDER BY created_at ASC, id ASC;"
        ))?;

        let mut rows = stmt.query(params![email, phone_number])?;
        let mut contacts = Vec::new();
        while let Some(row) = rows.next()? {
            contacts.push(parse_contact_row(row)?);
        }
        Ok(contacts)
    }

    fn find_by_ids(&self, ids: &[ContactId]) -> StoreResult<Vec<Contact>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        query_contacts(
            &self.tx,
            &format!(
                "{CONTACT_SELECT_SQL}
                 WHERE deleted_at IS NULL
                   AND id IN ({})
                 ORDER BY created_at ASC, id ASC;",
                placeholders(ids.len())
            ),
            ids.to_vec(),
        )
    }

    fn find_linked_to(&self, ids: &[ContactId]) -> StoreResult<Vec<Contact>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        query_contacts(
            &self.tx,
            &format!(
                "{CONTACT_SELECT_SQL}
                 WHERE deleted_at IS NULL
                   AND linked_id IN ({})
                 ORDER BY created_at ASC, id ASC;",
                placeholders(ids.len())
            ),
            ids.to_vec(),
        )
    }

    fn insert(&self, contact: &NewContact) -> StoreResult<Contact> {
        contact.validate()?;

        self.tx.execute(
            "INSERT INTO contacts (
                email,
                phone_number,
                linked_id,
                link_precedence
            ) VALUES (?1, ?2, ?3, ?4);",
            params![
                contact.email.as_deref(),
                contact.phone_number.as_deref(),
                contact.linked_id,
                contact.link_precedence.as_str(),
            ],
        )?;

        let id = self.tx.last_insert_rowid();
        self.find_by_ids(&[id])?
            .pop()
            .ok_or(StoreError::NotFound(id))
    }

    fn update(&self, contact: &Contact) -> StoreResult<()> {
        contact.validate()?;

        let changed = self.tx.execute(
            &format!(
                "UPDATE contacts
                 SET
                    link_precedence = ?1,
                    linked_id = ?2,
                    updated_at = {NOW_MS_SQL}
                 WHERE id = ?3
                   AND deleted_at IS NULL;"
            ),
            params![
                contact.link_precedence.as_str(),
                contact.linked_id,
                contact.id,
            ],
        )?;

        if changed == 0 {
            return Err(StoreError::NotFound(contact.id));
        }

        Ok(())
    }

    fn commit(self) -> StoreResult<()> {
        self.tx.commit()?;
        Ok(())
    }

    fn rollback(self) -> StoreResult<()> {
        self.tx.rollback()?;
        Ok(())
    }
}

fn query_contacts(conn: &Connection, sql: &str, binds: Vec<i64>) -> StoreResult<Vec<Contact>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params_from_iter(binds))?;
    let mut contacts = Vec::new();
    while let Some(row) = rows.next()? {
        contacts.push(parse_contact_row(row)?);
    }
    Ok(contacts)
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn parse_contact_row(row: &Row<'_>) -> StoreResult<Contact> {
    let precedence_text: String = row.get("link_precedence")?;
    let link_precedence = LinkPrecedence::parse(&precedence_text).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "invalid link precedence `{precedence_text}` in contacts.link_precedence"
        ))
    })?;

    let contact = Contact {
        id: row.get("id")?,
        email: row.get("email")?,
        phone_number: row.get("phone_number")?,
        linked_id: row.get("linked_id")?,
        link_precedence,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        deleted_at: row.get("deleted_at")?,
    };
    contact.validate().map_err(|err| {
        StoreError::InvalidData(format!("contact {} is invalid: {err}", contact.id))
    })?;
    Ok(contact)
}

fn ensure_contact_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    if !table_exists(conn, "contacts")? {
        return Err(StoreError::MissingRequiredTable("contacts"));
    }

    for column in CONTACT_COLUMNS {
        if !table_has_column(conn, "contacts", column)? {
            return Err(StoreError::MissingRequiredColumn {
                table: "contacts",
                column,
            });
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> StoreResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
