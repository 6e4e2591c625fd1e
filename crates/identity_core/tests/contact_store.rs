use identity_core::db::open_db_in_memory;
use identity_core::{
    ContactStore, ContactTransaction, LinkPrecedence, NewContact, SqliteContactStore, StoreError,
};
use rusqlite::params;

fn primary(email: Option<&str>, phone: Option<&str>) -> NewContact {
    NewContact::primary(email.map(str::to_string), phone.map(str::to_string))
}

#[test]
fn insert_assigns_id_and_timestamps() {
    let mut conn = open_db_in_memory().unwrap();
    let mut store = SqliteContactStore::try_new(&mut conn).unwrap();

    let tx = store.begin().unwrap();
    let first = tx.insert(&primary(Some("a@x.com"), Some("111"))).unwrap();
    let second = tx
        .insert(&NewContact::secondary(
            Some("b@x.com".to_string()),
            None,
            first.id,
        ))
        .unwrap();
    tx.commit().unwrap();

    assert!(second.id > first.id);
    assert_eq!(first.link_precedence, LinkPrecedence::Primary);
    assert_eq!(first.linked_id, None);
    assert!(first.created_at > 0);
    assert_eq!(first.created_at, first.updated_at);
    assert_eq!(first.deleted_at, None);
    assert_eq!(second.linked_id, Some(first.id));
    assert_eq!(second.link_precedence, LinkPrecedence::Secondary);
}

#[test]
fn find_matching_uses_exact_email_or_phone() {
    let mut conn = open_db_in_memory().unwrap();
    let mut store = SqliteContactStore::try_new(&mut conn).unwrap();

    let tx = store.begin().unwrap();
    let by_email = tx.insert(&primary(Some("a@x.com"), None)).unwrap();
    let by_phone = tx.insert(&primary(None, Some("111"))).unwrap();
    tx.insert(&primary(Some("A@x.com"), Some("1111"))).unwrap();

    let matched = tx.find_matching(Some("a@x.com"), Some("111")).unwrap();
    let ids: Vec<i64> = matched.iter().map(|contact| contact.id).collect();
    assert_eq!(ids, vec![by_email.id, by_phone.id]);

    let email_only = tx.find_matching(Some("a@x.com"), None).unwrap();
    assert_eq!(email_only.len(), 1);

    assert!(tx.find_matching(None, None).unwrap().is_empty());
}

#[test]
fn soft_deleted_rows_are_invisible_to_lookups_but_listed() {
    let mut conn = open_db_in_memory().unwrap();
    let deleted_id = {
        let mut store = SqliteContactStore::try_new(&mut conn).unwrap();
        let tx = store.begin().unwrap();
        let contact = tx.insert(&primary(Some("gone@x.com"), None)).unwrap();
        tx.commit().unwrap();
        contact.id
    };
    conn.execute(
        "UPDATE contacts SET deleted_at = 1000 WHERE id = ?1;",
        params![deleted_id],
    )
    .unwrap();

    let mut store = SqliteContactStore::try_new(&mut conn).unwrap();
    {
        let tx = store.begin().unwrap();
        assert!(tx.find_matching(Some("gone@x.com"), None).unwrap().is_empty());
        assert!(tx.find_by_ids(&[deleted_id]).unwrap().is_empty());
    }

    let all = store.find_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].deleted_at, Some(1000));
}

#[test]
fn find_linked_to_returns_cluster_members() {
    let mut conn = open_db_in_memory().unwrap();
    let mut store = SqliteContactStore::try_new(&mut conn).unwrap();

    let tx = store.begin().unwrap();
    let root = tx.insert(&primary(Some("a@x.com"), None)).unwrap();
    let other_root = tx.insert(&primary(Some("z@x.com"), None)).unwrap();
    let member = tx
        .insert(&NewContact::secondary(None, Some("111".to_string()), root.id))
        .unwrap();
    tx.insert(&NewContact::secondary(
        None,
        Some("999".to_string()),
        other_root.id,
    ))
    .unwrap();

    let members = tx.find_linked_to(&[root.id]).unwrap();
    assert_eq!(members, vec![member]);
    assert!(tx.find_linked_to(&[]).unwrap().is_empty());
}

#[test]
fn update_persists_link_fields() {
    let mut conn = open_db_in_memory().unwrap();
    let mut store = SqliteContactStore::try_new(&mut conn).unwrap();

    let tx = store.begin().unwrap();
    let older = tx.insert(&primary(Some("a@x.com"), None)).unwrap();
    let mut younger = tx.insert(&primary(None, Some("111"))).unwrap();
    younger.link_to(older.id);
    tx.update(&younger).unwrap();
    tx.commit().unwrap();

    let all = store.find_all().unwrap();
    let stored = all.iter().find(|contact| contact.id == younger.id).unwrap();
    assert!(stored.is_secondary_of(older.id));
    assert!(stored.updated_at >= stored.created_at);
}

#[test]
fn update_missing_row_returns_not_found() {
    let mut conn = open_db_in_memory().unwrap();
    let mut store = SqliteContactStore::try_new(&mut conn).unwrap();

    let tx = store.begin().unwrap();
    let mut contact = tx.insert(&primary(Some("a@x.com"), None)).unwrap();
    contact.id += 100;
    let err = tx.update(&contact).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(id) if id == contact.id));
}

#[test]
fn validation_failure_blocks_insert_and_update() {
    let mut conn = open_db_in_memory().unwrap();
    let mut store = SqliteContactStore::try_new(&mut conn).unwrap();

    let tx = store.begin().unwrap();
    let err = tx.insert(&primary(None, None)).unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    let mut contact = tx.insert(&primary(Some("a@x.com"), None)).unwrap();
    contact.link_precedence = LinkPrecedence::Secondary;
    let err = tx.update(&contact).unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[test]
fn dropped_transaction_rolls_back() {
    let mut conn = open_db_in_memory().unwrap();
    let mut store = SqliteContactStore::try_new(&mut conn).unwrap();

    {
        let tx = store.begin().unwrap();
        tx.insert(&primary(Some("a@x.com"), None)).unwrap();
    }
    {
        let tx = store.begin().unwrap();
        tx.insert(&primary(Some("b@x.com"), None)).unwrap();
        tx.rollback().unwrap();
    }

    assert!(store.find_all().unwrap().is_empty());
}

#[test]
fn invalid_persisted_precedence_is_rejected_on_read() {
    let mut conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "PRAGMA ignore_check_constraints = ON;
         INSERT INTO contacts (email, link_precedence) VALUES ('a@x.com', 'tertiary');
         PRAGMA ignore_check_constraints = OFF;",
    )
    .unwrap();

    let store = SqliteContactStore::try_new(&mut conn).unwrap();
    let err = store.find_all().unwrap_err();
    assert!(matches!(err, StoreError::InvalidData(_)));
}
