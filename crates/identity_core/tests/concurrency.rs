use identity_core::db::{open_db, open_db_with, DbOptions};
use identity_core::{Contact, IdentityError, IdentityService, IdentityView, SqliteContactStore};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const WORKERS: usize = 8;

fn resolve_at(path: &Path, email: Option<&str>, phone: Option<&str>) -> IdentityView {
    let mut conn = open_db(path).unwrap();
    let store = SqliteContactStore::try_new(&mut conn).unwrap();
    IdentityService::new(store).resolve(email, phone).unwrap()
}

fn contacts_at(path: &Path) -> Vec<Contact> {
    let mut conn = open_db(path).unwrap();
    let store = SqliteContactStore::try_new(&mut conn).unwrap();
    IdentityService::new(store).list_all().unwrap()
}

/// Runs `WORKERS` threads that start resolving at the same moment.
fn race<F>(path: PathBuf, observation: F) -> Vec<IdentityView>
where
    F: Fn(usize) -> (Option<String>, Option<String>) + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(WORKERS));
    let observation = Arc::new(observation);
    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let barrier = Arc::clone(&barrier);
            let observation = Arc::clone(&observation);
            let path = path.clone();
            thread::spawn(move || {
                let (email, phone) = observation(worker);
                let mut conn = open_db(&path).unwrap();
                let store = SqliteContactStore::try_new(&mut conn).unwrap();
                let mut service = IdentityService::new(store);
                barrier.wait();
                service.resolve(email.as_deref(), phone.as_deref()).unwrap()
            })
        })
        .collect();

    handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect()
}

#[test]
fn concurrent_same_email_creates_exactly_one_primary() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.db");
    drop(open_db(&path).unwrap());

    let views = race(path.clone(), |_| (Some("new@x.com".to_string()), None));

    let contacts = contacts_at(&path);
    assert_eq!(contacts.len(), 1);
    assert!(contacts[0].is_primary());
    assert!(views
        .iter()
        .all(|view| view.primary_contact_id == contacts[0].id));
}

#[test]
fn concurrent_overlapping_observations_share_one_cluster() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("overlap.db");
    drop(open_db(&path).unwrap());

    race(path.clone(), |worker| {
        (Some("shared@x.com".to_string()), Some(format!("55{worker}")))
    });

    let contacts = contacts_at(&path);
    let primaries: Vec<&Contact> = contacts.iter().filter(|c| c.is_primary()).collect();
    assert_eq!(primaries.len(), 1);
    assert_eq!(contacts.len(), WORKERS);
    assert!(contacts
        .iter()
        .filter(|c| !c.is_primary())
        .all(|c| c.is_secondary_of(primaries[0].id)));

    let view = resolve_at(&path, Some("shared@x.com"), None);
    assert_eq!(view.phone_numbers.len(), WORKERS);
    assert_eq!(view.secondary_contact_ids.len(), WORKERS - 1);
}

#[test]
fn lock_wait_timeout_fails_without_partial_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("locked.db");

    let holder = open_db(&path).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let options = DbOptions {
        busy_timeout: Duration::from_millis(50),
    };
    let mut conn = open_db_with(&path, &options).unwrap();
    {
        let store = SqliteContactStore::try_new(&mut conn).unwrap();
        let err = IdentityService::new(store)
            .resolve(Some("a@x.com"), None)
            .unwrap_err();
        match err {
            IdentityError::Store(store_err) => assert!(store_err.is_busy()),
            other => panic!("unexpected error: {other}"),
        }
    }

    holder.execute_batch("COMMIT;").unwrap();
    assert!(contacts_at(&path).is_empty());

    let store = SqliteContactStore::try_new(&mut conn).unwrap();
    let view = IdentityService::new(store)
        .resolve(Some("a@x.com"), None)
        .unwrap();
    assert_eq!(contacts_at(&path).len(), 1);
    assert_eq!(view.emails, vec!["a@x.com"]);
}
