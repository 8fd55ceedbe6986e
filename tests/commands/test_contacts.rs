//! Tests for the contacts command

use streak_keeper::commands::contacts::{execute, ContactsAction};
use streak_keeper::{ContactStore, Error, MatchMode};
use tempfile::tempdir;

#[test]
fn test_contacts_survive_a_new_store_instance() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("contacts.json");

    let store = ContactStore::new(&path, MatchMode::CaseInsensitive);
    execute(&store, ContactsAction::Add("alice".into())).unwrap();
    execute(&store, ContactsAction::Add("bob".into())).unwrap();

    let reopened = ContactStore::new(&path, MatchMode::CaseInsensitive);
    assert_eq!(reopened.list().unwrap(), vec!["alice", "bob"]);
}

#[test]
fn test_contacts_duplicate_add_reports_error() {
    let dir = tempdir().expect("tempdir");
    let store = ContactStore::new(dir.path().join("contacts.json"), MatchMode::default());

    execute(&store, ContactsAction::Add("Alice".into())).unwrap();
    let err = execute(&store, ContactsAction::Add("alice".into())).unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));
    assert_eq!(store.list().unwrap().len(), 1);
}
