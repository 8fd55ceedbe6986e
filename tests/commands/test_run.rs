//! Tests for the run command

use streak_keeper::commands::run;
use streak_keeper::{ContactStore, RunLock, RunOutcome, Settings};
use tempfile::tempdir;

#[tokio::test]
async fn test_run_without_cookies_aborts_before_any_contact() {
    let dir = tempdir().expect("tempdir");
    let settings = Settings {
        contacts_file: dir.path().join("contacts.json"),
        cookies_file: dir.path().join("cookies.json"),
        lock_file: dir.path().join("run.lock"),
        ..Settings::default()
    };
    ContactStore::new(&settings.contacts_file, settings.contact_match)
        .add("alice")
        .unwrap();

    let outcome = run::run(settings, None, true).await.expect("run accepted");
    match outcome {
        RunOutcome::Aborted { error, .. } => assert!(error.contains("Cookies file not found")),
        other => panic!("expected aborted run, got {:?}", other),
    }
    RunLock::acquire(dir.path().join("run.lock")).expect("lock released after the run");
}

#[tokio::test]
async fn test_run_with_no_contacts_attempts_nothing() {
    let dir = tempdir().expect("tempdir");
    let settings = Settings {
        contacts_file: dir.path().join("contacts.json"),
        lock_file: dir.path().join("run.lock"),
        ..Settings::default()
    };

    let outcome = run::run(settings, None, false).await.expect("run accepted");
    assert!(matches!(outcome, RunOutcome::Completed(ref r) if r.attempted == 0));
}
