//! Integration tests for the streak_keeper library
//!
//! These tests drive the public API: the REST server over a real socket,
//! the controller with stand-in runners, and the Telegram notifier against
//! a mock Bot API.

mod commands;

use std::path::Path;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};
use tokio::net::TcpListener;
use uuid::Uuid;

use streak_keeper::config::Secret;
use streak_keeper::workflow::{ContactFailure, FailureReason};
use streak_keeper::{api, Controller, Notifier, Result, RunOutcome, RunResult, Runner, Settings};

// ============================================================================
// Stand-in runners
// ============================================================================

/// Treats every contact listed in `found` as present on the page.
struct FoundRunner {
    found: Vec<String>,
}

impl FoundRunner {
    fn new(found: &[&str]) -> Arc<dyn Runner> {
        Arc::new(Self {
            found: found.iter().map(|s| s.to_string()).collect(),
        })
    }
}

impl Runner for FoundRunner {
    fn run(&self, run_id: Uuid, contacts: &[String], message: &str, dry_run: bool) -> Result<RunResult> {
        let now = Utc::now();
        let failures: Vec<ContactFailure> = contacts
            .iter()
            .filter(|c| !self.found.contains(c))
            .map(|c| ContactFailure {
                contact: c.clone(),
                reason: FailureReason::ContactNotFound,
            })
            .collect();
        Ok(RunResult {
            run_id,
            dry_run,
            message: message.to_string(),
            started_at: now,
            finished_at: now,
            attempted: contacts.len(),
            succeeded: contacts.len() - failures.len(),
            failed: failures.len(),
            failures,
        })
    }
}

/// Holds the run open until the test sends on the gate.
struct GatedRunner {
    gate: Mutex<mpsc::Receiver<()>>,
}

impl Runner for GatedRunner {
    fn run(&self, run_id: Uuid, contacts: &[String], message: &str, dry_run: bool) -> Result<RunResult> {
        if let Ok(gate) = self.gate.lock() {
            let _ = gate.recv_timeout(Duration::from_secs(10));
        }
        FoundRunner {
            found: contacts.to_vec(),
        }
        .run(run_id, contacts, message, dry_run)
    }
}

// ============================================================================
// API harness
// ============================================================================

const KEY: &str = "test-key";

struct Harness {
    base: String,
    client: reqwest::Client,
    controller: Arc<Controller>,
    _dir: TempDir,
}

fn settings_in(dir: &Path, api_key: Option<&str>) -> Settings {
    Settings {
        contacts_file: dir.join("contacts.json"),
        cookies_file: dir.join("cookies.json"),
        lock_file: dir.join("run.lock"),
        api_key: api_key.map(Secret::new),
        message: "🔥 Streak Reminder 🔥".to_string(),
        ..Settings::default()
    }
}

async fn start_api(api_key: Option<&str>, runner: Arc<dyn Runner>) -> Harness {
    let dir = tempdir().expect("tempdir");
    let settings = settings_in(dir.path(), api_key);
    let controller = Arc::new(Controller::new(
        Arc::new(settings),
        runner,
        Notifier::disabled(),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(api::serve(listener, Arc::clone(&controller)));

    Harness {
        base: format!("http://{}", addr),
        client: reqwest::Client::new(),
        controller,
        _dir: dir,
    }
}

impl Harness {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self
            .client
            .get(self.url(path))
            .header("X-API-Key", KEY)
            .send()
            .await
            .expect("request");
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn send(&self, method: reqwest::Method, path: &str, body: Option<Value>) -> (u16, Value) {
        let mut req = self
            .client
            .request(method, self.url(path))
            .header("X-API-Key", KEY);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await.expect("request");
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    /// Poll until the controller has a finished run.
    async fn wait_for_last_run(&self) -> RunOutcome {
        for _ in 0..200 {
            if self.controller.current_run().is_none() {
                if let Some(outcome) = self.controller.last_run() {
                    return outcome;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("run did not finish in time");
    }
}

// ============================================================================
// Public endpoints
// ============================================================================

#[tokio::test]
async fn health_needs_no_key() {
    let h = start_api(Some(KEY), FoundRunner::new(&[])).await;
    let resp = reqwest::get(h.url("/health")).await.expect("request");
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn index_lists_endpoints() {
    let h = start_api(Some(KEY), FoundRunner::new(&[])).await;
    let (status, body) = h.get("/").await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert!(body["data"]["endpoints"]["POST /v1/streak"].is_string());
}

#[tokio::test]
async fn unknown_route_is_404() {
    let h = start_api(Some(KEY), FoundRunner::new(&[])).await;
    let (status, body) = h.get("/nope").await;
    assert_eq!(status, 404);
    assert_eq!(body["success"], false);

    let (status, _) = h.get("/v1/nope").await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn metrics_endpoint_serves_prometheus_text() {
    let h = start_api(Some(KEY), FoundRunner::new(&[])).await;
    let resp = reqwest::get(h.url("/metrics")).await.expect("request");
    assert_eq!(resp.status().as_u16(), 200);
    let text = resp.text().await.expect("text");
    assert!(text.contains("streak_keeper_"));
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn missing_or_wrong_key_is_401() {
    let h = start_api(Some(KEY), FoundRunner::new(&[])).await;

    let resp = h.client.get(h.url("/v1/contacts")).send().await.expect("request");
    assert_eq!(resp.status().as_u16(), 401);

    let resp = h
        .client
        .get(h.url("/v1/contacts"))
        .header("X-API-Key", "wrong")
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status().as_u16(), 401);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn unconfigured_key_is_500() {
    let h = start_api(None, FoundRunner::new(&[])).await;
    let (status, body) = h.get("/v1/contacts").await;
    assert_eq!(status, 500);
    assert!(body["message"].as_str().unwrap_or_default().contains("not configured"));

    // Public endpoints keep working
    let (status, _) = h.get("/status").await;
    assert_eq!(status, 200);
}

// ============================================================================
// Contacts
// ============================================================================

#[tokio::test]
async fn contact_lifecycle_status_codes() {
    let h = start_api(Some(KEY), FoundRunner::new(&[])).await;

    let (status, body) = h
        .send(reqwest::Method::POST, "/v1/contacts", Some(json!({"nickname": "alice"})))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["total"], 1);

    let (status, _) = h
        .send(reqwest::Method::POST, "/v1/contacts", Some(json!({"nickname": "ALICE"})))
        .await;
    assert_eq!(status, 409);

    let (status, _) = h
        .send(reqwest::Method::POST, "/v1/contacts", Some(json!({"nickname": "  "})))
        .await;
    assert_eq!(status, 400);

    let (status, _) = h
        .send(reqwest::Method::POST, "/v1/contacts", Some(json!({"nickname": "Mary Jane"})))
        .await;
    assert_eq!(status, 200);

    let (status, body) = h.get("/v1/contacts").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["contacts"], json!(["alice", "Mary Jane"]));
    assert_eq!(body["data"]["count"], 2);

    let (status, _) = h.send(reqwest::Method::DELETE, "/v1/contacts/bob", None).await;
    assert_eq!(status, 404);

    let (status, body) = h
        .send(reqwest::Method::DELETE, "/v1/contacts/Mary%20Jane", None)
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["nickname"], "Mary Jane");
    assert_eq!(body["data"]["remaining"], 1);
}

#[tokio::test]
async fn malformed_json_is_400() {
    let h = start_api(Some(KEY), FoundRunner::new(&[])).await;
    let resp = h
        .client
        .post(h.url("/v1/contacts"))
        .header("X-API-Key", KEY)
        .body("{ not json")
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status().as_u16(), 400);
}

#[tokio::test]
async fn oversized_body_is_413() {
    let h = start_api(Some(KEY), FoundRunner::new(&[])).await;
    let nickname = "a".repeat(api::MAX_BODY_BYTES + 1024);
    let (status, body) = h
        .send(
            reqwest::Method::POST,
            "/v1/contacts",
            Some(json!({ "nickname": nickname })),
        )
        .await;
    assert_eq!(status, 413);
    assert_eq!(body["success"], false);
    assert!(h.controller.store().list().unwrap().is_empty());
}

// ============================================================================
// Runs
// ============================================================================

#[tokio::test]
async fn streak_run_is_accepted_and_reports_alice_and_bob() {
    let h = start_api(Some(KEY), FoundRunner::new(&["alice"])).await;
    h.controller.store().add("alice").unwrap();
    h.controller.store().add("bob").unwrap();

    let (status, body) = h.send(reqwest::Method::POST, "/v1/streak", None).await;
    assert_eq!(status, 202);
    assert_eq!(body["data"]["contacts"], 2);
    assert_eq!(body["data"]["dry_run"], false);
    assert_eq!(body["data"]["message"], "🔥 Streak Reminder 🔥");

    let RunOutcome::Completed(result) = h.wait_for_last_run().await else {
        panic!("expected a completed run");
    };
    assert_eq!(result.attempted, 2);
    assert_eq!(result.succeeded, 1);
    assert_eq!(result.failed, 1);
    assert_eq!(result.failed_contacts(), vec!["bob"]);

    let (_, status) = h.get("/status").await;
    assert_eq!(status["data"]["last_run"]["status"], "completed");
    assert_eq!(status["data"]["last_run"]["failures"][0]["contact"], "bob");
}

#[tokio::test]
async fn dry_run_with_custom_message() {
    let h = start_api(Some(KEY), FoundRunner::new(&["alice"])).await;
    h.controller.store().add("alice").unwrap();

    let (status, body) = h
        .send(
            reqwest::Method::POST,
            "/v1/streak",
            Some(json!({"dry_run": true, "message": "custom"})),
        )
        .await;
    assert_eq!(status, 202);
    assert_eq!(body["data"]["dry_run"], true);

    let RunOutcome::Completed(result) = h.wait_for_last_run().await else {
        panic!("expected a completed run");
    };
    assert!(result.dry_run);
    assert_eq!(result.message, "custom");
}

#[tokio::test]
async fn concurrent_run_is_409() {
    let (release, gate) = mpsc::channel();
    let runner = Arc::new(GatedRunner {
        gate: Mutex::new(gate),
    });
    let h = start_api(Some(KEY), runner).await;
    h.controller.store().add("alice").unwrap();

    let (status, _) = h.send(reqwest::Method::POST, "/v1/streak", None).await;
    assert_eq!(status, 202);

    let (status, body) = h.send(reqwest::Method::POST, "/v1/streak", None).await;
    assert_eq!(status, 409);
    assert_eq!(body["success"], false);

    release.send(()).unwrap();
    h.wait_for_last_run().await;

    release.send(()).unwrap();
    let (status, _) = h.send(reqwest::Method::POST, "/v1/streak", None).await;
    assert_eq!(status, 202);
}

#[tokio::test]
async fn message_update_is_used_by_next_run() {
    let h = start_api(Some(KEY), FoundRunner::new(&["alice"])).await;
    h.controller.store().add("alice").unwrap();

    let (status, _) = h
        .send(reqwest::Method::PUT, "/v1/message", Some(json!({"message": "new text"})))
        .await;
    assert_eq!(status, 200);

    let (status, _) = h
        .send(reqwest::Method::PUT, "/v1/message", Some(json!({"message": ""})))
        .await;
    assert_eq!(status, 400);

    let (_, status) = h.get("/status").await;
    assert_eq!(status["data"]["message"], "new text");

    let (_, body) = h.send(reqwest::Method::POST, "/v1/streak", None).await;
    assert_eq!(body["data"]["message"], "new text");
    h.wait_for_last_run().await;
}

// ============================================================================
// Notifier
// ============================================================================

#[tokio::test]
async fn notifier_failure_is_not_propagated() {
    use httpmock::prelude::*;

    let server = MockServer::start_async().await;
    let send_mock = server.mock(|when, then| {
        when.method(POST);
        then.status(500).json_body(json!({
            "ok": false,
            "error_code": 500,
            "description": "Internal Server Error"
        }));
    });

    let url = reqwest::Url::parse(&server.base_url()).expect("mock url");
    let bot = teloxide::Bot::new("123:abc").set_api_url(url);
    let notifier = Notifier::with_bot(bot, 42);

    let outcome = RunOutcome::Aborted {
        run_id: Uuid::new_v4(),
        dry_run: false,
        at: Utc::now(),
        error: "Authentication failed".to_string(),
    };
    assert!(!notifier.notify_run(&outcome).await);
    send_mock.assert_calls(1);
}

#[tokio::test]
async fn run_completes_even_when_notifications_fail() {
    use httpmock::prelude::*;

    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST);
        then.status(502).body("bad gateway");
    });

    let dir = tempdir().expect("tempdir");
    let url = reqwest::Url::parse(&server.base_url()).expect("mock url");
    let notifier = Notifier::with_bot(teloxide::Bot::new("123:abc").set_api_url(url), 42);
    let controller = Arc::new(Controller::new(
        Arc::new(settings_in(dir.path(), Some(KEY))),
        FoundRunner::new(&["alice"]),
        notifier,
    ));
    controller.store().add("alice").unwrap();

    let outcome = controller
        .trigger_run(None, false, streak_keeper::Trigger::Api)
        .expect("run accepted")
        .task
        .await
        .expect("run task");
    assert!(outcome.is_success());
}
