//! Per-contact messaging workflow
//!
//! Drives an already authenticated `Session` through the conversation list:
//! locate each contact, open the conversation, type and send the message.
//! A failing contact never aborts the rest of the run.

use std::fmt;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{MatchMode, Settings};
use crate::error::{Error, Result};
use crate::session::{Locator, Session};

const NICKNAME_SELECTORS: &[&str] = &[
    "p[class*=\"PInfoNickname\"]",
    "p[class*=\"Nickname\"]",
    "span[class*=\"Nickname\"]",
    "div[class*=\"Nickname\"]",
];

const MESSAGE_INPUT_SELECTORS: &[&str] = &[
    "div[data-e2e=\"message-input\"]",
    "div[contenteditable=\"true\"]",
    "textarea[placeholder*=\"message\"]",
    "input[placeholder*=\"message\"]",
];

const SEND_BUTTON: &str = "button[data-e2e=\"send-button\"]";

const RETRY_SCROLL_PX: i64 = 600;

/// Timing and matching knobs for one run.
#[derive(Debug, Clone)]
pub struct RunPolicy {
    pub retry_count: u32,
    pub retry_backoff: Duration,
    pub element_wait: Duration,
    pub send_delay: Duration,
    pub matcher: MatchMode,
}

impl RunPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            retry_count: settings.retry_count,
            retry_backoff: settings.retry_backoff,
            element_wait: settings.element_wait,
            send_delay: settings.send_delay,
            matcher: settings.contact_match,
        }
    }
}

/// Why a contact was not messaged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail")]
pub enum FailureReason {
    ContactNotFound,
    AutomationError(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ContactNotFound => f.write_str("not found in conversation list"),
            FailureReason::AutomationError(detail) => write!(f, "automation error: {}", detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactFailure {
    pub contact: String,
    pub reason: FailureReason,
}

/// Summary of one completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub dry_run: bool,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<ContactFailure>,
}

impl RunResult {
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    pub fn failed_contacts(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.contact.as_str()).collect()
    }
}

/// How a triggered run ended: either a result, or a fatal error before any
/// contact was attempted.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed(RunResult),
    Aborted {
        run_id: Uuid,
        dry_run: bool,
        at: DateTime<Utc>,
        error: String,
    },
}

impl RunOutcome {
    pub fn run_id(&self) -> Uuid {
        match self {
            RunOutcome::Completed(result) => result.run_id,
            RunOutcome::Aborted { run_id, .. } => *run_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed(r) if r.failed == 0)
    }
}

/// Message every contact in order through an authenticated session.
pub fn run<S: Session>(
    session: &S,
    contacts: &[String],
    message: &str,
    dry_run: bool,
    policy: &RunPolicy,
) -> RunResult {
    run_with_id(Uuid::new_v4(), session, contacts, message, dry_run, policy)
}

/// Same as [`run`] with a caller-chosen run id.
pub fn run_with_id<S: Session>(
    run_id: Uuid,
    session: &S,
    contacts: &[String],
    message: &str,
    dry_run: bool,
    policy: &RunPolicy,
) -> RunResult {
    let span = info_span!("streak_run", %run_id, dry_run);
    let _enter = span.enter();

    let started_at = Utc::now();
    info!(contacts = contacts.len(), "Starting streak run");

    let mut succeeded = 0;
    let mut failures = Vec::new();

    for (index, contact) in contacts.iter().enumerate() {
        info!(contact = %contact, position = index + 1, total = contacts.len(), "Processing contact");
        match deliver(session, contact, message, dry_run, policy) {
            Ok(()) => {
                succeeded += 1;
                info!(contact = %contact, "Contact done");
            }
            Err(reason) => {
                warn!(contact = %contact, %reason, "Contact failed");
                failures.push(ContactFailure {
                    contact: contact.clone(),
                    reason,
                });
            }
        }
    }

    let result = RunResult {
        run_id,
        dry_run,
        message: message.to_string(),
        started_at,
        finished_at: Utc::now(),
        attempted: contacts.len(),
        succeeded,
        failed: failures.len(),
        failures,
    };
    info!(
        attempted = result.attempted,
        succeeded = result.succeeded,
        failed = result.failed,
        "Streak run finished"
    );
    result
}

/// All attempts for one contact. The last attempt decides the reason.
fn deliver<S: Session>(
    session: &S,
    contact: &str,
    message: &str,
    dry_run: bool,
    policy: &RunPolicy,
) -> std::result::Result<(), FailureReason> {
    let attempts = policy.retry_count.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        if attempt > 1 {
            thread::sleep(policy.retry_backoff);
            reload_conversations(session);
        }

        match attempt_once(session, contact, message, dry_run, policy) {
            Ok(true) => return Ok(()),
            Ok(false) => {
                debug!(contact, attempt, "Conversation not found");
                last_error = None;
            }
            Err(e) => {
                warn!(contact, attempt, "Attempt failed: {}", e);
                last_error = Some(e.to_string());
            }
        }
    }

    Err(match last_error {
        Some(detail) => FailureReason::AutomationError(detail),
        None => FailureReason::ContactNotFound,
    })
}

/// Refresh and scroll so lazily rendered conversations show up.
fn reload_conversations<S: Session>(session: &S) {
    if let Err(e) = session.refresh() {
        debug!("Refresh failed: {}", e);
    }
    if let Err(e) = session.scroll(RETRY_SCROLL_PX) {
        debug!("Scroll failed: {}", e);
    }
}

/// `Ok(false)` when the conversation is not on the page.
fn attempt_once<S: Session>(
    session: &S,
    contact: &str,
    message: &str,
    dry_run: bool,
    policy: &RunPolicy,
) -> Result<bool> {
    let Some(conversation) = locate(session, contact, policy.matcher)? else {
        return Ok(false);
    };

    if dry_run {
        info!(contact, "Dry run: conversation located, nothing sent");
        return Ok(true);
    }

    session.click(&conversation)?;
    thread::sleep(policy.element_wait);

    let input = first_match(session, MESSAGE_INPUT_SELECTORS)?
        .ok_or_else(|| Error::Automation("message input not found".to_string()))?;
    session.click(&input)?;
    session.type_text(&input, message)?;

    match session.find(&Locator::css(SEND_BUTTON))? {
        Some(button) => session.click(&button)?,
        None => session.press_enter()?,
    }
    info!(contact, "Message sent");
    thread::sleep(policy.send_delay);
    Ok(true)
}

fn locate<'s, S: Session>(
    session: &'s S,
    contact: &str,
    matcher: MatchMode,
) -> Result<Option<S::Element<'s>>> {
    for selector in NICKNAME_SELECTORS {
        for element in session.find_all(&Locator::css(selector))? {
            let text = session.text(&element).unwrap_or_default();
            if matcher.matches(&text, contact) {
                debug!(contact, selector, "Conversation found");
                return Ok(Some(element));
            }
        }
    }
    session.find(&text_xpath(contact, matcher))
}

fn first_match<'s, S: Session>(
    session: &'s S,
    selectors: &[&str],
) -> Result<Option<S::Element<'s>>> {
    for selector in selectors {
        if let Some(element) = session.find(&Locator::css(selector))? {
            return Ok(Some(element));
        }
    }
    Ok(None)
}

fn text_xpath(contact: &str, matcher: MatchMode) -> Locator {
    let literal = xpath_literal(contact.trim());
    match matcher {
        MatchMode::Contains => Locator::xpath(format!("//*[contains(text(), {})]", literal)),
        _ => Locator::xpath(format!("//*[normalize-space(text())={}]", literal)),
    }
}

/// XPath 1.0 has no escape sequences, so mixed quotes need `concat()`.
fn xpath_literal(value: &str) -> String {
    if !value.contains('"') {
        format!("\"{}\"", value)
    } else if !value.contains('\'') {
        format!("'{}'", value)
    } else {
        let parts: Vec<String> = value
            .split('"')
            .map(|part| format!("\"{}\"", part))
            .collect();
        format!("concat({})", parts.join(", '\"', "))
    }
}
