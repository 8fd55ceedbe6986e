//! Single command interface shared by the REST API, the chat bot, the
//! scheduler and the CLI.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::{Local, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::browser;
use crate::config::Settings;
use crate::contacts::ContactStore;
use crate::error::{Error, Result};
use crate::lock::RunLock;
use crate::metrics;
use crate::notifier::Notifier;
use crate::workflow::{self, RunOutcome, RunPolicy, RunResult};

/// Who asked for a run; used for metrics and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Api,
    Bot,
    Scheduler,
    Cli,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Api => "api",
            Trigger::Bot => "bot",
            Trigger::Scheduler => "scheduler",
            Trigger::Cli => "cli",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run {
        message: Option<String>,
        dry_run: bool,
    },
    ListContacts,
    AddContact(String),
    RemoveContact(String),
    SetMessage(String),
    Status,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    RunStarted {
        run_id: Uuid,
        dry_run: bool,
        contacts: usize,
        message: String,
    },
    Contacts(Vec<String>),
    ContactAdded {
        nickname: String,
        total: usize,
    },
    ContactRemoved {
        nickname: String,
        remaining: usize,
    },
    MessageSet(String),
    Status(StatusReport),
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub app_name: String,
    pub environment: String,
    pub schedule_time: String,
    pub headless: bool,
    pub contacts: usize,
    pub message: String,
    pub notifications: bool,
    pub current_run: Option<Uuid>,
    pub last_run: Option<RunOutcome>,
    pub server_time: String,
}

/// Performs one run end to end on the calling thread (blocking).
pub trait Runner: Send + Sync + 'static {
    fn run(&self, run_id: Uuid, contacts: &[String], message: &str, dry_run: bool)
        -> Result<RunResult>;
}

/// Runs against a fresh Chrome session restored from the cookie file.
pub struct BrowserRunner {
    settings: Arc<Settings>,
}

impl BrowserRunner {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }
}

impl Runner for BrowserRunner {
    fn run(
        &self,
        run_id: Uuid,
        contacts: &[String],
        message: &str,
        dry_run: bool,
    ) -> Result<RunResult> {
        let session = browser::open_session(&self.settings)?;
        let policy = RunPolicy::from_settings(&self.settings);
        Ok(workflow::run_with_id(
            run_id, &session, contacts, message, dry_run, &policy,
        ))
    }
}

/// A run that has been accepted; await `task` for its outcome.
pub struct RunHandle {
    pub run_id: Uuid,
    pub dry_run: bool,
    pub contacts: usize,
    pub message: String,
    pub task: JoinHandle<RunOutcome>,
}

pub struct Controller {
    settings: Arc<Settings>,
    store: ContactStore,
    runner: Arc<dyn Runner>,
    notifier: Notifier,
    message: RwLock<String>,
    current_run: Mutex<Option<Uuid>>,
    last_run: RwLock<Option<RunOutcome>>,
}

impl Controller {
    pub fn new(settings: Arc<Settings>, runner: Arc<dyn Runner>, notifier: Notifier) -> Self {
        let store = ContactStore::new(settings.contacts_file.clone(), settings.contact_match);
        Self {
            message: RwLock::new(settings.message.clone()),
            settings,
            store,
            runner,
            notifier,
            current_run: Mutex::new(None),
            last_run: RwLock::new(None),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &ContactStore {
        &self.store
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn current_message(&self) -> String {
        self.message
            .read()
            .map(|m| m.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn last_run(&self) -> Option<RunOutcome> {
        self.last_run
            .read()
            .map(|r| r.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn current_run(&self) -> Option<Uuid> {
        *self
            .current_run
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn execute(self: &Arc<Self>, command: Command, trigger: Trigger) -> Result<Reply> {
        match command {
            Command::Run { message, dry_run } => {
                let handle = self.trigger_run(message, dry_run, trigger)?;
                Ok(Reply::RunStarted {
                    run_id: handle.run_id,
                    dry_run: handle.dry_run,
                    contacts: handle.contacts,
                    message: handle.message,
                })
            }
            Command::ListContacts => Ok(Reply::Contacts(self.store.list()?)),
            Command::AddContact(name) => {
                let total = self.store.add(&name)?;
                Ok(Reply::ContactAdded {
                    nickname: name.trim().to_string(),
                    total,
                })
            }
            Command::RemoveContact(name) => {
                let (nickname, remaining) = self.store.remove(&name)?;
                Ok(Reply::ContactRemoved {
                    nickname,
                    remaining,
                })
            }
            Command::SetMessage(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(Error::InvalidArgument("Message cannot be empty".to_string()));
                }
                match self.message.write() {
                    Ok(mut message) => *message = text.to_string(),
                    Err(poisoned) => *poisoned.into_inner() = text.to_string(),
                }
                info!(message = %text, "Streak message updated");
                Ok(Reply::MessageSet(text.to_string()))
            }
            Command::Status => Ok(Reply::Status(self.status()?)),
        }
    }

    pub fn status(&self) -> Result<StatusReport> {
        Ok(StatusReport {
            app_name: self.settings.app_name.clone(),
            environment: self.settings.app_env.clone(),
            schedule_time: self.settings.schedule_label(),
            headless: self.settings.headless,
            contacts: self.store.list()?.len(),
            message: self.current_message(),
            notifications: self.notifier.is_enabled(),
            current_run: self.current_run(),
            last_run: self.last_run(),
            server_time: Local::now().to_rfc3339(),
        })
    }

    /// Take the run lock and start a run in the background.
    ///
    /// Fails immediately with `RunAlreadyInProgress` when another run holds
    /// the lock. Must be called inside a tokio runtime.
    pub fn trigger_run(
        self: &Arc<Self>,
        message: Option<String>,
        dry_run: bool,
        trigger: Trigger,
    ) -> Result<RunHandle> {
        let lock = match RunLock::acquire(&self.settings.lock_file) {
            Ok(lock) => lock,
            Err(e) => {
                if matches!(e, Error::RunAlreadyInProgress) {
                    warn!(%trigger, "Run requested while another run is in progress");
                    metrics::record_run_rejected(trigger.as_str());
                }
                return Err(e);
            }
        };

        let contacts = self.store.list()?;
        let message = message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.current_message());
        let run_id = Uuid::new_v4();

        self.set_current_run(Some(run_id));
        metrics::record_run_start();
        info!(%run_id, %trigger, dry_run, contacts = contacts.len(), "Run accepted");

        let handle_contacts = contacts.len();
        let handle_message = message.clone();
        let controller = Arc::clone(self);
        let task = tokio::spawn(async move {
            controller
                .perform(lock, run_id, contacts, message, dry_run, trigger)
                .await
        });

        Ok(RunHandle {
            run_id,
            dry_run,
            contacts: handle_contacts,
            message: handle_message,
            task,
        })
    }

    async fn perform(
        self: Arc<Self>,
        lock: RunLock,
        run_id: Uuid,
        contacts: Vec<String>,
        message: String,
        dry_run: bool,
        trigger: Trigger,
    ) -> RunOutcome {
        let started = Instant::now();

        let outcome = if contacts.is_empty() {
            warn!(%run_id, "No contacts to message");
            self.notifier.notify_no_contacts().await;
            let now = Utc::now();
            RunOutcome::Completed(RunResult {
                run_id,
                dry_run,
                message,
                started_at: now,
                finished_at: now,
                attempted: 0,
                succeeded: 0,
                failed: 0,
                failures: Vec::new(),
            })
        } else {
            self.notifier
                .notify_started(dry_run, contacts.len(), trigger.as_str())
                .await;

            let runner = Arc::clone(&self.runner);
            let joined = tokio::task::spawn_blocking(move || {
                runner.run(run_id, &contacts, &message, dry_run)
            })
            .await;

            let outcome = match joined {
                Ok(Ok(result)) => RunOutcome::Completed(result),
                Ok(Err(e)) => {
                    error!(%run_id, "Run aborted: {}", e);
                    aborted(run_id, dry_run, e.to_string())
                }
                Err(e) => {
                    error!(%run_id, "Run task failed: {}", e);
                    aborted(run_id, dry_run, format!("run task failed: {}", e))
                }
            };
            self.notifier.notify_run(&outcome).await;
            outcome
        };

        metrics::record_run_finished(trigger.as_str(), started.elapsed(), &outcome);
        match self.last_run.write() {
            Ok(mut last) => *last = Some(outcome.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(outcome.clone()),
        }
        self.set_current_run(None);
        drop(lock);
        outcome
    }

    fn set_current_run(&self, run_id: Option<Uuid>) {
        *self
            .current_run
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = run_id;
    }
}

fn aborted(run_id: Uuid, dry_run: bool, error: String) -> RunOutcome {
    RunOutcome::Aborted {
        run_id,
        dry_run,
        at: Utc::now(),
        error,
    }
}
