//! Streak Keeper Library
//!
//! Keeps daily messaging streaks alive on a video platform's web messenger:
//! - Restores a logged-in browser session from exported cookies
//! - Sends the streak message to every stored contact, with retries
//! - Triggers runs daily, from a REST API or from a Telegram bot
//! - Reports every run to a Telegram chat

pub mod api;
pub mod bot;
pub mod browser;
pub mod config;
pub mod contacts;
pub mod controller;
pub mod error;
pub mod lock;
pub mod logging;
pub mod metrics;
pub mod notifier;
pub mod scheduler;
pub mod session;
pub mod workflow;

// Re-export common types
pub use config::{MatchMode, Settings};
pub use contacts::ContactStore;
pub use controller::{Command, Controller, Reply, Runner, Trigger};
pub use error::{Error, Result};
pub use lock::RunLock;
pub use notifier::Notifier;
pub use session::{Locator, Session};
pub use workflow::{RunOutcome, RunPolicy, RunResult};

// Commands module uses re-exported types, so it must be declared after the re-exports
pub mod commands;
