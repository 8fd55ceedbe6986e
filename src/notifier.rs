//! Telegram notifications about runs
//!
//! Every send is best effort: a failed notification is logged and never
//! fails the run that produced it.

use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::html;
use tracing::{debug, warn};

use crate::config::TelegramSettings;
use crate::workflow::RunOutcome;

#[derive(Clone)]
struct Target {
    bot: Bot,
    chat_id: ChatId,
}

/// Sends run reports to the configured chat. A disabled notifier drops
/// everything silently.
#[derive(Clone, Default)]
pub struct Notifier {
    target: Option<Target>,
}

impl Notifier {
    pub fn from_settings(settings: &TelegramSettings) -> Self {
        if !settings.is_configured() {
            debug!("Telegram notifications disabled");
            return Self::disabled();
        }
        match (&settings.bot_token, settings.chat_id) {
            (Some(token), Some(chat_id)) => Self::with_bot(Bot::new(token.expose()), chat_id),
            _ => Self::disabled(),
        }
    }

    pub fn disabled() -> Self {
        Self { target: None }
    }

    pub fn with_bot(bot: Bot, chat_id: i64) -> Self {
        Self {
            target: Some(Target {
                bot,
                chat_id: ChatId(chat_id),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }

    /// Send an HTML message. Returns whether it was delivered.
    pub async fn send(&self, text: &str) -> bool {
        let Some(target) = &self.target else {
            return false;
        };
        match target
            .bot
            .send_message(target.chat_id, text)
            .parse_mode(ParseMode::Html)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to send Telegram notification: {}", e);
                false
            }
        }
    }

    pub async fn notify_online(&self, app_name: &str, schedule: &str, contacts: usize) -> bool {
        self.send(&format!(
            "🤖 <b>{} online</b>\n\n⏰ Daily run at <b>{}</b>\n👥 Contacts: <b>{}</b>\n\nSend /help for commands.",
            html::escape(app_name),
            schedule,
            contacts
        ))
        .await
    }

    pub async fn notify_started(&self, dry_run: bool, contacts: usize, trigger: &str) -> bool {
        let mode = if dry_run { "🧪 Test run" } else { "🚀 Streak run" };
        self.send(&format!(
            "{} started\n👥 Contacts: <b>{}</b>\n📍 Trigger: {}",
            mode, contacts, trigger
        ))
        .await
    }

    pub async fn notify_no_contacts(&self) -> bool {
        self.send("⚠️ <b>No Contacts Found</b>\n\nAdd contacts with /add &lt;nickname&gt;.")
            .await
    }

    pub async fn notify_run(&self, outcome: &RunOutcome) -> bool {
        self.send(&format_run_summary(outcome)).await
    }
}

/// HTML summary of a finished or aborted run.
pub fn format_run_summary(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Aborted { dry_run, error, .. } => {
            let mode = if *dry_run { "Test run" } else { "Streak run" };
            format!("❌ <b>{} aborted</b>\n\n{}", mode, html::escape(error))
        }
        RunOutcome::Completed(result) => {
            let (icon, title) = match (result.dry_run, result.failed) {
                (true, 0) => ("🧪", "Test run complete"),
                (true, _) => ("🧪", "Test run finished with misses"),
                (false, 0) => ("✅", "Streak run complete"),
                (false, _) => ("⚠️", "Streak run finished with failures"),
            };
            let mut text = format!(
                "{} <b>{}</b>\n\n📊 Attempted: {}\n✅ Succeeded: {}\n❌ Failed: {}\n⏱ {}s",
                icon,
                title,
                result.attempted,
                result.succeeded,
                result.failed,
                result.duration().as_secs()
            );
            if !result.failures.is_empty() {
                text.push_str("\n\nFailed contacts:");
                for failure in &result.failures {
                    text.push_str(&format!(
                        "\n• {} ({})",
                        html::escape(&failure.contact),
                        html::escape(&failure.reason.to_string())
                    ));
                }
            }
            text
        }
    }
}
