//! Telegram bot front-end (long polling)
//!
//! Commands are parsed by hand from the message text and forwarded to the
//! shared `Controller`. Only users in the allow-list may use the bot.

use std::sync::Arc;

use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::html;
use tracing::{info, warn};

use crate::controller::{Command, Controller, Reply, StatusReport, Trigger};
use crate::error::Error;
use crate::workflow::RunOutcome;

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
    Add(String),
    Remove(String),
    List,
    Text(String),
    Run(Option<String>),
    Test,
    Status,
    /// Known command with a missing argument; carries the usage line
    Usage(&'static str),
}

impl BotCommand {
    /// `None` for plain text and unknown commands.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split_whitespace();
        let head = parts.next()?;
        if !head.starts_with('/') {
            return None;
        }
        // Group chats address commands as /cmd@botname
        let name = head
            .split('@')
            .next()
            .unwrap_or(head)
            .to_lowercase();
        let arg = parts.collect::<Vec<_>>().join(" ");
        let arg = (!arg.is_empty()).then_some(arg);

        Some(match name.as_str() {
            "/start" => BotCommand::Start,
            "/help" => BotCommand::Help,
            "/add" => arg.map_or(BotCommand::Usage("/add <nickname>"), BotCommand::Add),
            "/remove" => arg.map_or(BotCommand::Usage("/remove <nickname>"), BotCommand::Remove),
            "/list" => BotCommand::List,
            "/text" => arg.map_or(BotCommand::Usage("/text <message>"), BotCommand::Text),
            "/run" => BotCommand::Run(arg),
            "/test" => BotCommand::Test,
            "/status" => BotCommand::Status,
            _ => return None,
        })
    }
}

pub const HELP_TEXT: &str = "🔥 <b>Streak Keeper</b>\n\n\
    /add &lt;nickname&gt; - add a contact\n\
    /remove &lt;nickname&gt; - remove a contact\n\
    /list - show contacts\n\
    /text &lt;message&gt; - change the streak message\n\
    /run [message] - send the streak message now\n\
    /test - dry run, finds contacts without sending\n\
    /status - schedule, contacts and last run\n\
    /help - show this help";

/// Reply text for a command, in Telegram HTML.
pub async fn respond(controller: &Arc<Controller>, command: BotCommand) -> String {
    let (command, dry_run) = match command {
        BotCommand::Start | BotCommand::Help => return HELP_TEXT.to_string(),
        BotCommand::Usage(usage) => return format!("Usage: {}", html::escape(usage)),
        BotCommand::Add(name) => (Command::AddContact(name), false),
        BotCommand::Remove(name) => (Command::RemoveContact(name), false),
        BotCommand::List => (Command::ListContacts, false),
        BotCommand::Text(text) => (Command::SetMessage(text), false),
        BotCommand::Run(message) => (
            Command::Run {
                message,
                dry_run: false,
            },
            false,
        ),
        BotCommand::Test => (
            Command::Run {
                message: None,
                dry_run: true,
            },
            true,
        ),
        BotCommand::Status => (Command::Status, false),
    };

    match controller.execute(command, Trigger::Bot).await {
        Ok(reply) => format_reply(reply),
        Err(Error::RunAlreadyInProgress) => {
            "⏳ A run is already in progress, try again later.".to_string()
        }
        Err(Error::AlreadyExists(name)) => {
            format!("⚠️ <b>{}</b> is already in contacts", html::escape(&name))
        }
        Err(Error::NotFound(name)) => {
            format!("⚠️ <b>{}</b> is not in contacts", html::escape(&name))
        }
        Err(e) => {
            warn!(dry_run, "Bot command failed: {}", e);
            format!("❌ {}", html::escape(&e.to_string()))
        }
    }
}

fn format_reply(reply: Reply) -> String {
    match reply {
        Reply::RunStarted {
            dry_run, contacts, ..
        } => {
            let label = if dry_run { "🧪 Test run" } else { "🚀 Streak run" };
            format!(
                "{} started for <b>{}</b> contacts. The summary follows when it finishes.",
                label, contacts
            )
        }
        Reply::Contacts(contacts) if contacts.is_empty() => {
            "📭 No contacts yet. Add one with /add &lt;nickname&gt;".to_string()
        }
        Reply::Contacts(contacts) => {
            let mut text = format!("👥 <b>Contacts ({})</b>\n", contacts.len());
            for (i, contact) in contacts.iter().enumerate() {
                text.push_str(&format!("\n{}. {}", i + 1, html::escape(contact)));
            }
            text
        }
        Reply::ContactAdded { nickname, total } => format!(
            "✅ Added <b>{}</b> ({} total)",
            html::escape(&nickname),
            total
        ),
        Reply::ContactRemoved {
            nickname,
            remaining,
        } => format!(
            "🗑 Removed <b>{}</b> ({} left)",
            html::escape(&nickname),
            remaining
        ),
        Reply::MessageSet(message) => {
            format!("✏️ Streak message set to:\n{}", html::escape(&message))
        }
        Reply::Status(status) => format_status(&status),
    }
}

fn format_status(status: &StatusReport) -> String {
    let last = match &status.last_run {
        None => "never".to_string(),
        Some(RunOutcome::Completed(r)) => format!(
            "{}/{} succeeded at {}",
            r.succeeded,
            r.attempted,
            r.finished_at.format("%Y-%m-%d %H:%M UTC")
        ),
        Some(RunOutcome::Aborted { error, at, .. }) => format!(
            "aborted at {}: {}",
            at.format("%Y-%m-%d %H:%M UTC"),
            html::escape(error)
        ),
    };
    let running = if status.current_run.is_some() { "yes" } else { "no" };
    format!(
        "📊 <b>{}</b>\n\n⏰ Schedule: {}\n👥 Contacts: {}\n💬 Message: {}\n🖥 Headless: {}\n🏃 Running: {}\n📅 Last run: {}",
        html::escape(&status.app_name),
        status.schedule_time,
        status.contacts,
        html::escape(&status.message),
        status.headless,
        running,
        last
    )
}

/// Run the long-polling dispatcher until Ctrl-C.
pub async fn run_bot(bot: Bot, controller: Arc<Controller>) {
    info!("Starting Telegram bot...");

    let handler = dptree::entry().branch(Update::filter_message().endpoint({
        let controller = controller.clone();
        move |bot: Bot, msg: Message| {
            let controller = controller.clone();
            async move {
                let Some(command) = msg.text().and_then(BotCommand::parse) else {
                    return Ok::<_, anyhow::Error>(());
                };

                let user_id = msg.from().map(|u| u.id.0 as i64).unwrap_or(0);
                if !controller.settings().telegram.is_allowed(user_id) {
                    warn!(user_id, "Unauthorized bot user");
                    bot.send_message(msg.chat.id, "⛔ You are not authorized to use this bot.")
                        .await?;
                    return Ok(());
                }

                info!(user_id, ?command, "Bot command");
                let text = respond(&controller, command).await;
                bot.send_message(msg.chat.id, text)
                    .parse_mode(ParseMode::Html)
                    .await?;
                Ok(())
            }
        }
    }));

    Dispatcher::builder(bot, handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}
