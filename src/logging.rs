//! Log sinks
//!
//! Records go to stdout and, unless disabled, to a daily rolling file
//! `streak_bot.YYYY-MM-DD.log` under `LOG_DIR`. With `TELEGRAM_LOG_ENABLED`
//! records at or above `TELEGRAM_LOG_LEVEL` are also forwarded to the
//! notification chat, at most one per second.

use std::fmt::Write as _;
use std::fs;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::html;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::Settings;
use crate::error::{Error, Result};

pub const LOG_FILE_PREFIX: &str = "streak_bot";

/// Targets never forwarded, so a failing send cannot feed itself.
const QUIET_TARGETS: &[&str] = &["streak_keeper::notifier", "streak_keeper::logging"];

/// Keeps the file writer flushing; hold it for the life of the process.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber. Must be called inside a tokio runtime
/// when Telegram forwarding is on.
pub fn init(settings: &Settings) -> Result<LogGuard> {
    let filter = EnvFilter::from_default_env().add_directive(
        "streak_keeper=info"
            .parse()
            .map_err(|e| Error::ConfigError(format!("Invalid log directive: {}", e)))?,
    );

    let (file_layer, file_guard) = if settings.log_to_file {
        fs::create_dir_all(&settings.log_dir)?;
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix("log")
            .build(&settings.log_dir)
            .map_err(|e| Error::ConfigError(format!("Failed to open log file: {}", e)))?;
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (
            Some(fmt::layer().with_ansi(false).with_writer(writer)),
            Some(guard),
        )
    } else {
        (None, None)
    };

    let telegram = &settings.telegram;
    let telegram_layer = match (&telegram.bot_token, telegram.chat_id) {
        (Some(token), Some(chat_id)) if telegram.forwards_logs() => {
            let (sender, receiver) = mpsc::unbounded_channel();
            tokio::spawn(forward_logs(
                receiver,
                Bot::new(token.expose()),
                ChatId(chat_id),
            ));
            Some(TelegramLogLayer::new(sender, telegram.log_level))
        }
        _ => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .with(telegram_layer)
        .try_init()
        .map_err(|e| Error::ConfigError(format!("Failed to install logger: {}", e)))?;

    Ok(LogGuard { _file: file_guard })
}

/// One log record bound for the chat.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
    pub at: DateTime<Local>,
}

impl LogRecord {
    pub fn to_html(&self) -> String {
        let emoji = match self.level {
            Level::ERROR => "❌",
            Level::WARN => "⚠️",
            Level::INFO => "ℹ️",
            Level::DEBUG => "🔵",
            Level::TRACE => "📝",
        };
        format!(
            "{} <b>{}</b> [{}]\n{}",
            emoji,
            self.level,
            self.at.format("%H:%M:%S"),
            html::escape(&self.message)
        )
    }
}

/// Drops anything closer than `min_interval` to the last accepted call.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub fn allow(&self, now: Instant) -> bool {
        let mut last = self
            .last
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *last {
            Some(prev) if now.saturating_duration_since(prev) < self.min_interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

/// Tracing layer that queues this crate's records for the chat.
pub struct TelegramLogLayer {
    sender: mpsc::UnboundedSender<LogRecord>,
    min_level: Level,
    limiter: RateLimiter,
}

impl TelegramLogLayer {
    pub fn new(sender: mpsc::UnboundedSender<LogRecord>, min_level: Level) -> Self {
        Self {
            sender,
            min_level,
            limiter: RateLimiter::new(Duration::from_secs(1)),
        }
    }
}

impl<S> Layer<S> for TelegramLogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let target = meta.target();
        if *meta.level() > self.min_level
            || !target.starts_with("streak_keeper")
            || QUIET_TARGETS.contains(&target)
        {
            return;
        }
        if !self.limiter.allow(Instant::now()) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let _ = self.sender.send(LogRecord {
            level: *meta.level(),
            message: visitor.finish(),
            at: Local::now(),
        });
    }
}

/// Collects the message and appends other fields as `key=value`.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{} ({})", self.message, self.fields.trim_start())
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

async fn forward_logs(mut receiver: mpsc::UnboundedReceiver<LogRecord>, bot: Bot, chat_id: ChatId) {
    while let Some(record) = receiver.recv().await {
        // Failures are dropped; logging them would be forwarded again
        let _ = bot
            .send_message(chat_id, record.to_html())
            .parse_mode(ParseMode::Html)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{error, info, warn};

    fn capture(min_level: Level, emit: impl FnOnce()) -> Vec<LogRecord> {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let subscriber =
            tracing_subscriber::registry().with(TelegramLogLayer::new(sender, min_level));
        tracing::subscriber::with_default(subscriber, emit);

        let mut records = Vec::new();
        while let Ok(record) = receiver.try_recv() {
            records.push(record);
        }
        records
    }

    #[test]
    fn forwards_records_at_or_above_level() {
        let records = capture(Level::WARN, || {
            info!("routine");
            warn!(contact = "alice", "Contact not found");
        });
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, Level::WARN);
        assert_eq!(records[0].message, "Contact not found (contact=alice)");
    }

    #[test]
    fn second_record_within_a_second_is_dropped() {
        let records = capture(Level::INFO, || {
            error!("first");
            error!("second");
        });
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "first");
    }

    #[test]
    fn notifier_and_foreign_targets_are_not_forwarded() {
        let records = capture(Level::INFO, || {
            warn!(target: "streak_keeper::notifier", "send failed");
            warn!(target: "hyper", "connection reset");
        });
        assert!(records.is_empty());
    }

    #[test]
    fn rate_limiter_allows_one_per_interval() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();
        assert!(limiter.allow(start));
        assert!(!limiter.allow(start + Duration::from_millis(500)));
        assert!(limiter.allow(start + Duration::from_secs(1)));
        assert!(!limiter.allow(start + Duration::from_millis(1500)));
    }

    #[test]
    fn record_html_is_escaped() {
        let record = LogRecord {
            level: Level::ERROR,
            message: "<script> failed".to_string(),
            at: Local::now(),
        };
        let text = record.to_html();
        assert!(text.starts_with("❌ <b>ERROR</b> ["));
        assert!(text.ends_with("&lt;script&gt; failed"));
    }

    #[test]
    fn daily_file_lands_in_log_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix("log")
            .build(dir.path())
            .expect("appender");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let subscriber = tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(writer));
        tracing::subscriber::with_default(subscriber, || info!("written to file"));
        drop(guard);

        let expected = format!(
            "{}.{}.log",
            LOG_FILE_PREFIX,
            chrono::Utc::now().format("%Y-%m-%d")
        );
        let content = fs::read_to_string(dir.path().join(expected)).expect("log file");
        assert!(content.contains("written to file"));
    }
}
