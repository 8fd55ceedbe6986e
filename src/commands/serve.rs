//! Daemon: REST API, Telegram bot and scheduler over one controller

use std::sync::Arc;

use teloxide::Bot;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::error::Result;
use crate::{api, bot, scheduler};

use super::build_controller;

#[derive(Debug, Clone, Copy)]
pub struct ServeOptions {
    pub api: bool,
    pub bot: bool,
    pub scheduler: bool,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            api: true,
            bot: true,
            scheduler: true,
        }
    }
}

pub async fn run(settings: Settings, options: ServeOptions) -> Result<()> {
    let settings = Arc::new(settings);
    let controller = build_controller(Arc::clone(&settings));
    let contacts = controller.store().list()?.len();

    info!(
        app = %settings.app_name,
        env = %settings.app_env,
        schedule = %settings.schedule_label(),
        headless = settings.headless,
        contacts,
        "Starting streak keeper"
    );

    let mut tasks = Vec::new();

    if options.api {
        if settings.api_key.is_none() {
            warn!("API_KEY not set; /v1 endpoints will refuse every request");
        }
        let listener = TcpListener::bind(settings.api_addr).await?;
        let controller = Arc::clone(&controller);
        tasks.push(tokio::spawn(async move {
            if let Err(e) = api::serve(listener, controller).await {
                error!("REST API stopped: {}", e);
            }
        }));
    }

    if options.scheduler {
        tasks.push(tokio::spawn(scheduler::run_forever(Arc::clone(&controller))));
    }

    controller
        .notifier()
        .notify_online(&settings.app_name, &settings.schedule_label(), contacts)
        .await;

    let token = settings
        .telegram
        .bot_token
        .as_ref()
        .filter(|_| options.bot && settings.telegram.enabled);
    match token {
        Some(token) => bot::run_bot(Bot::new(token.expose()), Arc::clone(&controller)).await,
        None => {
            if options.bot {
                warn!("TELEGRAM_BOT_TOKEN not set or Telegram disabled; bot not started");
            }
            tokio::signal::ctrl_c().await?;
        }
    }

    info!("Shutting down");
    for task in tasks {
        task.abort();
    }
    Ok(())
}
