//! Scheduler only, without the API or the bot

use std::sync::Arc;

use tracing::info;

use crate::config::Settings;
use crate::error::Result;
use crate::scheduler;

use super::build_controller;

pub async fn run(settings: Settings) -> Result<()> {
    let controller = build_controller(Arc::new(settings));
    tokio::select! {
        _ = scheduler::run_forever(Arc::clone(&controller)) => {}
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Ctrl-C received, stopping scheduler");
        }
    }
    Ok(())
}
