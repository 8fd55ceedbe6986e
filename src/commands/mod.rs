//! Command implementations
//!
//! Each module corresponds to a subcommand in the CLI.

pub mod contacts;
pub mod run;
pub mod schedule;
pub mod serve;

use std::sync::Arc;

use crate::config::Settings;
use crate::controller::{BrowserRunner, Controller};
use crate::notifier::Notifier;

pub use contacts::ContactsAction;
pub use serve::ServeOptions;

/// Controller wired to a real browser and the configured notifier.
pub fn build_controller(settings: Arc<Settings>) -> Arc<Controller> {
    let notifier = Notifier::from_settings(&settings.telegram);
    let runner = Arc::new(BrowserRunner::new(Arc::clone(&settings)));
    Arc::new(Controller::new(settings, runner, notifier))
}
