//! Command dispatch: bridges CLI args -> configuration -> output formatting.

pub mod check;
pub mod discovery;
pub mod simulate;
pub mod topics;

use meshpanel_config::Config;
use meshpanel_core::{PanelModel, SyncConfig};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a configuration-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Check(args) => check::handle(&args, global),
        Command::Topics => topics::handle(global),
        Command::Discovery(args) => discovery::handle(&args, global),
        Command::Simulate(args) => simulate::handle(args, global).await,
        // Completions are handled before dispatch
        Command::Completions(_) => Ok(()),
    }
}

/// A fully validated configuration.
pub struct Loaded {
    pub config: Config,
    pub sync: SyncConfig,
    pub model: PanelModel,
}

/// Load the configuration selected by `--config` and validate it.
pub fn load(global: &GlobalOpts) -> Result<Loaded, CliError> {
    let config = meshpanel_config::load_config(global.config.as_deref())?;
    let sync = config.to_sync_config()?;
    let model = config.build_model()?;
    tracing::debug!(
        panels = model.panels().len(),
        controls = model.all_controls().len(),
        "configuration loaded"
    );
    Ok(Loaded {
        config,
        sync,
        model,
    })
}
