//! `meshpanel discovery`: print the discovery payload for a device.

use meshpanel_core::{Announce, DiscoveryPayload, discovery::degraded_controls};

use crate::cli::{DiscoveryArgs, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

pub fn handle(args: &DiscoveryArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let loaded = super::load(global)?;

    let mut announce = Announce::new("cli");
    announce.capabilities.clone_from(&args.capabilities);
    let degraded = degraded_controls(&loaded.model, &announce.capabilities());
    for id in &degraded {
        tracing::info!(control = %id, "control not interactive for these capabilities");
    }

    let payload = DiscoveryPayload::build(&loaded.model, &degraded);
    let rendered = match global.output {
        // The wire form is what devices receive.
        OutputFormat::Plain => payload.to_json()?,
        format => output::render_single(format, &payload)?,
    };
    output::print_output(&rendered, global.quiet);
    Ok(())
}
