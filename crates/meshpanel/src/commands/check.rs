//! `meshpanel check`: validate the configuration.

use serde::Serialize;

use crate::cli::{CheckArgs, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct Summary {
    topic_base: String,
    panels: usize,
    controls: usize,
    kinds: Vec<String>,
}

pub fn handle(args: &CheckArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let loaded = super::load(global)?;

    if args.effective {
        output::print_output(loaded.config.to_yaml()?.trim_end(), global.quiet);
        return Ok(());
    }

    let summary = Summary {
        topic_base: loaded.sync.topic_base.clone(),
        panels: loaded.model.panels().len(),
        controls: loaded.model.all_controls().len(),
        kinds: loaded
            .model
            .kinds_in_use()
            .iter()
            .map(ToString::to_string)
            .collect(),
    };

    let rendered = match global.output {
        OutputFormat::Table | OutputFormat::Plain => output::ok_line(
            &format!(
                "{} panels, {} controls under '{}'",
                summary.panels, summary.controls, summary.topic_base
            ),
            output::should_color(global.color),
        ),
        format => output::render_single(format, &summary)?,
    };
    output::print_output(&rendered, global.quiet);
    Ok(())
}
