//! `meshpanel topics`: list the topic binding of every control.

use serde::Serialize;
use tabled::Tabled;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct TopicEntry {
    panel: String,
    control: String,
    kind: String,
    entity: String,
    command: String,
    state: String,
    refresh: String,
}

#[derive(Tabled)]
struct TopicRow {
    #[tabled(rename = "Panel")]
    panel: String,
    #[tabled(rename = "Control")]
    control: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Entity")]
    entity: String,
    #[tabled(rename = "Command")]
    command: String,
    #[tabled(rename = "State")]
    state: String,
}

pub fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let loaded = super::load(global)?;
    let color = output::should_color(global.color);

    let entries: Vec<TopicEntry> = loaded
        .model
        .all_controls()
        .iter()
        .map(|c| TopicEntry {
            panel: c.id.panel.clone(),
            control: c.id.label.clone(),
            kind: c.kind().to_string(),
            entity: c.entity.to_string(),
            command: c.binding.command.clone(),
            state: c.binding.state.clone(),
            refresh: c.binding.refresh.clone(),
        })
        .collect();

    let rendered = output::render_list(
        global.output,
        &entries,
        |e| TopicRow {
            panel: e.panel.clone(),
            control: e.control.clone(),
            kind: e.kind.clone(),
            entity: e.entity.clone(),
            command: e.command.clone(),
            state: output::dim(&e.state, color),
        },
        |e| e.command.clone(),
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
