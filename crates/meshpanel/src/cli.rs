//! Clap derive structures for the `meshpanel` CLI.
//!
//! Defines the command tree, global flags, and shared value enums.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// meshpanel -- sync home-automation entities with MQTT display panels
#[derive(Debug, Parser)]
#[command(
    name = "meshpanel",
    version,
    about = "Validate, inspect and simulate meshpanel panel configurations",
    long_about = "Tooling for the meshpanel synchronization engine.\n\n\
        Panels and controls are declared in a YAML file; every control is bound\n\
        to a state-store entity and a pair of MQTT-style topics.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Path to the YAML configuration file
    #[arg(long, short = 'c', env = "MESHPANEL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load and validate the configuration
    Check(CheckArgs),

    /// List every control with its command and state topics
    #[command(alias = "t")]
    Topics,

    /// Print the discovery payload a device would receive
    Discovery(DiscoveryArgs),

    /// Run the engine against in-memory adapters and print the traffic
    #[command(alias = "sim")]
    Simulate(SimulateArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Command Arguments ────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Print the effective configuration after defaults and environment
    #[arg(long)]
    pub effective: bool,
}

#[derive(Debug, Args)]
pub struct DiscoveryArgs {
    /// Control kinds the device renders (default: all)
    #[arg(long, value_delimiter = ',')]
    pub capabilities: Option<Vec<String>>,
}

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Device id used for the announce
    #[arg(long, default_value = "simulator")]
    pub device_id: String,

    /// Control kinds the simulated device renders (default: all)
    #[arg(long, value_delimiter = ',')]
    pub capabilities: Option<Vec<String>>,

    /// Send a display command: PANEL/CONTROL=PAYLOAD (repeatable)
    #[arg(long = "set", value_name = "PANEL/CONTROL=PAYLOAD")]
    pub commands: Vec<String>,

    /// Change an entity in the state store: ENTITY=STATE (repeatable)
    #[arg(long = "change", value_name = "ENTITY=STATE")]
    pub changes: Vec<String>,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
