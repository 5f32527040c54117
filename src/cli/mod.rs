use clap::builder::PossibleValuesParser;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::catalog::{self, OutputPreference};

#[derive(Parser, Debug)]
#[command(
    name = "prompt-optimizer",
    version,
    about = "Rewrite prompts for a target model with an LLM, keep a diffed history of every iteration"
)]
pub struct Args {
    /// -v for info, -vv for debug. RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Where history, settings and saved responses live.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a new optimization session.
    Optimize(OptimizeArgs),
    /// Refine the latest (or a chosen) history item with a change request.
    Iterate(IterateArgs),
    #[command(subcommand)]
    History(HistoryCommand),
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct Targeting {
    #[arg(long, value_parser = PossibleValuesParser::new(catalog::model_values()), default_value = catalog::UNIVERSAL)]
    pub model: String,

    #[arg(long, value_parser = PossibleValuesParser::new(catalog::objective_values()), default_value = catalog::DEFAULT_OBJECTIVE)]
    pub objective: String,

    #[arg(long, value_enum, default_value_t = OutputPreference::Text)]
    pub output: OutputPreference,
}

#[derive(ClapArgs, Debug)]
pub struct OptimizeArgs {
    /// The prompt text, or `-` (or nothing) to read stdin.
    pub prompt: Option<String>,

    #[command(flatten)]
    pub targeting: Targeting,

    /// Print the rendered diff instead of the plain result.
    #[arg(long)]
    pub diff: bool,
}

#[derive(ClapArgs, Debug)]
pub struct IterateArgs {
    #[arg(long)]
    pub change: String,

    /// History index to continue from. Defaults to the newest item.
    #[arg(long)]
    pub index: Option<usize>,

    /// Edited prompt text to use instead of the stored optimized prompt.
    #[arg(long)]
    pub prompt: Option<String>,

    #[arg(long, value_enum)]
    pub output: Option<OutputPreference>,

    #[arg(long)]
    pub diff: bool,
}

#[derive(Subcommand, Debug)]
pub enum HistoryCommand {
    /// Grouped by original prompt, newest first.
    List {
        #[arg(long, default_value = "")]
        search: String,
    },
    Show {
        index: usize,
        #[arg(long)]
        diff: bool,
        /// Print only the optimized prompt.
        #[arg(long)]
        raw: bool,
    },
    /// Re-run the original prompt of item N's group as a fresh session.
    Restart {
        index: usize,
        #[arg(long, value_enum)]
        output: Option<OutputPreference>,
    },
    Clear {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    Show,
    Set(SettingsSetArgs),
    /// List the models offered by the custom endpoint.
    Models,
}

#[derive(ClapArgs, Debug, Default)]
pub struct SettingsSetArgs {
    #[arg(long)]
    pub managed_key: Option<String>,
    #[arg(long)]
    pub managed_model: Option<String>,
    #[arg(long)]
    pub endpoint: Option<String>,
    #[arg(long)]
    pub custom_key: Option<String>,
    #[arg(long)]
    pub execution_model: Option<String>,
    /// Fetch models from the endpoint and select the first one before saving.
    #[arg(long)]
    pub fetch_models: bool,
}
