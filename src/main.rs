use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use prompt_optimizer::catalog::OutputPreference;
use prompt_optimizer::cli::{self, Command, HistoryCommand, SettingsCommand, SettingsSetArgs};
use prompt_optimizer::config::{self, AppConfig};
use prompt_optimizer::errors::OptimizerError;
use prompt_optimizer::history::HistoryStore;
use prompt_optimizer::log;
use prompt_optimizer::provider::openai::OpenAiModelLister;
use prompt_optimizer::provider::{http_client, HttpProviderFactory, ProviderOptions};
use prompt_optimizer::session::{OptimizeInput, SessionController, SessionOptions};
use prompt_optimizer::settings::SettingsStore;
use prompt_optimizer::storage::{FileStorage, Storage};
use prompt_optimizer::ux;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    log::init(args.verbose);

    if let Err(e) = run(args).await {
        match e.downcast_ref::<OptimizerError>() {
            Some(oe) => eprintln!("{} {}", "error:".red().bold(), oe.user_message()),
            None => eprintln!("{} {:#}", "error:".red().bold(), e),
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(args: cli::Args) -> anyhow::Result<()> {
    let mut cfg = AppConfig::load(args.config.as_deref());
    if let Some(dir) = args.data_dir.clone() {
        cfg.data_dir = dir;
    }
    tracing::debug!(data_dir = %cfg.data_dir.display(), "configuration resolved");

    let storage: Arc<dyn Storage> = Arc::new(
        FileStorage::open(&cfg.data_dir)
            .with_context(|| format!("opening data dir {}", cfg.data_dir.display()))?,
    );
    let history = HistoryStore::load(storage.clone());
    let settings = SettingsStore::load(storage, config::env_managed_key());
    let factory = Arc::new(HttpProviderFactory::new(ProviderOptions::from_config(&cfg)));
    let mut session = SessionController::new(history, settings, factory, SessionOptions::from_config(&cfg));

    match args.command {
        Command::Optimize(o) => {
            let prompt = read_prompt(o.prompt)?;
            let input = OptimizeInput {
                prompt,
                change_request: String::new(),
                target_model: o.targeting.model,
                objective: o.targeting.objective,
                output: o.targeting.output,
                iterating: false,
            };
            run_optimize(&mut session, input, o.diff).await?;
        }
        Command::Iterate(it) => {
            session.view_history(it.index.unwrap_or(0))?;
            let state = session.state().clone();
            let input = OptimizeInput {
                prompt: it.prompt.unwrap_or(state.user_prompt),
                change_request: it.change,
                target_model: state.target_model,
                objective: state.objective,
                output: it.output.unwrap_or(state.output),
                iterating: true,
            };
            run_optimize(&mut session, input, it.diff).await?;
        }
        Command::History(cmd) => history_command(&mut session, cmd).await?,
        Command::Settings(cmd) => settings_command(&mut session, &cfg, cmd).await?,
    }
    Ok(())
}

async fn run_optimize(session: &mut SessionController, input: OptimizeInput, show_diff: bool) -> anyhow::Result<()> {
    if input.prompt.trim().is_empty() {
        println!("Nothing to optimize: the prompt is empty.");
        return Ok(());
    }
    let progress = ux::Progress::start(session.subscribe());
    let outcome = session.optimize(input).await;
    progress.finish();
    if let Some(item) = outcome? {
        ux::print_result(&item, show_diff);
        println!("{}", "Saved as history #0.".dimmed());
    }
    Ok(())
}

async fn history_command(session: &mut SessionController, cmd: HistoryCommand) -> anyhow::Result<()> {
    match cmd {
        HistoryCommand::List { search } => {
            ux::print_history(&session.grouped_history(&search), None);
        }
        HistoryCommand::Show { index, diff, raw } => {
            let item = session.history().get(index)?;
            if raw {
                println!("{}", item.optimized_prompt);
            } else {
                ux::print_result(item, diff);
            }
        }
        HistoryCommand::Restart { index, output } => {
            let original = session.history().get(index)?.original_prompt.clone();
            session.start_from_history(&original);
            let state = session.state().clone();
            let input = OptimizeInput {
                prompt: state.user_prompt,
                change_request: String::new(),
                target_model: state.target_model,
                objective: state.objective,
                output: output.unwrap_or(OutputPreference::Text),
                iterating: false,
            };
            run_optimize(session, input, false).await?;
        }
        HistoryCommand::Clear { yes } => {
            if session.history().is_empty() {
                println!("(no history)");
                return Ok(());
            }
            if !yes && !ux::confirm("Delete all history?") {
                println!("Aborted by user.");
                return Ok(());
            }
            session.history_mut().clear();
            println!("History cleared.");
        }
    }
    Ok(())
}

async fn settings_command(session: &mut SessionController, cfg: &AppConfig, cmd: SettingsCommand) -> anyhow::Result<()> {
    let store = session.settings_mut();
    match cmd {
        SettingsCommand::Show => {
            if store.was_migrated() {
                println!("{}", "Settings were upgraded from the legacy format.".dimmed());
            }
            ux::print_settings(&store.settings(), store.managed_key_from_env());
        }
        SettingsCommand::Models => {
            let mut draft = store.open_draft();
            let lister = OpenAiModelLister::new(http_client(Duration::from_secs(cfg.request_timeout_secs))?);
            let models = draft.fetch_models(&lister).await?;
            ux::print_models(models, &store.settings().custom.execution_model);
        }
        SettingsCommand::Set(set) => {
            let SettingsSetArgs {
                managed_key,
                managed_model,
                endpoint,
                custom_key,
                execution_model,
                fetch_models,
            } = set;
            let mut draft = store.open_draft();
            if let Some(k) = managed_key {
                if draft.managed_key_read_only() {
                    println!("{}", "The managed API key comes from the environment and cannot be changed here.".yellow());
                }
                draft.set_managed_key(&k);
            }
            if let Some(m) = managed_model {
                if !cfg.managed_models.iter().any(|x| x == &m) {
                    return Err(OptimizerError::Validation(format!(
                        "Unknown managed model {m:?}. Available: {}",
                        cfg.managed_models.join(", ")
                    ))
                    .into());
                }
                draft.managed.model = m;
            }
            if let Some(e) = endpoint {
                draft.custom.endpoint = e.trim().to_string();
            }
            if let Some(k) = custom_key {
                draft.custom.api_key = k.trim().to_string();
            }
            if fetch_models {
                let lister = OpenAiModelLister::new(http_client(Duration::from_secs(cfg.request_timeout_secs))?);
                let models = draft.fetch_models(&lister).await?;
                println!("Fetched {} model(s).", models.len());
            }
            if let Some(m) = execution_model {
                draft.custom.execution_model = m.trim().to_string();
            }
            let saved = store.commit(draft);
            ux::print_settings(&saved, store.managed_key_from_env());
        }
    }
    Ok(())
}

/// `None` or `-` reads the prompt from stdin.
fn read_prompt(arg: Option<String>) -> anyhow::Result<String> {
    match arg {
        Some(p) if p != "-" => Ok(p),
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading prompt from stdin")?;
            Ok(buf)
        }
    }
}
