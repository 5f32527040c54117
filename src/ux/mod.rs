use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use scraper::{ElementRef, Html};
use std::io::{self, Write};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::catalog;
use crate::history::HistoryGroup;
use crate::session::{Phase, SessionEvent};
use crate::wire::{format_millis, HistoryItem, ProviderKind, Settings};

/// Renders diff markup for a terminal: insertions green, deletions red and
/// struck through, everything else as plain text.
pub fn render_diff(html: &str) -> String {
    let doc = Html::parse_fragment(html);
    let mut out = String::new();
    walk(doc.root_element(), Mark::None, &mut out);
    out
}

#[derive(Clone, Copy)]
enum Mark {
    None,
    Ins,
    Del,
}

fn walk(el: ElementRef<'_>, mark: Mark, out: &mut String) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            let t: &str = text;
            let piece = match mark {
                Mark::None => t.normal(),
                Mark::Ins => t.green().underline(),
                Mark::Del => t.red().strikethrough(),
            };
            out.push_str(&piece.to_string());
        } else if let Some(child_el) = ElementRef::wrap(child) {
            let next = match child_el.value().name() {
                "ins" => Mark::Ins,
                "del" => Mark::Del,
                "br" => {
                    out.push('\n');
                    mark
                }
                _ => mark,
            };
            walk(child_el, next, out);
        }
    }
}

pub fn print_result(item: &HistoryItem, show_diff: bool) {
    println!(
        "\n{}  {}  {}",
        "=== OPTIMIZED ===".bold(),
        format!("+{}", item.additions).green().bold(),
        format!("-{}", item.deletions).red().bold()
    );
    println!(
        "{} {}   {} {}",
        "target:".dimmed(),
        catalog::model_name(&item.target_model),
        "objective:".dimmed(),
        catalog::objective_name(&item.prompt_objective)
    );
    if !item.change_request.is_empty() {
        println!("{} {}", "change request:".dimmed(), item.change_request);
    }
    println!();
    if show_diff {
        println!("{}", render_diff(&item.full_prompt_diff_html));
    } else {
        println!("{}", item.optimized_prompt);
    }

    if !item.changes.is_empty() {
        println!("\n{}", "Why these changes:".bold());
        for (i, c) in item.changes.iter().enumerate() {
            println!("{}. {}", i + 1, c.reasoning);
        }
    }
    println!();
}

pub fn print_history(groups: &[HistoryGroup<'_>], active: Option<usize>) {
    if groups.is_empty() {
        println!("(no history)");
        return;
    }
    for g in groups {
        let latest = g.latest();
        let header = preview_line(g.original_prompt, 72);
        println!("{}", header.bold());
        if let Some(l) = latest {
            println!(
                "  {} {}   {}",
                "latest:".dimmed(),
                format!("#{}", l.index).cyan(),
                format_millis(&l.item.timestamp).dimmed()
            );
        }
        for e in &g.entries {
            let marker = if Some(e.index) == active { "*" } else { " " };
            let label = if e.item.change_request.is_empty() {
                "(initial)".to_string()
            } else {
                preview_line(&e.item.change_request, 48)
            };
            println!(
                " {}{:>4}  {}  {}  {}",
                marker,
                e.index,
                format!("+{}", e.item.additions).green(),
                format!("-{}", e.item.deletions).red(),
                label
            );
        }
        println!();
    }
}

pub fn print_settings(settings: &Settings, key_from_env: bool) {
    let provider = match settings.provider {
        ProviderKind::Managed => "managed",
        ProviderKind::Custom => "custom",
    };
    println!("{} {}", "provider:".bold(), provider);
    println!("{}", "managed".bold());
    let source = if key_from_env { " (from environment)" } else { "" };
    println!("  api key: {}{}", mask_key(&settings.managed.api_key), source.dimmed());
    println!("  model:   {}", settings.managed.model);
    println!("{}", "custom".bold());
    println!("  endpoint:        {}", or_dash(&settings.custom.endpoint));
    println!("  api key:         {}", mask_key(&settings.custom.api_key));
    println!("  execution model: {}", or_dash(&settings.custom.execution_model));
    if !settings.custom.models.is_empty() {
        println!("  models:          {}", settings.custom.models.join(", "));
    }
}

pub fn print_models(models: &[String], selected: &str) {
    for m in models {
        let marker = if m == selected { "*".green().to_string() } else { " ".into() };
        println!("{marker} {m}");
    }
}

/// Shows the first and last four characters of long keys.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    match chars.len() {
        0 => "-".into(),
        n if n <= 8 => "*".repeat(n),
        n => {
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[n - 4..].iter().collect();
            format!("{head}…{tail}")
        }
    }
}

fn or_dash(s: &str) -> &str {
    if s.trim().is_empty() {
        "-"
    } else {
        s
    }
}

fn preview_line(s: &str, max: usize) -> String {
    let line = s.lines().next().unwrap_or_default();
    let mut out: String = line.chars().take(max).collect();
    if line.chars().count() > max || s.lines().nth(1).is_some() {
        out.push('…');
    }
    out
}

pub fn confirm(prompt: &str) -> bool {
    print!("{} [y/N]: ", prompt);
    let _ = io::stdout().flush();
    let mut s = String::new();
    if io::stdin().read_line(&mut s).is_ok() {
        let ans = s.trim().to_lowercase();
        ans == "y" || ans == "yes"
    } else {
        false
    }
}

/// Spinner fed by session events until the request settles.
pub struct Progress {
    bar: ProgressBar,
    task: JoinHandle<()>,
}

impl Progress {
    pub fn start(mut rx: broadcast::Receiver<SessionEvent>) -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_message("Sending...");

        let shown = bar.clone();
        let task = tokio::spawn(async move {
            let bar = shown;
            let mut status = String::from("Sending...");
            let mut thinking: Option<u64> = None;
            loop {
                match rx.recv().await {
                    Ok(SessionEvent::Phase(p)) => {
                        status = match p {
                            Phase::Sending => "Sending...".into(),
                            Phase::Streaming { first_token: false } => "Waiting for the model...".into(),
                            Phase::Streaming { first_token: true } => "Receiving...".into(),
                            Phase::Parsing => "Parsing response...".into(),
                            Phase::Idle | Phase::Succeeded | Phase::Failed => break,
                        };
                    }
                    Ok(SessionEvent::ThinkingTick(n)) => thinking = Some(n),
                    Ok(SessionEvent::ThinkingStopped) => thinking = None,
                    Ok(SessionEvent::LoadingMessage(m)) => status = m.to_string(),
                    Ok(SessionEvent::Completed { .. }) | Ok(SessionEvent::Failed(_)) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                match thinking {
                    Some(n) => bar.set_message(format!("{status} (thinking {n}s)")),
                    None => bar.set_message(status.clone()),
                }
            }
        });
        Self { bar, task }
    }

    pub fn finish(self) {
        self.task.abort();
        self.bar.finish_and_clear();
    }
}
