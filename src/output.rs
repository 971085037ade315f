use console::{style, StyledObject, Term};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use termimad;

#[derive(Debug, PartialEq)]
pub enum Confirmation {
    Yes,
    No,
    Always,
}

pub trait Output: Send + Sync {
    fn display_text(&self, text: &str);
    fn display_tool_call(&self, name: &str, args: &Value);
    fn display_tool_result(&self, result: &str);
    fn display_error(&self, error: &str);
    fn display_system(&self, text: &str);
    fn display_report(&self, path: Option<&Path>, report: &str);
    fn confirm(&self, message: &str) -> Confirmation;
    fn display_separator(&self);
    fn display_thinking(&self, message: &str);
    fn stop_thinking(&self);
    fn display_header(&self, provider: &str, model: &str, yolo: bool, max_turns: usize, csv: &str);
}

/// Cuts `s` to at most `max_chars` characters, marking the cut with `...`.
pub fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(Duration::from_millis(120));
    if let Ok(s) = ProgressStyle::default_spinner().template("{spinner:.blue} {msg}") {
        pb.set_style(s);
    }
    pb.set_message(message.to_string());
    pb
}

fn read_answer() -> String {
    use std::io::{self, Write};
    let _ = io::stdout().flush();
    let mut input = String::new();
    let _ = io::stdin().read_line(&mut input);
    input.trim().to_lowercase()
}

fn parse_confirmation(input: &str) -> Confirmation {
    match input {
        "y" | "yes" => Confirmation::Yes,
        "s" | "session" => Confirmation::Always,
        _ => Confirmation::No,
    }
}

/// Spinner only; prints the final report and errors.
pub struct QuietOutput {
    spinner: Mutex<Option<ProgressBar>>,
}

impl QuietOutput {
    pub fn new() -> Self {
        Self {
            spinner: Mutex::new(None),
        }
    }
}

impl Default for QuietOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl Output for QuietOutput {
    fn display_text(&self, _text: &str) {}
    fn display_tool_call(&self, _name: &str, _args: &Value) {}
    fn display_tool_result(&self, _result: &str) {}
    fn display_error(&self, error: &str) {
        self.stop_thinking();
        eprintln!("Error: {}", error);
    }
    fn display_system(&self, _text: &str) {}
    fn display_report(&self, _path: Option<&Path>, report: &str) {
        self.stop_thinking();
        println!("{}", report);
    }
    fn confirm(&self, message: &str) -> Confirmation {
        self.stop_thinking();
        eprintln!("Confirm: {} [y/n/s]", message);
        parse_confirmation(&read_answer())
    }
    fn display_separator(&self) {}
    fn display_thinking(&self, message: &str) {
        if let Ok(mut spinner) = self.spinner.lock() {
            if spinner.is_none() {
                *spinner = Some(create_spinner(message));
            }
        }
    }
    fn stop_thinking(&self) {
        if let Some(pb) = self.spinner.lock().ok().and_then(|mut s| s.take()) {
            pb.finish_and_clear();
        }
    }
    fn display_header(&self, _provider: &str, _model: &str, _yolo: bool, _max_turns: usize, _csv: &str) {}
}

pub struct NoOutput;

impl Output for NoOutput {
    fn display_text(&self, _text: &str) {}
    fn display_tool_call(&self, _name: &str, _args: &Value) {}
    fn display_tool_result(&self, _result: &str) {}
    fn display_error(&self, _error: &str) {}
    fn display_system(&self, _text: &str) {}
    fn display_report(&self, _path: Option<&Path>, _report: &str) {}
    fn confirm(&self, _message: &str) -> Confirmation {
        Confirmation::Yes
    }
    fn display_separator(&self) {}
    fn display_thinking(&self, _message: &str) {}
    fn stop_thinking(&self) {}
    fn display_header(&self, _provider: &str, _model: &str, _yolo: bool, _max_turns: usize, _csv: &str) {}
}

/// Routes everything through `tracing`. Never approves guarded tools.
pub struct LogOutput;

impl Output for LogOutput {
    fn display_text(&self, text: &str) {
        tracing::info!(target: "csv_analyst", "{}", text);
    }

    fn display_tool_call(&self, name: &str, args: &Value) {
        tracing::info!(target: "csv_analyst", "Tool call: {} with args: {}", name, args);
    }

    fn display_tool_result(&self, result: &str) {
        tracing::info!(target: "csv_analyst", "Tool result: {}", truncate(result, 500));
    }

    fn display_error(&self, error: &str) {
        tracing::error!(target: "csv_analyst", "{}", error);
    }

    fn display_system(&self, text: &str) {
        tracing::debug!(target: "csv_analyst", "System: {}", text);
    }

    fn display_report(&self, path: Option<&Path>, report: &str) {
        match path {
            Some(p) => tracing::info!(target: "csv_analyst", "Report ({}):\n{}", p.display(), report),
            None => tracing::info!(target: "csv_analyst", "Report:\n{}", report),
        }
    }

    fn confirm(&self, message: &str) -> Confirmation {
        tracing::warn!(target: "csv_analyst", "Declined without a terminal: {}", message);
        Confirmation::No
    }

    fn display_separator(&self) {}

    fn display_thinking(&self, _message: &str) {}

    fn stop_thinking(&self) {}

    fn display_header(&self, provider: &str, model: &str, yolo: bool, max_turns: usize, csv: &str) {
        tracing::info!(target: "csv_analyst", "csv-analyst | {} | {} | csv:{} | yolo:{} turns:{}", provider, model, csv, yolo, max_turns);
    }
}

pub struct ConsoleOutput {
    spinner: Mutex<Option<ProgressBar>>,
}

fn get_preview(args: &Value) -> String {
    let s = if let Some(obj) = args.as_object() {
        obj.values()
            .next()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                _ => v.to_string(),
            })
            .unwrap_or_default()
    } else {
        args.to_string()
    };
    truncate(&s.replace('\n', " "), 60)
}

/// Tool results arrive JSON-encoded; show the plain text.
fn unquote(result: &str) -> String {
    serde_json::from_str::<Value>(result)
        .ok()
        .and_then(|v| match v {
            Value::String(s) => Some(s),
            _ => None,
        })
        .unwrap_or_else(|| result.to_string())
}

impl ConsoleOutput {
    pub fn new() -> Self {
        Self {
            spinner: Mutex::new(None),
        }
    }

    fn separator() {
        let width = Term::stdout().size().1 as usize;
        println!("{}", style("─".repeat(width)).dim());
    }
}

impl Default for ConsoleOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl Output for ConsoleOutput {
    fn display_text(&self, text: &str) {
        self.stop_thinking();
        println!();
        print!("{} ", style("⏺").cyan());
        termimad::print_inline(text);
        println!();
    }

    fn display_tool_call(&self, name: &str, args: &Value) {
        self.stop_thinking();
        println!(
            "\n{} {}({})",
            style("⏺").green(),
            style(name).bold(),
            style(get_preview(args)).dim()
        );
    }

    fn display_tool_result(&self, result: &str) {
        self.stop_thinking();

        let result = unquote(result);
        let result = result.as_str();
        let mut cleaned = result;
        while let Some(stripped) = cleaned
            .strip_prefix("Toolset error: ")
            .or_else(|| cleaned.strip_prefix("ToolCallError: "))
        {
            cleaned = stripped;
        }
        let is_error = cleaned.len() != result.len();
        let lines: Vec<_> = cleaned.lines().collect();

        if lines.is_empty() {
            println!("  {}  {}", style("└").dim(), style("(empty)").dim());
            return;
        }

        let show_max = if is_error { usize::MAX } else { 4 };
        for (i, line) in lines.iter().take(show_max).enumerate() {
            let symbol = if i == lines.len() - 1 && lines.len() <= show_max {
                "└"
            } else {
                "│"
            };
            let styled = if is_error {
                style(line.to_string()).red()
            } else {
                style(truncate(line, 100)).dim()
            };
            println!("  {}  {}", style(symbol).dim(), styled);
        }

        if lines.len() > show_max {
            println!(
                "  {}  {}",
                style("└").dim(),
                style(format!("... +{} lines", lines.len() - show_max)).dim()
            );
        }
    }

    fn display_error(&self, error: &str) {
        self.stop_thinking();
        println!("{} Error: {}", style("⏺").red(), error);
    }

    fn display_system(&self, text: &str) {
        self.stop_thinking();
        println!("{}", style(text).bold().dim());
    }

    fn display_report(&self, path: Option<&Path>, report: &str) {
        self.stop_thinking();
        Self::separator();
        println!("{}", style("ANALYSIS COMPLETE").bold().green());
        Self::separator();
        if let Some(p) = path {
            println!("\nResults saved to: {}", style(p.display()).cyan());
        }
        println!("\n{}\n", style("--- Analysis Report ---").bold());
        termimad::print_text(report);
    }

    fn confirm(&self, message: &str) -> Confirmation {
        self.stop_thinking();
        println!("\n{} {} [y/n/s]", style("⚠").yellow(), message);
        println!(
            "  {}es / {}o / {}ession",
            style("y").bold(),
            style("n").bold(),
            style("s").bold()
        );
        parse_confirmation(&read_answer())
    }

    fn display_separator(&self) {
        self.stop_thinking();
        Self::separator();
    }

    fn display_thinking(&self, message: &str) {
        if let Ok(mut spinner) = self.spinner.lock() {
            if spinner.is_none() {
                *spinner = Some(create_spinner(message));
            }
        }
    }

    fn stop_thinking(&self) {
        if let Some(pb) = self.spinner.lock().ok().and_then(|mut s| s.take()) {
            pb.finish_and_clear();
        }
    }

    fn display_header(&self, provider: &str, model: &str, yolo: bool, max_turns: usize, csv: &str) {
        let status = |active, label, color: fn(StyledObject<String>) -> StyledObject<String>| {
            let s = style(format!("[{}] {}", if active { "x" } else { " " }, label));
            if active {
                color(s)
            } else {
                s.dim()
            }
        };

        println!();
        Self::separator();
        println!(
            "{} | {} ({}) | {} | {}",
            style("csv-analyst").bold(),
            style(provider).cyan(),
            style(model).blue(),
            status(yolo, "yolo", |s| s.red()),
            style(format!("turns:{}", max_turns)).yellow(),
        );
        println!("{} {}", style("CSV File:").bold(), style(csv).dim());
        Self::separator();
    }
}
