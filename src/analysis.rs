use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;

use crate::agent::AnalysisAgent;
use crate::config::{DEFAULT_OUTPUT_PATH, DEFAULT_PYTHON};
use crate::environment::validate_csv_path;
use crate::events::{AgentEvent, Transcript};
use crate::output::truncate;
use crate::prompt::{build_analysis_prompt, PromptStyle};
use crate::{AnalystError, Output, Result};

pub const NO_REPORT_NOTICE: &str =
    "Analysis completed but no report file was generated. Check agent output above.";

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub csv_path: PathBuf,
    pub question: String,
    pub output_path: PathBuf,
    pub verbose: bool,
    pub style: PromptStyle,
    pub python: String,
}

impl AnalysisRequest {
    pub fn new(csv_path: impl Into<PathBuf>, question: impl Into<String>) -> Self {
        Self {
            csv_path: csv_path.into(),
            question: question.into(),
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            verbose: true,
            style: PromptStyle::Detailed,
            python: DEFAULT_PYTHON.to_string(),
        }
    }

    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = path.into();
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn style(mut self, style: PromptStyle) -> Self {
        self.style = style;
        self
    }

    pub fn python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportSource {
    /// Read back from the report path the agent wrote.
    File(PathBuf),
    /// The agent never wrote the file; this is its streamed text.
    Transcript,
    Missing,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub report: String,
    pub source: ReportSource,
    pub tool_calls: usize,
}

struct Prepared {
    prompt: String,
    output_path: PathBuf,
}

async fn prepare(request: &AnalysisRequest, style: PromptStyle) -> Result<Prepared> {
    validate_csv_path(&request.csv_path)?;

    if let Some(parent) = request.output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let csv_abs = fs::canonicalize(&request.csv_path).await?;
    let output_abs = std::path::absolute(&request.output_path)?;
    let prompt = build_analysis_prompt(
        &csv_abs,
        &request.question,
        &output_abs,
        &request.python,
        style,
    );

    Ok(Prepared {
        prompt,
        output_path: output_abs,
    })
}

/// Sends one instruction and consumes the event stream until it ends. A
/// failure mid-stream is handed back with whatever was seen before it.
async fn drive(
    agent: &dyn AnalysisAgent,
    prompt: String,
    mut on_event: impl FnMut(&AgentEvent),
) -> (Transcript, Option<AnalystError>) {
    let mut transcript = Transcript::new();
    let mut events = match agent.run(prompt).await {
        Ok(events) => events,
        Err(e) => return (transcript, Some(e)),
    };
    while let Some(event) = events.next().await {
        match event {
            Ok(event) => {
                on_event(&event);
                transcript.record(&event);
            }
            Err(e) => return (transcript, Some(e)),
        }
    }
    tracing::debug!(
        target: "csv_analyst",
        tool_calls = transcript.tool_calls(),
        tool_results = transcript.tool_results(),
        "event stream ended"
    );
    (transcript, None)
}

/// Whether the report at `path` was written after `started`.
async fn written_since(path: &Path, started: SystemTime) -> bool {
    // file timestamps can trail the wall clock by a scheduler tick
    let since = started - Duration::from_secs(1);
    match fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified >= since,
        Err(_) => false,
    }
}

/// Runs the session; if it fails after the agent already wrote a fresh report,
/// the report wins over the error.
async fn run_session(
    agent: &dyn AnalysisAgent,
    prepared: Prepared,
    on_event: impl FnMut(&AgentEvent),
) -> Result<AnalysisOutcome> {
    let started = SystemTime::now();
    let (transcript, failure) = drive(agent, prepared.prompt, on_event).await;
    if let Some(e) = failure {
        if !written_since(&prepared.output_path, started).await {
            return Err(e);
        }
        tracing::warn!(
            target: "csv_analyst",
            error = %e,
            "agent session failed after writing its report; keeping the report"
        );
    }
    collect_report(&prepared.output_path, &transcript).await
}

async fn collect_report(output_path: &Path, transcript: &Transcript) -> Result<AnalysisOutcome> {
    let tool_calls = transcript.tool_calls();
    if fs::try_exists(output_path).await? {
        let report = fs::read_to_string(output_path).await?;
        return Ok(AnalysisOutcome {
            report,
            source: ReportSource::File(output_path.to_path_buf()),
            tool_calls,
        });
    }

    tracing::warn!(target: "csv_analyst", path = %output_path.display(), "agent did not write a report");
    if transcript.is_empty() {
        Ok(AnalysisOutcome {
            report: NO_REPORT_NOTICE.to_string(),
            source: ReportSource::Missing,
            tool_calls,
        })
    } else {
        Ok(AnalysisOutcome {
            report: transcript.text(),
            source: ReportSource::Transcript,
            tool_calls,
        })
    }
}

fn show_event(output: &dyn Output, event: &AgentEvent) {
    match event {
        AgentEvent::Text(text) => output.display_text(&format!("[Agent] {}", truncate(text.trim(), 200))),
        AgentEvent::ToolCall { name, args } => output.display_tool_call(name, args),
        AgentEvent::ToolResult { output: result, .. } => {
            output.display_tool_result(result);
            output.display_thinking("Analyzing...");
        }
    }
}

/// Runs the agent against `request.csv_path` and returns the report it wrote,
/// or what it said if it never wrote one.
pub async fn analyze_csv(
    agent: &dyn AnalysisAgent,
    request: &AnalysisRequest,
    output: &dyn Output,
) -> Result<AnalysisOutcome> {
    let prepared = prepare(request, request.style).await?;

    if request.verbose {
        output.display_system(&format!(
            "[Agent] Starting analysis of: {}",
            request.csv_path.display()
        ));
        output.display_system(&format!(
            "[Agent] User prompt: {}",
            truncate(request.question.trim(), 100)
        ));
    }
    tracing::info!(
        target: "csv_analyst",
        csv = %request.csv_path.display(),
        output = %prepared.output_path.display(),
        "starting analysis"
    );

    output.display_thinking("Analyzing...");
    let verbose = request.verbose;
    let outcome = run_session(agent, prepared, |event| {
        if verbose {
            show_event(output, event);
        }
    })
    .await;
    output.stop_thinking();
    let outcome = outcome?;

    if request.verbose {
        output.display_system("[Agent] Analysis complete.");
        if let ReportSource::File(path) = &outcome.source {
            output.display_system(&format!("[Agent] Report saved to: {}", path.display()));
        }
    }
    Ok(outcome)
}

/// Same flow with the concise instruction; every event goes to `callback`
/// and nothing is printed.
pub async fn analyze_csv_streaming(
    agent: &dyn AnalysisAgent,
    request: &AnalysisRequest,
    callback: impl FnMut(&AgentEvent),
) -> Result<AnalysisOutcome> {
    let prepared = prepare(request, PromptStyle::Concise).await?;
    run_session(agent, prepared, callback).await
}

/// Blocking wrapper around [`analyze_csv`]. Must not be called from inside a
/// tokio runtime.
pub fn run_analysis(
    agent: &dyn AnalysisAgent,
    request: &AnalysisRequest,
    output: &dyn Output,
) -> Result<AnalysisOutcome> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(analyze_csv(agent, request, output))
}
