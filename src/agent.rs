use crate::events::{AgentEvent, EventStream};
use crate::output::Confirmation;
use crate::tools::{Bash, BashArgs, GlobFiles, GrepText, ReadFile, ToolError, Workspace, WriteFile};
use crate::{AnalystError, Output, Result};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{FutureExt, StreamExt};
use rig::agent::{Agent, AgentBuilder, CancelSignal, PromptHook};
use rig::client::{CompletionClient, ProviderClient};
use rig::completion::{CompletionModel, CompletionResponse, Prompt, PromptError, ToolDefinition};
use rig::message::{AssistantContent, Message};
use rig::providers::{anthropic, deepseek, gemini, groq, mistral, ollama, openai, openrouter, xai};
use rig::tool::Tool;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const MAX_TOKENS: u64 = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Provider {
    #[default]
    Anthropic,
    OpenAI,
    Gemini,
    Groq,
    Mistral,
    DeepSeek,
    OpenRouter,
    Xai,
    Ollama,
}

impl Provider {
    pub const ALL: [Provider; 9] = [
        Provider::Anthropic,
        Provider::OpenAI,
        Provider::Gemini,
        Provider::Groq,
        Provider::Mistral,
        Provider::DeepSeek,
        Provider::OpenRouter,
        Provider::Xai,
        Provider::Ollama,
    ];

    /// `None` for providers that run locally without a key.
    pub fn api_key_var(self) -> Option<&'static str> {
        match self {
            Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
            Provider::OpenAI => Some("OPENAI_API_KEY"),
            Provider::Gemini => Some("GEMINI_API_KEY"),
            Provider::Groq => Some("GROQ_API_KEY"),
            Provider::Mistral => Some("MISTRAL_API_KEY"),
            Provider::DeepSeek => Some("DEEPSEEK_API_KEY"),
            Provider::OpenRouter => Some("OPENROUTER_API_KEY"),
            Provider::Xai => Some("XAI_API_KEY"),
            Provider::Ollama => None,
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::Anthropic => "claude-sonnet-4-6",
            Provider::OpenAI => "gpt-4o-mini",
            Provider::Gemini => "gemini-1.5-pro",
            Provider::Groq => "llama3-70b-8192",
            Provider::Mistral => "mistral-large-latest",
            Provider::DeepSeek => "deepseek-chat",
            Provider::OpenRouter => "meta-llama/llama-3-70b-instruct",
            Provider::Xai => "grok-1",
            Provider::Ollama => "llama3",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAI => "openai",
            Provider::Gemini => "gemini",
            Provider::Groq => "groq",
            Provider::Mistral => "mistral",
            Provider::DeepSeek => "deepseek",
            Provider::OpenRouter => "openrouter",
            Provider::Xai => "xai",
            Provider::Ollama => "ollama",
        };
        f.write_str(name)
    }
}

impl FromStr for Provider {
    type Err = AnalystError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            "openai" => Ok(Provider::OpenAI),
            "gemini" | "google" => Ok(Provider::Gemini),
            "groq" => Ok(Provider::Groq),
            "mistral" => Ok(Provider::Mistral),
            "deepseek" => Ok(Provider::DeepSeek),
            "openrouter" => Ok(Provider::OpenRouter),
            "xai" => Ok(Provider::Xai),
            "ollama" => Ok(Provider::Ollama),
            other => Err(AnalystError::Other(format!("Unsupported provider: {}", other))),
        }
    }
}

/// A hosted agent session that answers one instruction with a stream of
/// events. The stream ends when the agent stops.
#[async_trait]
pub trait AnalysisAgent: Send + Sync {
    async fn run<'a>(&'a self, prompt: String) -> Result<EventStream<'a>>;
}

pub struct AgentConfig {
    pub provider: Provider,
    pub model: String,
    pub output: Arc<dyn Output>,
    pub yolo: bool,
    pub max_turns: usize,
    pub system_prompt: String,
    pub bash_auto_allow: Vec<String>,
    pub bash_output_limit: usize,
    pub workspace: Workspace,
}

pub fn create_agent(config: AgentConfig) -> Result<Box<dyn AnalysisAgent>> {
    let auto_allow = config
        .bash_auto_allow
        .iter()
        .map(|p| regex::Regex::new(p))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let workspace = Arc::new(config.workspace);
    let model = config.model;

    tracing::info!(
        target: "csv_analyst",
        provider = %config.provider,
        model = %model,
        max_turns = config.max_turns,
        "creating agent"
    );

    macro_rules! build {
        ($client:expr) => {{
            let builder = $client.agent(&model);
            let rig_agent = build_rig_agent(
                builder,
                &config.system_prompt,
                config.yolo,
                config.output.clone(),
                auto_allow,
                workspace,
                config.bash_output_limit,
            );
            Box::new(RigAnalyst::new(rig_agent, config.max_turns))
        }};
    }

    let agent: Box<dyn AnalysisAgent> = match config.provider {
        Provider::Anthropic => build!(anthropic::Client::from_env()),
        Provider::OpenAI => build!(openai::Client::from_env()),
        Provider::Gemini => build!(gemini::Client::from_env()),
        Provider::Groq => build!(groq::Client::from_env()),
        Provider::Mistral => build!(mistral::Client::from_env()),
        Provider::DeepSeek => build!(deepseek::Client::from_env()),
        Provider::OpenRouter => build!(openrouter::Client::from_env()),
        Provider::Xai => build!(xai::Client::from_env()),
        Provider::Ollama => build!(ollama::Client::from_env()),
    };

    Ok(agent)
}

fn build_rig_agent<M: CompletionModel>(
    builder: AgentBuilder<M>,
    system_prompt: &str,
    yolo: bool,
    output: Arc<dyn Output>,
    bash_auto_allow: Vec<regex::Regex>,
    workspace: Arc<Workspace>,
    bash_output_limit: usize,
) -> Agent<M> {
    let auto_approve: Arc<dyn Fn(&BashArgs) -> bool + Send + Sync> =
        Arc::new(move |args: &BashArgs| bash_auto_allow.iter().any(|re| re.is_match(&args.cmd)));

    builder
        .preamble(system_prompt)
        .max_tokens(MAX_TOKENS)
        .tool(ReadFile::new(workspace.clone()))
        .tool(WriteFile::new(workspace.clone()))
        .tool(GlobFiles::new(workspace.clone()))
        .tool(GrepText::new(workspace.clone()))
        .tool(guard(
            Bash::new(workspace, bash_output_limit),
            yolo,
            output,
            |args: &BashArgs| args.cmd.clone(),
            Some(auto_approve),
        ))
        .build()
}

/// Non-blank text blocks of one assistant turn, in order.
fn assistant_texts<'a>(choice: impl IntoIterator<Item = &'a AssistantContent>) -> Vec<String> {
    choice
        .into_iter()
        .filter_map(|content| match content {
            AssistantContent::Text(text) if !text.text.trim().is_empty() => {
                Some(text.text.clone())
            }
            _ => None,
        })
        .collect()
}

/// Forwards assistant text and tool activity onto the session's event
/// channel as each turn completes.
#[derive(Clone)]
struct EventHook {
    events: mpsc::UnboundedSender<Result<AgentEvent>>,
    saw_text: Arc<AtomicBool>,
}

impl<M: CompletionModel> PromptHook<M> for EventHook {
    async fn on_completion_response(
        &self,
        _prompt: &Message,
        response: &CompletionResponse<M::Response>,
        _cancel_sig: CancelSignal,
    ) {
        for text in assistant_texts(response.choice.iter()) {
            self.saw_text.store(true, Ordering::Relaxed);
            let _ = self.events.unbounded_send(Ok(AgentEvent::Text(text)));
        }
    }

    async fn on_tool_call(
        &self,
        tool_name: &str,
        _tool_call_id: Option<String>,
        args: &str,
        _cancel_sig: CancelSignal,
    ) {
        let args =
            serde_json::from_str(args).unwrap_or(serde_json::Value::String(args.to_string()));
        let _ = self.events.unbounded_send(Ok(AgentEvent::ToolCall {
            name: tool_name.to_string(),
            args,
        }));
    }

    async fn on_tool_result(
        &self,
        tool_name: &str,
        _tool_call_id: Option<String>,
        _args: &str,
        result: &str,
        _cancel_sig: CancelSignal,
    ) {
        let _ = self.events.unbounded_send(Ok(AgentEvent::ToolResult {
            name: tool_name.to_string(),
            output: result.to_string(),
        }));
    }
}

/// Asks before running a tool unless yolo, a session-wide "always", or the
/// auto-approve predicate says otherwise.
struct Guard<T: Tool> {
    tool: T,
    yolo: bool,
    output: Arc<dyn Output>,
    always: Arc<AtomicBool>,
    describe: fn(&T::Args) -> String,
    auto_approve: Option<Arc<dyn Fn(&T::Args) -> bool + Send + Sync>>,
}

impl<T: Tool<Error = ToolError>> Tool for Guard<T> {
    type Args = T::Args;
    type Output = T::Output;
    type Error = T::Error;

    const NAME: &'static str = T::NAME;

    async fn definition(&self, prompt: String) -> ToolDefinition {
        self.tool.definition(prompt).await
    }

    async fn call(&self, args: Self::Args) -> std::result::Result<Self::Output, Self::Error> {
        let should_auto_approve = self
            .auto_approve
            .as_ref()
            .map(|f| f(&args))
            .unwrap_or(false);

        if !self.yolo && !self.always.load(Ordering::Relaxed) && !should_auto_approve {
            let message = format!(
                "Run {}: {}?",
                Self::NAME.to_uppercase(),
                (self.describe)(&args)
            );
            match self.output.confirm(&message) {
                Confirmation::Always => {
                    self.always.store(true, Ordering::Relaxed);
                }
                Confirmation::Yes => {}
                Confirmation::No => {
                    tracing::info!(target: "csv_analyst", tool = T::NAME, "tool call declined");
                    return Err(ToolError::Generic("Action cancelled by user".into()));
                }
            }
        }
        self.tool.call(args).await
    }
}

fn guard<T: Tool>(
    tool: T,
    yolo: bool,
    output: Arc<dyn Output>,
    describe: fn(&T::Args) -> String,
    auto_approve: Option<Arc<dyn Fn(&T::Args) -> bool + Send + Sync>>,
) -> Guard<T> {
    Guard {
        tool,
        yolo,
        output,
        always: Arc::new(AtomicBool::new(false)),
        describe,
        auto_approve,
    }
}

/// Turns the outcome of a multi-turn request into its closing event.
///
/// The final answer is the text of the last turn, which the hook has already
/// sent when it saw any text at all. Running out of turns ends the session
/// normally so whatever the agent wrote so far still counts.
fn closing_event(
    response: std::result::Result<String, PromptError>,
    saw_text: bool,
) -> Option<Result<AgentEvent>> {
    match response {
        Ok(text) if saw_text || text.trim().is_empty() => None,
        Ok(text) => Some(Ok(AgentEvent::Text(text))),
        Err(PromptError::MaxDepthError { .. }) => {
            tracing::warn!(target: "csv_analyst", "agent reached its turn limit");
            None
        }
        Err(e) => Some(Err(AnalystError::Llm(e.to_string()))),
    }
}

/// Polls `request` while draining `events`. The stream ends once the request
/// has finished and every sender is gone.
fn drive_request<'a, F>(
    request: F,
    events: mpsc::UnboundedReceiver<Result<AgentEvent>>,
) -> EventStream<'a>
where
    F: Future<Output = ()> + Send + 'a,
{
    let driver = request
        .into_stream()
        .filter_map(|()| futures::future::ready(None::<Result<AgentEvent>>));
    futures::stream::select(driver, events).boxed()
}

/// `AnalysisAgent` over a rig agent. Assistant text and tool activity arrive
/// through the prompt hook while the request runs.
pub struct RigAnalyst<M: CompletionModel> {
    agent: Agent<M>,
    max_turns: usize,
}

impl<M: CompletionModel + 'static> RigAnalyst<M> {
    pub fn new(agent: Agent<M>, max_turns: usize) -> Self {
        Self { agent, max_turns }
    }
}

#[async_trait]
impl<M: CompletionModel + 'static> AnalysisAgent for RigAnalyst<M> {
    async fn run<'a>(&'a self, prompt: String) -> Result<EventStream<'a>> {
        let (tx, rx) = mpsc::unbounded::<Result<AgentEvent>>();
        let saw_text = Arc::new(AtomicBool::new(false));
        let hook = EventHook {
            events: tx.clone(),
            saw_text: saw_text.clone(),
        };

        let request = async move {
            let response = self
                .agent
                .prompt(prompt.as_str())
                .with_hook(hook)
                .multi_turn(self.max_turns)
                .await
                .map(|text| text.to_string());
            if let Some(event) = closing_event(response, saw_text.load(Ordering::Relaxed)) {
                let _ = tx.unbounded_send(event);
            }
        };

        Ok(drive_request(request, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::NoOutput;
    use serde_json::Value;
    use std::path::Path;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_driver_yields_events_in_order_then_ends() {
        let (tx, rx) = mpsc::unbounded::<Result<AgentEvent>>();
        let hook_tx = tx.clone();
        let request = async move {
            let _ = hook_tx.unbounded_send(Ok(AgentEvent::Text("Looking at columns.".into())));
            let _ = hook_tx.unbounded_send(Ok(AgentEvent::ToolCall {
                name: "bash".into(),
                args: serde_json::json!({"cmd": "python3 -c 'print(1)'"}),
            }));
            tokio::task::yield_now().await;
            let _ = hook_tx.unbounded_send(Ok(AgentEvent::ToolResult {
                name: "bash".into(),
                output: "1".into(),
            }));
            drop(hook_tx);
            let _ = tx.unbounded_send(Ok(AgentEvent::Text("Done.".into())));
        };

        let events: Vec<AgentEvent> = drive_request(request, rx)
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], AgentEvent::Text("Looking at columns.".into()));
        assert!(matches!(events[1], AgentEvent::ToolCall { .. }));
        assert!(matches!(events[2], AgentEvent::ToolResult { .. }));
        assert_eq!(events[3], AgentEvent::Text("Done.".into()));
    }

    #[tokio::test]
    async fn test_driver_ends_with_silent_request() {
        let (tx, rx) = mpsc::unbounded::<Result<AgentEvent>>();
        let request = async move {
            drop(tx);
        };
        let events: Vec<_> = drive_request(request, rx).collect().await;
        assert!(events.is_empty());
    }

    #[test]
    fn test_assistant_texts_keeps_every_text_block() {
        let turn = vec![
            AssistantContent::text("Loaded 15 rows."),
            AssistantContent::text("   "),
            AssistantContent::text("Gadget has the highest revenue."),
        ];
        assert_eq!(
            assistant_texts(&turn),
            vec![
                "Loaded 15 rows.".to_string(),
                "Gadget has the highest revenue.".to_string()
            ]
        );
        assert!(assistant_texts(&Vec::<AssistantContent>::new()).is_empty());
    }

    #[test]
    fn test_closing_event() {
        assert_eq!(
            closing_event(Ok("Gadget leads.".into()), false).map(|e| e.unwrap()),
            Some(AgentEvent::Text("Gadget leads.".into()))
        );
        // already streamed by the hook
        assert!(closing_event(Ok("Gadget leads.".into()), true).is_none());
        assert!(closing_event(Ok("  ".into()), false).is_none());

        let err = PromptError::CompletionError(
            rig::completion::CompletionError::ProviderError("overloaded".into()),
        );
        match closing_event(Err(err), false) {
            Some(Err(AnalystError::Llm(msg))) => assert!(msg.contains("overloaded")),
            other => panic!("unexpected: {:?}", other.map(|e| e.map_err(|e| e.to_string()))),
        }
    }

    #[test]
    fn test_provider_round_trip_names() {
        for p in Provider::ALL {
            assert_eq!(p.to_string().parse::<Provider>().unwrap(), p);
        }
        assert_eq!("Google".parse::<Provider>().unwrap(), Provider::Gemini);
        assert!("watson".parse::<Provider>().is_err());
    }

    #[test]
    fn test_provider_defaults() {
        assert_eq!(Provider::default(), Provider::Anthropic);
        assert_eq!(Provider::Anthropic.default_model(), "claude-sonnet-4-6");
        assert_eq!(Provider::Ollama.api_key_var(), None);
        assert_eq!(Provider::Xai.api_key_var(), Some("XAI_API_KEY"));
    }

    struct Scripted {
        answers: Mutex<Vec<Confirmation>>,
        asked: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(answers: Vec<Confirmation>) -> Self {
            Self {
                answers: Mutex::new(answers),
                asked: Mutex::new(Vec::new()),
            }
        }
    }

    impl Output for Scripted {
        fn display_text(&self, _text: &str) {}
        fn display_tool_call(&self, _name: &str, _args: &Value) {}
        fn display_tool_result(&self, _result: &str) {}
        fn display_error(&self, _error: &str) {}
        fn display_system(&self, _text: &str) {}
        fn display_report(&self, _path: Option<&Path>, _report: &str) {}
        fn confirm(&self, message: &str) -> Confirmation {
            self.asked.lock().unwrap().push(message.to_string());
            self.answers.lock().unwrap().remove(0)
        }
        fn display_separator(&self) {}
        fn display_thinking(&self, _message: &str) {}
        fn stop_thinking(&self) {}
        fn display_header(&self, _p: &str, _m: &str, _y: bool, _t: usize, _c: &str) {}
    }

    fn bash_in_tmp() -> (tempfile::TempDir, Bash) {
        let dir = tempfile::tempdir().unwrap();
        let bash = Bash::new(Arc::new(Workspace::new(dir.path())), 0);
        (dir, bash)
    }

    fn cmd(c: &str) -> BashArgs {
        BashArgs { cmd: c.to_string() }
    }

    #[tokio::test]
    async fn test_guard_declined() {
        let (_dir, bash) = bash_in_tmp();
        let output = Arc::new(Scripted::new(vec![Confirmation::No]));
        let g = guard(bash, false, output.clone(), |a: &BashArgs| a.cmd.clone(), None);

        let err = g.call(cmd("echo hi")).await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        assert_eq!(output.asked.lock().unwrap()[0], "Run BASH: echo hi?");
    }

    #[tokio::test]
    async fn test_guard_always_is_remembered() {
        let (_dir, bash) = bash_in_tmp();
        let output = Arc::new(Scripted::new(vec![Confirmation::Always]));
        let g = guard(bash, false, output.clone(), |a: &BashArgs| a.cmd.clone(), None);

        assert_eq!(g.call(cmd("echo one")).await.unwrap(), "one");
        assert_eq!(g.call(cmd("echo two")).await.unwrap(), "two");
        assert_eq!(output.asked.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_guard_auto_approve_and_yolo() {
        let (_dir, bash) = bash_in_tmp();
        let output = Arc::new(Scripted::new(vec![]));
        let auto: Arc<dyn Fn(&BashArgs) -> bool + Send + Sync> =
            Arc::new(|a: &BashArgs| a.cmd.starts_with("echo"));
        let g = guard(bash, false, output.clone(), |a: &BashArgs| a.cmd.clone(), Some(auto));
        assert_eq!(g.call(cmd("echo auto")).await.unwrap(), "auto");
        assert!(output.asked.lock().unwrap().is_empty());

        let (_dir, bash) = bash_in_tmp();
        let g = guard(bash, true, Arc::new(NoOutput), |a: &BashArgs| a.cmd.clone(), None);
        assert_eq!(g.call(cmd("printf yolo")).await.unwrap(), "yolo");
    }
}
