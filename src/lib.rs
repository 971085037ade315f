use std::path::PathBuf;
use thiserror::Error;

pub mod agent;
pub mod analysis;
pub mod config;
pub mod environment;
pub mod events;
pub mod output;
pub mod prompt;
pub mod tools;

pub use config::{Config, Recipe, ToolSettings};

// Re-export core rig types for library users
pub use rig::client::{CompletionClient, ProviderClient};
pub use rig::completion::CompletionModel;
pub use rig::providers;

pub use agent::{create_agent, AgentConfig, AnalysisAgent, Provider, RigAnalyst};
pub use analysis::{
    analyze_csv, analyze_csv_streaming, run_analysis, AnalysisOutcome, AnalysisRequest,
    ReportSource,
};
pub use events::{AgentEvent, EventStream, Transcript};
pub use output::{Confirmation, ConsoleOutput, LogOutput, NoOutput, Output, QuietOutput};
pub use prompt::{build_analysis_prompt, PromptStyle, DATA_ANALYSIS_SYSTEM_PROMPT};
pub use tools::Workspace;

#[derive(Error, Debug)]
pub enum AnalystError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Missing API key for provider {0}. Please set the {1} environment variable.")]
    MissingApiKey(String, String),

    #[error("CSV file not found at: {}", .0.display())]
    CsvNotFound(PathBuf),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, AnalystError>;
