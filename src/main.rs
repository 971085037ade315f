use clap::Parser;
use csv_analyst::config::{Config, DEFAULT_MAX_TURNS, DEFAULT_OUTPUT_PATH, DEFAULT_PYTHON};
use csv_analyst::environment::{python_has_pandas, validate_csv_path, validate_environment};
use csv_analyst::prompt::{compose_system_prompt, load_prompt_extension, PromptStyle};
use csv_analyst::tools::DEFAULT_BASH_OUTPUT_LIMIT;
use csv_analyst::{
    analyze_csv, create_agent, AgentConfig, AnalysisRequest, ConsoleOutput, LogOutput, Output,
    Provider, QuietOutput, ReportSource, Workspace,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_CSV_PATH: &str = "data/sample_sales.csv";

const DEFAULT_QUESTION: &str = "Analyze this sales data and provide:
1. Summary statistics for all numeric columns
2. Top 3 products by total revenue
3. Daily revenue trends
4. Any interesting patterns or insights you discover";

#[derive(Parser, Debug)]
#[command(author, version, about = "Analyze a CSV file with an LLM agent running pandas")]
struct Args {
    /// CSV file to analyze
    #[arg(index = 1)]
    csv: Option<PathBuf>,

    /// What you want to know about the data
    #[arg(index = 2)]
    prompt: Option<String>,

    /// Where the agent should save its report
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// LLM provider (anthropic, openai, gemini, groq, mistral, deepseek, openrouter, xai, ollama)
    #[arg(short, long)]
    provider: Option<String>,

    /// LLM model name
    #[arg(short, long)]
    model: Option<String>,

    /// Maximum number of agent turns
    #[arg(long)]
    max_turns: Option<usize>,

    /// Run shell commands without confirmation
    #[arg(long)]
    yolo: bool,

    /// Only print the final report
    #[arg(short, long)]
    quiet: bool,

    /// Send all output through the log instead of the terminal UI
    #[arg(long, conflicts_with = "quiet")]
    log: bool,

    /// Use the short instruction format
    #[arg(long)]
    concise: bool,

    /// Run a saved analysis from the config file
    #[arg(short, long)]
    recipe: Option<String>,

    /// Path to config file (default: csv-analyst.yaml or csv-analyst.yml in current directory)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    std::panic::set_hook(Box::new(|info| {
        let message = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\n--------------------------------------------------------------------------------");
        eprintln!("💥 csv-analyst encountered an unexpected error (panic).");
        eprintln!("Message: {}", message);
        if let Some(location) = info.location() {
            eprintln!("Location: {}:{}:{}", location.file(), location.line(), location.column());
        }
        eprintln!("--------------------------------------------------------------------------------\n");
    }));

    let args = Args::parse();
    let default_filter = if args.log {
        "csv_analyst=info"
    } else {
        "csv_analyst=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(args.config.as_deref())?;

    let recipe = match &args.recipe {
        Some(name) => Some(
            config
                .recipes
                .get(name)
                .cloned()
                .ok_or_else(|| format!("Recipe not found: {}", name))?,
        ),
        None => None,
    };

    let provider: Provider = match args.provider.as_deref().or(config.provider.as_deref()) {
        Some(p) => p.parse()?,
        None => Provider::default(),
    };
    let model = args
        .model
        .or_else(|| config.model.clone())
        .unwrap_or_else(|| provider.default_model().to_string());
    let max_turns = args.max_turns.or(config.max_turns).unwrap_or(DEFAULT_MAX_TURNS);
    let python = config.python.clone().unwrap_or_else(|| DEFAULT_PYTHON.to_string());

    let csv_path = args
        .csv
        .or_else(|| recipe.as_ref().and_then(|r| r.csv.clone().map(PathBuf::from)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CSV_PATH));
    let output_path = args
        .output
        .or_else(|| recipe.as_ref().and_then(|r| r.output.clone().map(PathBuf::from)))
        .or_else(|| config.output.clone().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_PATH));
    let question = match (args.prompt, &recipe) {
        (Some(p), _) => p,
        (None, Some(r)) => r.question()?,
        (None, None) => DEFAULT_QUESTION.to_string(),
    };

    let output: Arc<dyn Output> = if args.log {
        Arc::new(LogOutput)
    } else if args.quiet {
        Arc::new(QuietOutput::new())
    } else {
        Arc::new(ConsoleOutput::new())
    };

    validate_environment(provider)?;
    validate_csv_path(&csv_path)?;
    if !python_has_pandas(&python) {
        tracing::warn!(target: "csv_analyst", python = %python, "pandas is not importable");
        output.display_system(&format!(
            "Warning: `{} -c \"import pandas\"` failed; the agent may not be able to run its analysis.",
            python
        ));
    }

    let report_dir = std::path::absolute(&output_path)?
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_default();
    let csv_dir = std::fs::canonicalize(&csv_path)?
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_default();
    let workspace = Workspace::current()?
        .allow(&csv_dir)
        .allow(&report_dir);

    let system_prompt = compose_system_prompt(config.system_prompt()?, load_prompt_extension());

    output.display_header(
        &provider.to_string(),
        &model,
        args.yolo,
        max_turns,
        &csv_path.display().to_string(),
    );
    output.display_system(&format!("Output: {}", output_path.display()));
    output.display_system(&format!("User Prompt:\n{}", question.trim()));
    output.display_system("Starting analysis... (this may take a few minutes)");

    let agent = create_agent(AgentConfig {
        provider,
        model,
        output: output.clone(),
        yolo: args.yolo,
        max_turns,
        system_prompt,
        bash_auto_allow: config.get_bash_auto_allow(),
        bash_output_limit: config.bash_output_limit.unwrap_or(DEFAULT_BASH_OUTPUT_LIMIT),
        workspace,
    })?;

    let request = AnalysisRequest::new(csv_path, question)
        .output_path(output_path)
        .verbose(!args.quiet)
        .style(if args.concise {
            PromptStyle::Concise
        } else {
            PromptStyle::Detailed
        })
        .python(python);

    let outcome = analyze_csv(agent.as_ref(), &request, output.as_ref()).await?;

    let saved = match &outcome.source {
        ReportSource::File(path) => Some(path.as_path()),
        ReportSource::Transcript | ReportSource::Missing => None,
    };
    output.display_report(saved, &outcome.report);
    Ok(())
}
