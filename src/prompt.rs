use std::path::Path;

/// Guides the agent through exploration, analysis and synthesis.
pub const DATA_ANALYSIS_SYSTEM_PROMPT: &str = r#"You are an expert data analyst specializing in CSV data analysis.

When analyzing data, follow this iterative process:

## PHASE 1: DATA EXPLORATION
1. Read the CSV file to understand its structure
2. Check the shape (rows, columns)
3. Examine column names and data types
4. Identify any missing or null values
5. Look at sample rows to understand the data

## PHASE 2: ANALYSIS
Based on the user's specific question:
1. Write Python code using pandas to analyze the data
2. Execute the code with the `bash` tool and observe the results
3. If the results are incomplete or raise new questions, run additional analysis
4. Continue iterating until you have comprehensive insights

## PHASE 3: SYNTHESIS
1. Compile your findings into clear, actionable insights
2. Answer the user's question directly with supporting data
3. Include relevant statistics and patterns discovered
4. Write your final analysis to the output file with the `write_file` tool

## GUIDELINES
- Always use Python with pandas for data manipulation
- Show your work by printing intermediate results
- If you encounter errors, debug and retry
- Be thorough but focused on the user's question
- Support all conclusions with actual data from the CSV
- Save your final analysis report as plain text
"#;

/// File in the working directory whose contents extend the system prompt.
pub const PROMPT_EXTENSION_FILE: &str = "ANALYST.md";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptStyle {
    /// Step-by-step instructions with a worked pandas example.
    #[default]
    Detailed,
    Concise,
}

pub fn build_analysis_prompt(
    csv_path: &Path,
    question: &str,
    output_path: &Path,
    python: &str,
    style: PromptStyle,
) -> String {
    let csv = csv_path.display();
    let output = output_path.display();
    let question = question.trim();

    match style {
        PromptStyle::Detailed => format!(
            r#"Analyze the CSV file located at: {csv}

User's Question/Request:
{question}

Instructions:
1. Start by reading and exploring the CSV file structure using Python with pandas
2. Use the bash tool to run Python code for analysis
3. Iterate as needed to fully answer the question
4. Save your final analysis and conclusions to: {output}

Important: Use Python code execution via bash to perform all data analysis.
Example: {python} -c "import pandas as pd; df = pd.read_csv('{csv}'); print(df.head())"

Begin your analysis now.
"#
        ),
        PromptStyle::Concise => format!(
            r#"Analyze the CSV file located at: {csv}

User's Question/Request:
{question}

Save your final analysis to: {output}

Use Python with pandas for all data analysis operations.
"#
        ),
    }
}

/// An override replaces the default prompt; an extension is appended.
pub fn compose_system_prompt(base: Option<String>, extension: Option<String>) -> String {
    let mut system = base.unwrap_or_else(|| DATA_ANALYSIS_SYSTEM_PROMPT.to_string());
    if let Some(ext) = extension.filter(|e| !e.trim().is_empty()) {
        system.push_str("\n\n");
        system.push_str(ext.trim_end());
    }
    system
}

pub fn load_prompt_extension() -> Option<String> {
    let path = Path::new(PROMPT_EXTENSION_FILE);
    if path.exists() {
        return std::fs::read_to_string(path).ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detailed_prompt_names_paths_and_interpreter() {
        let p = build_analysis_prompt(
            Path::new("/data/sales.csv"),
            "  Top 3 products?\n",
            Path::new("/out/report.txt"),
            "python3",
            PromptStyle::Detailed,
        );
        assert!(p.starts_with("Analyze the CSV file located at: /data/sales.csv\n"));
        assert!(p.contains("User's Question/Request:\nTop 3 products?\n"));
        assert!(p.contains("4. Save your final analysis and conclusions to: /out/report.txt"));
        assert!(p.contains(
            "Example: python3 -c \"import pandas as pd; df = pd.read_csv('/data/sales.csv'); print(df.head())\""
        ));
        assert!(p.trim_end().ends_with("Begin your analysis now."));
    }

    #[test]
    fn test_concise_prompt_is_short() {
        let p = build_analysis_prompt(
            Path::new("/data/sales.csv"),
            "Trends?",
            Path::new("/out/report.txt"),
            "python",
            PromptStyle::Concise,
        );
        assert!(p.contains("Save your final analysis to: /out/report.txt"));
        assert!(p.contains("Use Python with pandas"));
        assert!(!p.contains("Example:"));
    }

    #[test]
    fn test_compose_system_prompt() {
        assert_eq!(compose_system_prompt(None, None), DATA_ANALYSIS_SYSTEM_PROMPT);

        let custom = compose_system_prompt(Some("Be brief.".into()), Some("Use EUR.\n".into()));
        assert_eq!(custom, "Be brief.\n\nUse EUR.");

        let blank_ext = compose_system_prompt(Some("Be brief.".into()), Some("  ".into()));
        assert_eq!(blank_ext, "Be brief.");
    }
}
