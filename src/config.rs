use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::{AnalystError, Result};

pub const DEFAULT_OUTPUT_PATH: &str = "output/analysis_report.txt";
pub const DEFAULT_MAX_TURNS: usize = 30;
pub const DEFAULT_PYTHON: &str = "python3";

/// Lets the agent run pandas without asking every time.
pub const DEFAULT_BASH_AUTO_ALLOW: &str = r"^\s*python3?\s";

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_turns: Option<usize>,
    #[serde(default)]
    pub python: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub system_prompt_file: Option<String>,
    #[serde(default)]
    pub bash_output_limit: Option<usize>,
    #[serde(default)]
    pub tool_config: HashMap<String, ToolSettings>,
    #[serde(default)]
    pub recipes: HashMap<String, Recipe>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct ToolSettings {
    #[serde(default)]
    pub auto_allow: Vec<String>,
}

/// A saved analysis: question plus optional CSV and report paths.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Recipe {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub prompt_file: Option<String>,
    #[serde(default)]
    pub csv: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
}

impl Recipe {
    pub fn question(&self) -> Result<String> {
        read_prompt(self.prompt.clone(), self.prompt_file.clone())?
            .ok_or_else(|| AnalystError::Config("Recipe must have either 'prompt' or 'prompt_file'".into()))
    }
}

impl Config {
    /// An explicit path must exist; otherwise the working directory and then
    /// the user config directory are searched, falling back to defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .map_err(|e| AnalystError::Config(format!("cannot read {}: {}", p, e)))?;
            return Ok(serde_yaml::from_str(&content)?);
        }

        for candidate in Self::search_paths() {
            if candidate.exists() {
                let content = std::fs::read_to_string(&candidate)?;
                tracing::debug!(target: "csv_analyst", "loading config from {}", candidate.display());
                return Ok(serde_yaml::from_str(&content)?);
            }
        }
        Ok(Config::default())
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("csv-analyst.yaml"),
            PathBuf::from("csv-analyst.yml"),
        ];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("csv-analyst").join("config.yaml"));
        }
        paths
    }

    pub fn get_bash_auto_allow(&self) -> Vec<String> {
        self.tool_config
            .get("bash")
            .map(|s| s.auto_allow.clone())
            .unwrap_or_else(|| vec![DEFAULT_BASH_AUTO_ALLOW.to_string()])
    }

    pub fn system_prompt(&self) -> Result<Option<String>> {
        read_prompt(self.system_prompt.clone(), self.system_prompt_file.clone())
    }
}

/// Inline text wins over a file reference.
pub fn read_prompt(inline: Option<String>, file: Option<String>) -> Result<Option<String>> {
    if let Some(text) = inline {
        return Ok(Some(text));
    }
    match file {
        Some(f) => {
            let content = std::fs::read_to_string(Path::new(&f))
                .map_err(|e| AnalystError::Config(format!("cannot read prompt file {}: {}", f, e)))?;
            Ok(Some(content))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
provider: openai
model: gpt-4o
max_turns: 12
tool_config:
  bash:
    auto_allow: ["^ls"]
recipes:
  revenue:
    prompt: Top 3 products by revenue
    csv: data/sales.csv
"#;

    #[test]
    fn test_parse_config() {
        let config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.provider.as_deref(), Some("openai"));
        assert_eq!(config.max_turns, Some(12));
        assert_eq!(config.get_bash_auto_allow(), vec!["^ls".to_string()]);

        let recipe = &config.recipes["revenue"];
        assert_eq!(recipe.question().unwrap(), "Top 3 products by revenue");
        assert_eq!(recipe.csv.as_deref(), Some("data/sales.csv"));
        assert!(recipe.output.is_none());
    }

    #[test]
    fn test_default_auto_allow_matches_python() {
        let config = Config::default();
        let patterns = config.get_bash_auto_allow();
        let re = regex::Regex::new(&patterns[0]).unwrap();
        assert!(re.is_match("python3 -c 'import pandas'"));
        assert!(re.is_match("python script.py"));
        assert!(!re.is_match("rm -rf /"));
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = Config::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.model.as_deref(), Some("gpt-4o"));

        let missing = dir.path().join("missing.yaml");
        assert!(Config::load(Some(missing.to_str().unwrap())).is_err());
    }

    #[test]
    fn test_read_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("q.txt");
        std::fs::write(&file, "from file").unwrap();
        let file = file.to_string_lossy().to_string();

        assert_eq!(
            read_prompt(Some("inline".into()), Some(file.clone())).unwrap().as_deref(),
            Some("inline")
        );
        assert_eq!(read_prompt(None, Some(file)).unwrap().as_deref(), Some("from file"));
        assert_eq!(read_prompt(None, None).unwrap(), None);

        let empty = Recipe::default();
        assert!(empty.question().is_err());
    }
}
