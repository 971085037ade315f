use std::path::Path;

use crate::agent::Provider;
use crate::{AnalystError, Result};

/// The provider's API key variable must be set and non-empty.
pub fn validate_environment(provider: Provider) -> Result<()> {
    check_api_key(provider, |var| std::env::var(var).ok())
}

fn check_api_key(provider: Provider, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
    let Some(var) = provider.api_key_var() else {
        return Ok(());
    };
    match lookup(var) {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(AnalystError::MissingApiKey(
            provider.to_string(),
            var.to_string(),
        )),
    }
}

pub fn validate_csv_path(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(AnalystError::CsvNotFound(path.to_path_buf()))
    }
}

/// Whether `python -c "import pandas"` succeeds.
pub fn python_has_pandas(python: &str) -> bool {
    duct::cmd!(python, "-c", "import pandas")
        .stdout_null()
        .stderr_null()
        .unchecked()
        .run()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
