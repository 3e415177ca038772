use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::backends::BackendConfig;
use crate::logging::LoggingConfig;
use crate::retry::RetryConfig;
use crate::session::{BudgetConfig, SessionConfig};
use crate::timeouts::TimeoutsConfig;
use crate::tools::ToolDefinitionConfig;

pub const CONFIG_FILE_NAME: &str = "turnloop.toml";
pub const CONFIG_PATH_ENV: &str = "TURNLOOP_CONFIG_PATH";

/// Main configuration structure for turnloop
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct LoopConfig {
    /// Iteration ceiling and prompts for each session
    #[serde(default)]
    pub session: SessionConfig,

    /// Per-tool invocation ceilings
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Backoff for retryable backend failures
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Overrides for the built-in backend table
    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,

    /// Command-backed tools offered to the model
    #[serde(default)]
    pub tools: Vec<ToolDefinitionConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl LoopConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: LoopConfig =
            toml::from_str(content).context("Failed to parse configuration")?;
        config.validate().context("Configuration failed validation")?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to load config file: {}", path.display()))
    }

    /// Resolve configuration in priority order: an explicit path, then
    /// `TURNLOOP_CONFIG_PATH`, then `turnloop.toml` in `workspace`. Falls back to
    /// defaults when no file exists. Returns the path that was loaded, if any.
    pub fn load(explicit: Option<&Path>, workspace: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load_from_file(path)?, Some(path.to_path_buf())));
        }

        if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
            let trimmed = config_path.trim();
            if !trimmed.is_empty() {
                let config = Self::load_from_file(trimmed).with_context(|| {
                    format!("Failed to load configuration from {CONFIG_PATH_ENV}={trimmed}")
                })?;
                return Ok((config, Some(PathBuf::from(trimmed))));
            }
        }

        let workspace_file = workspace.join(CONFIG_FILE_NAME);
        if workspace_file.is_file() {
            return Ok((Self::load_from_file(&workspace_file)?, Some(workspace_file)));
        }

        tracing::debug!("no {CONFIG_FILE_NAME} found, using defaults");
        Ok((Self::default(), None))
    }

    pub fn validate(&self) -> Result<()> {
        self.session
            .validate()
            .context("Invalid session configuration")?;
        self.budget
            .validate()
            .context("Invalid budget configuration")?;
        self.retry.validate().context("Invalid retry configuration")?;
        self.timeouts
            .validate()
            .context("Invalid timeouts configuration")?;
        self.logging
            .validate()
            .context("Invalid logging configuration")?;

        for (id, backend) in &self.backends {
            backend
                .validate(id)
                .with_context(|| format!("Invalid backend configuration for '{id}'"))?;
        }

        let mut seen = HashSet::new();
        for tool in &self.tools {
            tool.validate().context("Invalid tool definition")?;
            ensure!(
                seen.insert(tool.name.as_str()),
                "tool '{}' is defined more than once",
                tool.name
            );
        }
        Ok(())
    }

    /// Overrides for `id`, or empty overrides when the backend is not configured.
    pub fn backend(&self, id: &str) -> BackendConfig {
        self.backends.get(id).cloned().unwrap_or_default()
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDefinitionConfig> {
        self.tools.iter().find(|tool| tool.name == name)
    }
}

/// Load environment variables from a `.env` file in the current directory.
///
/// A missing file is not an error; an unreadable one is logged and skipped.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => {
            tracing::debug!("Loaded environment variables from: {}", path.display());
        }
        Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!("Failed to load .env file: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_document_yields_defaults() {
        let config = LoopConfig::from_toml_str("").expect("empty config parses");
        assert_eq!(config, LoopConfig::default());
        assert_eq!(config.session.max_iterations, 8);
        assert!(config.session.parallel_tool_calls);
        assert_eq!(config.budget.limit_for("web_search"), Some(3));
        assert_eq!(config.budget.limit_for("read_file"), None);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.timeouts.request_seconds, 120);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parses_every_section() {
        let config = LoopConfig::from_toml_str(
            r#"
            [session]
            max_iterations = 4
            parallel_tool_calls = false

            [budget.tool_limits]
            web_search = 1
            fetch_url = 5

            [retry]
            max_attempts = 2
            base_delay_ms = 10
            max_delay_ms = 100

            [backends.deepseek]
            model = "deepseek-reasoner"
            reasoning_effort = "high"
            temperature = 0.3

            [[tools]]
            name = "web_search"
            description = "Search the web"
            command = "search-cli"
            args = ["--json"]
            parameters = { type = "object", properties = { query = { type = "string" } } }

            [logging]
            level = "debug"
            "#,
        )
        .expect("config parses");

        assert_eq!(config.session.max_iterations, 4);
        assert!(!config.session.parallel_tool_calls);
        assert_eq!(config.budget.limit_for("web_search"), Some(1));
        assert_eq!(config.budget.limit_for("fetch_url"), Some(5));
        assert_eq!(config.retry.max_delay_ms, 100);

        let deepseek = config.backend("deepseek");
        assert!(deepseek.reasoning_enabled());
        assert_eq!(deepseek.model.as_deref(), Some("deepseek-reasoner"));
        assert_eq!(config.backend("openai"), BackendConfig::default());

        let tool = config.tool("web_search").expect("tool configured");
        assert_eq!(tool.args, vec!["--json".to_owned()]);
        assert_eq!(tool.timeout_seconds, 30);
        assert_eq!(
            tool.parameters["properties"]["query"]["type"],
            serde_json::json!("string")
        );
        assert_eq!(
            config.logging.filter_directive(),
            "turnloop=debug,turnloop_core=debug"
        );
    }

    #[test]
    fn rejects_invalid_values() {
        let cases = [
            "[session]\nmax_iterations = 0",
            "[retry]\nmax_attempts = 0",
            "[retry]\nbase_delay_ms = 5000\nmax_delay_ms = 100",
            "[backends.gemini]\nreasoning_effort = \"extreme\"",
            "[backends.openai]\ntop_p = 1.5",
            "[logging]\nlevel = \"loud\"",
            "[[tools]]\nname = \"a\"\ncommand = \"x\"\n[[tools]]\nname = \"a\"\ncommand = \"y\"",
        ];
        for case in cases {
            assert!(
                LoopConfig::from_toml_str(case).is_err(),
                "expected rejection for:\n{case}"
            );
        }
    }

    #[test]
    fn load_prefers_explicit_path() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "[session]\nmax_iterations = 2").expect("write config");

        let workspace = tempfile::tempdir().expect("temp dir");
        let (config, path) =
            LoopConfig::load(Some(file.path()), workspace.path()).expect("config loads");
        assert_eq!(config.session.max_iterations, 2);
        assert_eq!(path.as_deref(), Some(file.path()));
    }

    #[test]
    fn load_reads_workspace_file() {
        let workspace = tempfile::tempdir().expect("temp dir");
        fs::write(
            workspace.path().join(CONFIG_FILE_NAME),
            "[timeouts]\nrequest_seconds = 30",
        )
        .expect("write config");

        let config = LoopConfig::load_from_file(workspace.path().join(CONFIG_FILE_NAME))
            .expect("config loads");
        assert_eq!(config.timeouts.request_seconds, 30);
        assert_eq!(config.timeouts.connect_seconds, 10);
    }

    #[test]
    fn load_from_missing_file_reports_path() {
        let err = LoopConfig::load_from_file("/nonexistent/turnloop.toml")
            .expect_err("missing file fails");
        assert!(format!("{err:#}").contains("/nonexistent/turnloop.toml"));
    }
}
