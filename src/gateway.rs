//! Tool gateway backed by external commands declared in `turnloop.toml`.

use std::collections::BTreeMap;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;
use turnloop_config::ToolDefinitionConfig;
use turnloop_core::{ToolDefinition, ToolGateway, ToolOutput};

/// Runs each tool as a child process: JSON arguments on stdin, output on stdout.
///
/// A zero exit status is a success. Anything else, including a timeout, is
/// reported to the model as a failed tool result.
pub struct CommandToolGateway {
    tools: BTreeMap<String, ToolDefinitionConfig>,
    order: Vec<String>,
}

impl CommandToolGateway {
    pub fn new(tools: &[ToolDefinitionConfig]) -> Self {
        Self {
            tools: tools
                .iter()
                .map(|tool| (tool.name.clone(), tool.clone()))
                .collect(),
            order: tools.iter().map(|tool| tool.name.clone()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolGateway for CommandToolGateway {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                ToolDefinition::function(
                    tool.name.clone(),
                    tool.description.clone(),
                    tool.parameters.clone(),
                )
            })
            .collect()
    }

    async fn execute(&self, tool_name: &str, arguments: Value) -> Result<ToolOutput> {
        let Some(tool) = self.tools.get(tool_name) else {
            return Ok(ToolOutput::failure(format!("unknown tool '{tool_name}'")));
        };

        let mut child = Command::new(&tool.command)
            .args(&tool.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start '{}' for tool {tool_name}", tool.command))?;

        let payload = serde_json::to_vec(&arguments).context("failed to encode tool arguments")?;
        let stdin = child.stdin.take();
        let write_input = async move {
            let Some(mut stdin) = stdin else {
                return;
            };
            // the command may exit without reading its input
            if let Err(err) = stdin.write_all(&payload).await {
                debug!(tool = tool_name, error = %err, "tool did not accept its arguments");
            }
        };
        // stdin is written while stdout is drained, both under the tool's deadline
        let run = async {
            let ((), output) = tokio::join!(write_input, child.wait_with_output());
            output
        };

        let output = match tokio::time::timeout(tool.timeout(), run).await {
            Ok(output) => output.with_context(|| format!("tool {tool_name} did not complete"))?,
            Err(_) => {
                return Ok(ToolOutput::failure(format!(
                    "{tool_name} timed out after {}s",
                    tool.timeout_seconds
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_owned();
        if output.status.success() {
            return Ok(ToolOutput::success(stdout));
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        let detail = if stderr.is_empty() { stdout } else { stderr };
        let status = output
            .status
            .code()
            .map_or_else(|| "a signal".to_owned(), |code| format!("status {code}"));
        Ok(ToolOutput::failure(format!(
            "{tool_name} exited with {status}: {detail}"
        )))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    fn shell_tool(name: &str, script: &str, timeout_seconds: u64) -> ToolDefinitionConfig {
        ToolDefinitionConfig {
            name: name.to_owned(),
            description: format!("{name} via sh"),
            parameters: json!({"type": "object"}),
            command: "sh".to_owned(),
            args: vec!["-c".to_owned(), script.to_owned()],
            timeout_seconds,
        }
    }

    #[tokio::test]
    async fn arguments_arrive_on_stdin() {
        let gateway = CommandToolGateway::new(&[shell_tool("echo_args", "cat", 5)]);
        let output = gateway
            .execute("echo_args", json!({"query": "rust"}))
            .await
            .expect("tool runs");
        assert!(output.effective_success());
        assert_eq!(output.output, r#"{"query":"rust"}"#);
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failed_result() {
        let gateway =
            CommandToolGateway::new(&[shell_tool("broken", "echo 'no such index' >&2; exit 3", 5)]);
        let output = gateway.execute("broken", json!({})).await.expect("tool runs");
        assert!(!output.effective_success());
        assert_eq!(output.output, "Error: broken exited with status 3: no such index");
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let gateway = CommandToolGateway::new(&[shell_tool("slow", "sleep 5", 1)]);
        let output = gateway.execute("slow", json!({})).await.expect("tool runs");
        assert_eq!(output.output, "Error: slow timed out after 1s");
    }

    #[tokio::test]
    async fn timeout_covers_unread_oversized_arguments() {
        let gateway = CommandToolGateway::new(&[shell_tool("stalled", "sleep 30", 1)]);
        let large = json!({ "q": "x".repeat(1024 * 1024) });
        let output = tokio::time::timeout(
            std::time::Duration::from_secs(8),
            gateway.execute("stalled", large),
        )
        .await
        .expect("execute returns once the tool deadline passes")
        .expect("tool runs");
        assert_eq!(output.output, "Error: stalled timed out after 1s");
    }

    #[tokio::test]
    async fn large_arguments_round_trip_through_the_pipe() {
        let gateway = CommandToolGateway::new(&[shell_tool("echo_args", "cat", 10)]);
        let large = json!({ "q": "y".repeat(256 * 1024) });
        let output = gateway
            .execute("echo_args", large.clone())
            .await
            .expect("tool runs");
        assert!(output.effective_success());
        assert_eq!(output.output, large.to_string());
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_not_raised() {
        let gateway = CommandToolGateway::new(&[]);
        assert!(gateway.is_empty());
        let output = gateway.execute("missing", json!({})).await.expect("no error");
        assert_eq!(output.output, "Error: unknown tool 'missing'");
    }

    #[test]
    fn definitions_keep_declaration_order() {
        let gateway = CommandToolGateway::new(&[
            shell_tool("web_search", "true", 5),
            shell_tool("read_file", "true", 5),
        ]);
        let names: Vec<_> = gateway
            .definitions()
            .iter()
            .map(|tool| tool.function_name().to_owned())
            .collect();
        assert_eq!(names, vec!["web_search", "read_file"]);
    }
}
