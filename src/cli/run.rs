use std::io::{self, IsTerminal};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use turnloop_config::LoopConfig;
use turnloop_core::{
    ContextChunk, LLMFactory, Orchestrator, SessionOutcome, SessionRequest, SessionResult,
    SessionSettings,
};

use super::RunArgs;
use crate::gateway::CommandToolGateway;

pub async fn handle_run_command(config: &LoopConfig, args: &RunArgs) -> Result<()> {
    let query = resolve_query(args.query.as_deref()).await?;
    let context_chunks = args
        .context
        .iter()
        .map(|path| read_context_chunk(path))
        .collect::<Result<Vec<_>>>()?;

    let mut settings = SessionSettings::from_config(config);
    if let Some(max_iterations) = args.max_iterations {
        settings.max_iterations = max_iterations.max(1);
    }

    let gateway = Arc::new(CommandToolGateway::new(&config.tools));
    if gateway.is_empty() {
        tracing::info!("no tools configured; the model can only answer directly");
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling session");
            on_interrupt.cancel();
        }
    });

    let orchestrator = Orchestrator::new(Arc::new(LLMFactory::new()), Arc::new(settings));
    let request = SessionRequest::new(args.backend.clone(), query).with_context(context_chunks);
    let result = orchestrator.orchestrate(request, gateway, cancel).await?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to encode session result")?
        );
    } else {
        print_result(&result);
    }

    match result.outcome {
        SessionOutcome::BackendFailure { category } => {
            bail!("session ended early: {}", category.user_label())
        }
        SessionOutcome::Cancelled => bail!("session cancelled"),
        SessionOutcome::Completed | SessionOutcome::ForcedFinalization => Ok(()),
    }
}

fn print_result(result: &SessionResult) {
    println!("## Analysis\n{}\n", result.analysis.trim());
    if !result.instruction.trim().is_empty() {
        println!("## Instruction\n{}\n", result.instruction.trim());
    }

    let denied = result.tool_calls.iter().filter(|call| call.denied).count();
    let failed = result
        .tool_calls
        .iter()
        .filter(|call| !call.success && !call.denied)
        .count();
    eprintln!(
        "{:?} after {} iteration(s); {} tool call(s), {} failed, {} denied; {} tokens",
        result.outcome,
        result.iterations,
        result.tool_calls.len(),
        failed,
        denied,
        result.usage.total_tokens
    );
}

fn read_context_chunk(path: &Path) -> Result<ContextChunk> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read context file: {}", path.display()))?;
    Ok(ContextChunk::new(path.display().to_string(), content))
}

const NO_QUERY: &str = "No query provided. Pass --query or pipe the question via stdin.";

async fn resolve_query(inline: Option<&str>) -> Result<String> {
    if let Some(query) = inline.map(str::trim).filter(|query| !query.is_empty()) {
        return Ok(query.to_owned());
    }
    if io::stdin().is_terminal() {
        bail!(NO_QUERY);
    }
    read_query(tokio::io::stdin()).await
}

async fn read_query<R: AsyncRead + Unpin>(mut reader: R) -> Result<String> {
    let mut buffer = String::new();
    reader
        .read_to_string(&mut buffer)
        .await
        .context("Failed to read query from stdin")?;
    let query = buffer.trim();
    if query.is_empty() {
        bail!(NO_QUERY);
    }
    Ok(query.to_owned())
}
