use std::path::Path;

use anyhow::Result;
use turnloop_config::LoopConfig;
use turnloop_core::LLMFactory;

pub fn handle_backends_command(config: &LoopConfig) -> Result<()> {
    let factory = LLMFactory::new();
    println!(
        "{:<12} {:<7} {:<32} {:<20} KEY",
        "BACKEND", "FAMILY", "MODEL", "KEY ENV"
    );
    for spec in factory.specs() {
        let overrides = config.backend(spec.id);
        let model = overrides.model.as_deref().unwrap_or(spec.default_model);
        let key_env = overrides.api_key_env.as_deref().unwrap_or(spec.api_key_env);
        let key_state = match std::env::var(key_env) {
            Ok(value) if !value.trim().is_empty() => "set",
            _ => "missing",
        };
        println!(
            "{:<12} {:<7} {:<32} {:<20} {}",
            spec.id,
            format!("{:?}", spec.family),
            model,
            key_env,
            key_state
        );
    }
    Ok(())
}

pub fn handle_check_config_command(config: &LoopConfig, source: Option<&Path>) -> Result<()> {
    match source {
        Some(path) => println!("Loaded {}", path.display()),
        None => println!("No configuration file found; using defaults"),
    }
    println!(
        "session: max_iterations={} parallel_tool_calls={}",
        config.session.max_iterations, config.session.parallel_tool_calls
    );
    for (tool, limit) in &config.budget.tool_limits {
        println!("budget: {tool} <= {limit} call(s) per session");
    }
    println!(
        "retry: max_attempts={} base_delay={}ms max_delay={}ms",
        config.retry.max_attempts, config.retry.base_delay_ms, config.retry.max_delay_ms
    );

    let factory = LLMFactory::new();
    for id in config.backends.keys() {
        if factory.spec(id).is_none() {
            println!("warning: [backends.{id}] does not match a built-in backend");
        }
    }
    for tool in &config.tools {
        println!("tool: {} -> {}", tool.name, tool.command);
    }
    Ok(())
}
