//! Per-session ceilings on loop iterations and costly tools.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::llm::provider::ToolDefinition;

/// Tracks consumption against the session's ceilings.
///
/// Counters only grow. A fresh tracker is created for every session.
#[derive(Debug, Clone)]
pub struct BudgetTracker {
    max_iterations: u32,
    iterations_used: u32,
    tool_limits: HashMap<String, u32>,
    tool_usage: HashMap<String, u32>,
}

impl BudgetTracker {
    pub fn new(max_iterations: u32, tool_limits: &BTreeMap<String, u32>) -> Self {
        Self {
            max_iterations,
            iterations_used: 0,
            tool_limits: tool_limits
                .iter()
                .map(|(name, limit)| (name.clone(), *limit))
                .collect(),
            tool_usage: HashMap::new(),
        }
    }

    /// Whether one more invocation of `tool` fits in its ceiling.
    pub fn can_use(&self, tool: &str) -> bool {
        match self.tool_limits.get(tool) {
            Some(limit) => self.used(tool) < *limit,
            None => true,
        }
    }

    /// Record one invocation of `tool`. Unlimited tools are not counted.
    pub fn consume(&mut self, tool: &str) {
        if let Some(limit) = self.tool_limits.get(tool) {
            let used = self.tool_usage.entry(tool.to_owned()).or_insert(0);
            *used = used.saturating_add(1).min(*limit);
        }
    }

    /// Invocations left for `tool`, or `None` when it has no ceiling.
    pub fn remaining(&self, tool: &str) -> Option<u32> {
        self.tool_limits
            .get(tool)
            .map(|limit| limit.saturating_sub(self.used(tool)))
    }

    pub fn used(&self, tool: &str) -> u32 {
        self.tool_usage.get(tool).copied().unwrap_or(0)
    }

    pub fn begin_iteration(&mut self) {
        self.iterations_used = self.iterations_used.saturating_add(1);
    }

    pub fn iterations_used(&self) -> u32 {
        self.iterations_used
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn iterations_exhausted(&self) -> bool {
        self.iterations_used >= self.max_iterations
    }

    /// The tools that may still be offered to the model.
    pub fn available_tools(&self, tools: &[ToolDefinition]) -> Option<Arc<Vec<ToolDefinition>>> {
        let available: Vec<ToolDefinition> = tools
            .iter()
            .filter(|tool| self.can_use(tool.function_name()))
            .cloned()
            .collect();
        (!available.is_empty()).then(|| Arc::new(available))
    }
}
