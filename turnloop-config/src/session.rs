use std::collections::BTreeMap;

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an analysis assistant. Use the available tools \
to gather whatever evidence you need, then answer with your findings inside \
<analysis></analysis> tags followed by concrete next steps inside \
<instruction></instruction> tags.";

pub const DEFAULT_FINALIZATION_PROMPT: &str = "You have reached the maximum number of tool \
iterations for this session. Do not request any more tools. Using only the information \
already gathered, give your final answer now in the form \
<analysis>...</analysis><instruction>...</instruction>.";

/// Per-session loop settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SessionConfig {
    /// Maximum number of model turns that may request tools before finalization is forced.
    #[serde(default = "SessionConfig::default_max_iterations")]
    pub max_iterations: u32,
    /// Dispatch the tool requests of one turn concurrently.
    #[serde(default = "SessionConfig::default_parallel_tool_calls")]
    pub parallel_tool_calls: bool,
    /// User turn appended when the iteration ceiling is reached.
    #[serde(default = "SessionConfig::default_finalization_prompt")]
    pub finalization_prompt: String,
    #[serde(default = "SessionConfig::default_system_prompt")]
    pub system_prompt: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_iterations: Self::default_max_iterations(),
            parallel_tool_calls: Self::default_parallel_tool_calls(),
            finalization_prompt: Self::default_finalization_prompt(),
            system_prompt: Self::default_system_prompt(),
        }
    }
}

impl SessionConfig {
    const fn default_max_iterations() -> u32 {
        8
    }

    const fn default_parallel_tool_calls() -> bool {
        true
    }

    fn default_finalization_prompt() -> String {
        DEFAULT_FINALIZATION_PROMPT.to_owned()
    }

    fn default_system_prompt() -> String {
        DEFAULT_SYSTEM_PROMPT.to_owned()
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_iterations >= 1,
            "session.max_iterations must be at least 1"
        );
        ensure!(
            !self.finalization_prompt.trim().is_empty(),
            "session.finalization_prompt must not be empty"
        );
        Ok(())
    }
}

/// Ceilings on costly tools, keyed by tool name. Tools without an entry are unlimited.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BudgetConfig {
    #[serde(default = "BudgetConfig::default_tool_limits")]
    pub tool_limits: BTreeMap<String, u32>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            tool_limits: Self::default_tool_limits(),
        }
    }
}

impl BudgetConfig {
    pub const WEB_SEARCH_TOOL: &'static str = "web_search";

    fn default_tool_limits() -> BTreeMap<String, u32> {
        BTreeMap::from([(Self::WEB_SEARCH_TOOL.to_owned(), 3)])
    }

    pub fn limit_for(&self, tool: &str) -> Option<u32> {
        self.tool_limits.get(tool).copied()
    }

    pub fn validate(&self) -> Result<()> {
        for name in self.tool_limits.keys() {
            ensure!(
                !name.trim().is_empty(),
                "budget.tool_limits keys must be non-empty tool names"
            );
        }
        Ok(())
    }
}
