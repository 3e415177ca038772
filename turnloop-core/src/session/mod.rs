//! The multi-turn session loop and its result types.

mod orchestrator;
pub mod output;
mod types;

pub use orchestrator::{Orchestrator, render_user_turn};
pub use output::{FinalOutput, parse_final_output};
pub use types::{
    ContextChunk, SessionError, SessionOutcome, SessionRequest, SessionResult, SessionSettings,
    ToolCallRecord,
};
