//! Core of turnloop: a bounded tool-calling loop over interchangeable LLM backends.
//!
//! A session seeds a transcript from the caller's query and context, then
//! alternates between asking the backend for its next step and running the
//! tools it requests through a [`ToolGateway`]. Each backend's reasoning state
//! is echoed back in the shape that backend expects (see [`llm::envelope`]).
//! Sessions end when the model answers without tools, when the iteration
//! ceiling forces a tools-free answer, or when a backend call fails for good.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use turnloop_core::{LLMFactory, Orchestrator, SessionRequest, SessionSettings, ToolGateway};
//!
//! # async fn run(gateway: Arc<dyn ToolGateway>) -> anyhow::Result<()> {
//! let orchestrator = Orchestrator::new(
//!     Arc::new(LLMFactory::new()),
//!     Arc::new(SessionSettings::default()),
//! );
//! let result = orchestrator
//!     .orchestrate(
//!         SessionRequest::new("deepseek", "Why does the nightly job time out?"),
//!         gateway,
//!         CancellationToken::new(),
//!     )
//!     .await?;
//! println!("{}", result.instruction);
//! # Ok(())
//! # }
//! ```

pub mod budget;
pub mod collaborators;
pub mod llm;
pub mod session;
pub mod tools;

pub use budget::BudgetTracker;
pub use collaborators::{HistoryProvider, SessionTrace, TraceSink};
pub use llm::{
    BackendFamily, BackendInvoker, BackendSpec, LLMError, LLMFactory, LLMProvider, LLMRequest,
    LLMResponse, Message, MessageRole, ProviderConfig, ReasoningEnvelope, ToolCall,
    ToolDefinition,
};
pub use session::{
    ContextChunk, Orchestrator, SessionError, SessionOutcome, SessionRequest, SessionResult,
    SessionSettings, ToolCallRecord,
};
pub use tools::{ToolGateway, ToolOutput};
