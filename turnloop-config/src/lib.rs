//! Configuration for turnloop sessions.
//!
//! [`LoopConfig`] is deserialised from `turnloop.toml`; every section has
//! serde defaults so an empty file is a valid configuration. Callers pass the
//! resolved values explicitly into each session instead of consulting process
//! globals.

pub mod backends;
pub mod loader;
pub mod logging;
pub mod retry;
pub mod session;
pub mod timeouts;
pub mod tools;

pub use backends::BackendConfig;
pub use loader::{CONFIG_FILE_NAME, CONFIG_PATH_ENV, LoopConfig, load_dotenv};
pub use logging::LoggingConfig;
pub use retry::RetryConfig;
pub use session::{BudgetConfig, DEFAULT_FINALIZATION_PROMPT, DEFAULT_SYSTEM_PROMPT, SessionConfig};
pub use timeouts::TimeoutsConfig;
pub use tools::ToolDefinitionConfig;
