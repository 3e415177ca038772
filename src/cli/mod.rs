//! Command handlers for the turnloop binary.

mod args;
mod inspect;
mod run;

pub use args::{Cli, Commands, RunArgs};
pub use inspect::{handle_backends_command, handle_check_config_command};
pub use run::handle_run_command;
