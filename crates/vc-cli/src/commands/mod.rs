//! CLI command implementations

mod config;
mod context;
mod service;
mod setup;
mod status;
mod users;

pub use config::{config_init, config_path, config_show};
pub use context::{CommandContext, HostSelection, PasswordOverrides};
pub use service::{logs_command, restart_command, stop_command, test_command};
pub use setup::setup_command;
pub use status::status_command;
pub use users::{users_command, UserAction};
