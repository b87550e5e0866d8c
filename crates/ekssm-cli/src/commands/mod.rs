//! CLI command implementations

mod run;
mod session_list;
mod session_start;
mod session_stop;
mod session_switch;
mod shell;

pub use run::run_command;
pub use session_list::session_list;
pub use session_start::session_start;
pub use session_stop::session_stop;
pub use session_switch::session_switch;
pub use shell::{shell_integration, ShellKind};
