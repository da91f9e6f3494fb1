//! CLI argument parsing and terminal relay for the iexec binary.

mod args;
mod echo;

pub use args::{parse_args, CliConfig};
pub use echo::{spawn_stdin_forwarder, Echo};
