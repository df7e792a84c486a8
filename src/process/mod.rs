// ABOUTME: External command construction and execution
// Every child process perry spawns (ssh, unison, docker, aws) is described by a CommandSpec
// and executed through a CommandRunner

pub mod command;
pub mod error;
pub mod runner;

pub use command::{shell_quote, CommandSpec};
pub use error::ProcessError;
pub use runner::{CommandRunner, SystemRunner};

#[cfg(test)]
pub use runner::MockCommandRunner;
