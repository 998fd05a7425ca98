//! External command execution.
//!
//! Every tool the release pipeline drives (git, docker, gcloud, kubectl, the
//! audit tool) goes through a [`CommandRunner`].

mod command;

pub use command::{CommandInvocation, CommandOutput, CommandRunner, ProcessCommandRunner};

#[cfg(test)]
pub use command::MockCommandRunner;
