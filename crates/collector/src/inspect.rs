#![forbid(unsafe_code)]

use crate::columns::Line;
use crate::error::Error;
use crate::exec::{CommandRunner, CommandSpec};
use async_trait::async_trait;
use std::sync::Arc;

/// The process listing invocation. Its own line in the listing is never
/// reported as a monitored process.
pub const PROCESS_LISTING: &str = "ps -ef";

/// Columns in a process listing line; the last one is the full command.
pub const PROCESS_COLUMNS: usize = 8;

/// Columns in a resource usage line; the last one is the command name.
pub const USAGE_COLUMNS: usize = 12;

/// Read-only view of the host's processes and sockets.
#[async_trait]
pub trait SystemInspector: Send + Sync {
    /// `ps -ef` style listing, header included, capped at
    /// [`PROCESS_COLUMNS`] columns.
    async fn processes(&self) -> Result<Vec<Line>, Error>;

    /// `lsof` style listing of IPv4 TCP sockets.
    async fn sockets(&self) -> Result<Vec<Line>, Error>;

    /// `top -b` style listing, capped at [`USAGE_COLUMNS`] columns.
    async fn resource_usage(&self) -> Result<Vec<Line>, Error>;
}

/// Gathers the listings by running the standard tools.
#[derive(Clone)]
pub struct CommandInspector {
    runner: Arc<dyn CommandRunner>,
}

impl CommandInspector {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    pub fn process_command() -> CommandSpec {
        let mut words = PROCESS_LISTING.split_whitespace();
        CommandSpec::new(words.next().unwrap_or("ps"))
            .args(words)
            .max_fields(PROCESS_COLUMNS)
    }

    pub fn socket_command() -> CommandSpec {
        CommandSpec::new("lsof").args(["-a", "-n", "-P", "-i4TCP"])
    }

    pub fn usage_command() -> CommandSpec {
        // top exits nonzero when stdout is not a terminal on some systems
        CommandSpec::new("top")
            .args(["-b", "-n", "1"])
            .max_fields(USAGE_COLUMNS)
            .allow_failure(true)
    }
}

#[async_trait]
impl SystemInspector for CommandInspector {
    async fn processes(&self) -> Result<Vec<Line>, Error> {
        Self::process_command().run(self.runner.as_ref()).await
    }

    async fn sockets(&self) -> Result<Vec<Line>, Error> {
        Self::socket_command().run(self.runner.as_ref()).await
    }

    async fn resource_usage(&self) -> Result<Vec<Line>, Error> {
        Self::usage_command().run(self.runner.as_ref()).await
    }
}
