#![forbid(unsafe_code)]

use crate::columns::{Line, split_lines};
use crate::error::Error;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tracing::trace;

/// An external command together with how its output is split into columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Strip leading and trailing whitespace from each line before splitting.
    pub trim: bool,
    /// Maximum number of columns per line; the last column keeps the rest.
    pub max_fields: Option<usize>,
    /// Accept output from a command that exits with a nonzero status.
    pub allow_failure: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            trim: true,
            max_fields: None,
            allow_failure: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn trim(mut self, trim: bool) -> Self {
        self.trim = trim;
        self
    }

    pub fn max_fields(mut self, max_fields: usize) -> Self {
        self.max_fields = Some(max_fields);
        self
    }

    pub fn allow_failure(mut self, allow: bool) -> Self {
        self.allow_failure = allow;
        self
    }

    /// Run the command and split its standard output into lines of columns.
    pub async fn run(&self, runner: &dyn CommandRunner) -> Result<Vec<Line>, Error> {
        let stdout = runner.output(self).await?;
        let lines = split_lines(&stdout, self.trim, self.max_fields);
        trace!(program = %self.program, lines = lines.len(), "command output split");
        Ok(lines)
    }

    /// The command line as a shell would show it.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Execute `spec` and return its standard output.
    ///
    /// A nonzero exit status is an error unless `spec.allow_failure` is set.
    async fn output(&self, spec: &CommandSpec) -> Result<String, Error>;
}

/// Runs commands on the host, killing any that outlive the timeout.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn output(&self, spec: &CommandSpec) -> Result<String, Error> {
        let spawn_error = |source: std::io::Error| Error::Spawn {
            program: spec.program.clone(),
            source,
        };

        let child = tokio::process::Command::new(&spec.program)
            .args(&spec.args)
            // keep `ps` and `top` from truncating command lines
            .env("COLUMNS", "1000")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Timeout {
                program: spec.program.clone(),
                timeout: self.timeout,
            })?
            .map_err(spawn_error)?;

        if !output.status.success() && !spec.allow_failure {
            return Err(Error::ExitStatus {
                program: spec.program.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
