#![forbid(unsafe_code)]

use crate::columns::FieldError;
use crate::traffic::Chain;
use crate::units::SizeError;
use std::fmt;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with status {code:?}: {stderr}")]
    ExitStatus {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{program}` did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("Invalid command pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Chain {0} is unavailable")]
    ChainUnavailable(Chain),

    #[error("No rule {number} in chain {chain}")]
    NoSuchRule { chain: Chain, number: u32 },

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Size(#[from] SizeError),

    #[error("Cycle step `{step}` failed: {source}")]
    Cycle {
        step: CycleStep,
        #[source]
        source: Box<Error>,
    },
}

/// The failable steps of one collection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStep {
    Enumerate,
    AttachSockets,
    Enrich,
}

impl fmt::Display for CycleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CycleStep::Enumerate => "enumerate",
            CycleStep::AttachSockets => "attach sockets",
            CycleStep::Enrich => "enrich",
        })
    }
}

impl CycleStep {
    pub(crate) fn wrap(self) -> impl FnOnce(Error) -> Error {
        move |source| Error::Cycle {
            step: self,
            source: Box::new(source),
        }
    }
}
