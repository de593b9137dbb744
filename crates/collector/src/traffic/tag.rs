#![forbid(unsafe_code)]

//! The comment embedded in every rule the collector creates.
//!
//! A tag reads `pid=<pid>;type=<server|client>`. It is the only state the
//! collector keeps about its rules, which lets a restarted collector pick up
//! the counters of rules created by a previous run.

use std::fmt;
use std::str::FromStr;

/// Every tag starts with this.
pub const TAG_PREFIX: &str = "pid=";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubjectKind {
    /// Traffic through a listening port.
    Server,
    /// Traffic sent to a remote endpoint.
    Client,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Server => "server",
            SubjectKind::Client => "client",
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    #[error("`{0}` is not a `pid=<pid>;type=<kind>` tag")]
    Malformed(String),

    #[error("invalid pid `{0}` in tag")]
    InvalidPid(String),

    #[error("unknown subject type `{0}` in tag")]
    UnknownKind(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleTag {
    pub pid: u32,
    pub kind: SubjectKind,
}

impl RuleTag {
    pub fn new(pid: u32, kind: SubjectKind) -> Self {
        Self { pid, kind }
    }
}

impl fmt::Display for RuleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid={};type={}", self.pid, self.kind)
    }
}

impl FromStr for RuleTag {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || TagError::Malformed(s.to_owned());
        let (pid, kind) = s.split_once(';').ok_or_else(malformed)?;
        let pid = pid.strip_prefix(TAG_PREFIX).ok_or_else(malformed)?;
        let kind = kind.strip_prefix("type=").ok_or_else(malformed)?;

        let digits = !pid.is_empty() && pid.bytes().all(|b| b.is_ascii_digit());
        let pid = match pid.parse::<u32>() {
            Ok(value) if digits && value > 0 => value,
            _ => return Err(TagError::InvalidPid(pid.to_owned())),
        };
        let kind = match kind {
            "server" => SubjectKind::Server,
            "client" => SubjectKind::Client,
            other => return Err(TagError::UnknownKind(other.to_owned())),
        };

        Ok(RuleTag { pid, kind })
    }
}
