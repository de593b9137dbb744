#![forbid(unsafe_code)]

use crate::error::Error;
use crate::inspect::PROCESS_LISTING;
use config::{Config, PortSpec};
use regex::Regex;

/// Decides which command lines are monitored.
#[derive(Debug, Clone, Default)]
pub struct CommandFilter {
    includes: Vec<Regex>,
    excludes: Vec<Regex>,
}

impl CommandFilter {
    pub fn new<I, E>(includes: I, excludes: E) -> Result<Self, Error>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Ok(Self {
            includes: compile(includes)?,
            excludes: compile(excludes)?,
        })
    }

    /// Whether `command` passes the configured patterns. With no includes
    /// every command is a candidate; any exclude match drops it.
    pub fn accepts(&self, command: &str) -> bool {
        let included =
            self.includes.is_empty() || self.includes.iter().any(|re| re.is_match(command));
        included && !self.excludes.iter().any(|re| re.is_match(command))
    }
}

fn compile<I>(patterns: I) -> Result<Vec<Regex>, Error>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|pattern| {
            let pattern = pattern.as_ref();
            Regex::new(pattern).map_err(|source| Error::Pattern {
                pattern: pattern.to_owned(),
                source,
            })
        })
        .collect()
}

/// Rules applied to every listed command regardless of configuration: the
/// collector's own process listing and kernel threads (`[kthreadd]`).
pub fn is_builtin_excluded(command: &str) -> bool {
    command == PROCESS_LISTING || (command.starts_with('[') && command.ends_with(']'))
}

/// Ports that are never accounted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortBlacklist {
    specs: Vec<PortSpec>,
}

impl PortBlacklist {
    pub fn new<'a>(specs: impl IntoIterator<Item = &'a PortSpec>) -> Self {
        Self {
            specs: specs.into_iter().copied().collect(),
        }
    }

    pub fn contains(&self, port: u16) -> bool {
        self.specs.iter().any(|spec| spec.contains(port))
    }
}

/// All filters for one cycle, built from a configuration snapshot.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub commands: CommandFilter,
    pub local_ports: PortBlacklist,
    pub remote_ports: PortBlacklist,
}

impl Filters {
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        Ok(Self {
            commands: CommandFilter::new(&config.command.includes, &config.command.excludes)?,
            local_ports: PortBlacklist::new(config.port.local()),
            remote_ports: PortBlacklist::new(config.port.remote()),
        })
    }

    /// Whether a process with this command line is reported at all.
    pub fn accepts_command(&self, command: &str) -> bool {
        !is_builtin_excluded(command) && self.commands.accepts(command)
    }
}
