#![forbid(unsafe_code)]

use crate::columns::Line;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use tracing::debug;

static LISTEN_ENDPOINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*):([0-9]+)$").expect("static listen pattern"));
static ESTABLISHED_ENDPOINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*):([0-9]+)->(.*):([0-9]+)$").expect("static established pattern")
});

/// A socket accepting connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenEntry {
    pub pid: u32,
    pub bind_address: String,
    pub bind_port: u16,
}

/// A connected socket, seen from the owning process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstablishedEntry {
    pub pid: u32,
    pub local_address: String,
    pub local_port: u16,
    pub remote_address: String,
    pub remote_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEntry {
    Listen(ListenEntry),
    Established(EstablishedEntry),
}

impl fmt::Display for SocketEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketEntry::Listen(l) => write!(f, "{}: {}:{}", l.pid, l.bind_address, l.bind_port),
            SocketEntry::Established(e) => write!(
                f,
                "{}: {}:{}->{}:{}",
                e.pid, e.local_address, e.local_port, e.remote_address, e.remote_port
            ),
        }
    }
}

/// TCP sockets from one socket listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocketInventory {
    entries: Vec<SocketEntry>,
}

impl SocketInventory {
    /// Classify listing lines. Lines without a positive owner pid, in a state
    /// other than `LISTEN`/`ESTABLISHED`, or with an unrecognised endpoint
    /// are dropped.
    pub fn from_lines(lines: &[Line]) -> Self {
        let entries = lines.iter().filter_map(Self::classify).collect();
        Self { entries }
    }

    fn classify(line: &Line) -> Option<SocketEntry> {
        let pid = match line.column(2).parse::<u32>() {
            Ok(pid) if pid > 0 => pid,
            _ => {
                debug!(%line, "skipping socket line without an owner pid");
                return None;
            }
        };

        let state = line.column_back(1).text().unwrap_or_default();
        let endpoint = line.column_back(2).text().unwrap_or_default();

        let entry = match state {
            "(LISTEN)" => {
                let caps = LISTEN_ENDPOINT.captures(endpoint);
                let parsed = caps.and_then(|c| Some((c[1].to_owned(), parse_port(&c[2])?)));
                let Some((bind_address, bind_port)) = parsed else {
                    debug!(pid, endpoint, "unrecognised listening endpoint");
                    return None;
                };
                SocketEntry::Listen(ListenEntry {
                    pid,
                    bind_address,
                    bind_port,
                })
            }
            "(ESTABLISHED)" => {
                let caps = ESTABLISHED_ENDPOINT.captures(endpoint);
                let parsed = caps.and_then(|c| {
                    Some(EstablishedEntry {
                        pid,
                        local_address: c[1].to_owned(),
                        local_port: parse_port(&c[2])?,
                        remote_address: c[3].to_owned(),
                        remote_port: parse_port(&c[4])?,
                    })
                });
                let Some(established) = parsed else {
                    debug!(pid, endpoint, "unrecognised established endpoint");
                    return None;
                };
                SocketEntry::Established(established)
            }
            other => {
                debug!(pid, state = other, "ignoring socket state");
                return None;
            }
        };
        Some(entry)
    }

    pub fn entries(&self) -> &[SocketEntry] {
        &self.entries
    }

    pub fn listening(&self) -> impl Iterator<Item = &ListenEntry> {
        self.entries.iter().filter_map(|entry| match entry {
            SocketEntry::Listen(l) => Some(l),
            SocketEntry::Established(_) => None,
        })
    }

    pub fn established(&self) -> impl Iterator<Item = &EstablishedEntry> {
        self.entries.iter().filter_map(|entry| match entry {
            SocketEntry::Established(e) => Some(e),
            SocketEntry::Listen(_) => None,
        })
    }
}

fn parse_port(text: &str) -> Option<u16> {
    text.parse().ok().filter(|port| *port > 0)
}
