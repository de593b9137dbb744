#![forbid(unsafe_code)]

use crate::columns::Line;
use crate::traffic::tag::{RuleTag, SubjectKind, TAG_PREFIX, TagError};
use crate::units::{SizeError, parse_size};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static DESTINATION_PORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^dpt:([0-9]+)$").expect("static dpt pattern"));
static SOURCE_PORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^spt:([0-9]+)$").expect("static spt pattern"));

/// Columns in a listing line of a rule created by the collector:
///
/// ```text
/// num pkts bytes prot opt in out source destination tcp dpt:80 /* pid=1;type=server */
/// ```
pub const RULE_COLUMNS: usize = 14;

const COL_NUMBER: usize = 1;
const COL_BYTES: usize = 3;
const COL_DESTINATION: usize = 9;
const COL_PORT_MATCH: usize = 11;
const COL_COMMENT_OPEN: usize = 12;
const COL_TAG: usize = 13;
const COL_COMMENT_CLOSE: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Chain {
    /// Inbound traffic.
    Input,
    /// Outbound traffic.
    Output,
}

impl Chain {
    pub const ALL: [Chain; 2] = [Chain::Input, Chain::Output];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Input => "INPUT",
            Chain::Output => "OUTPUT",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rule the collector wants to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleSpec {
    /// Counts traffic through a listening port: by destination port in
    /// INPUT, by source port in OUTPUT.
    Server { chain: Chain, pid: u32, port: u16 },
    /// Counts traffic sent to a remote endpoint, always in OUTPUT.
    Client { pid: u32, address: String, port: u16 },
}

impl RuleSpec {
    pub fn chain(&self) -> Chain {
        match self {
            RuleSpec::Server { chain, .. } => *chain,
            RuleSpec::Client { .. } => Chain::Output,
        }
    }

    pub fn tag(&self) -> RuleTag {
        match self {
            RuleSpec::Server { pid, .. } => RuleTag::new(*pid, SubjectKind::Server),
            RuleSpec::Client { pid, .. } => RuleTag::new(*pid, SubjectKind::Client),
        }
    }

    /// The match options, without the chain and comment.
    pub fn match_args(&self) -> Vec<String> {
        let mut args = vec!["-p".to_owned(), "tcp".to_owned()];
        match self {
            RuleSpec::Server {
                chain: Chain::Input,
                port,
                ..
            } => args.extend(["--dport".to_owned(), port.to_string()]),
            RuleSpec::Server {
                chain: Chain::Output,
                port,
                ..
            } => args.extend(["--sport".to_owned(), port.to_string()]),
            RuleSpec::Client { address, port, .. } => args.extend([
                "-d".to_owned(),
                address.clone(),
                "--dport".to_owned(),
                port.to_string(),
            ]),
        }
        args
    }

    /// Arguments inserting this rule at the head of its chain.
    pub fn insert_args(&self) -> Vec<String> {
        let mut args = vec!["-I".to_owned(), self.chain().to_string()];
        args.extend(self.match_args());
        args.extend([
            "-m".to_owned(),
            "comment".to_owned(),
            "--comment".to_owned(),
            self.tag().to_string(),
        ]);
        args
    }
}

impl fmt::Display for RuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.chain(), self.match_args().join(" "), self.tag())
    }
}

/// Why a rule recognised as the collector's should be removed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StaleReason {
    #[error("unreadable tag: {0}")]
    Tag(#[from] TagError),

    #[error("no port match in `{0}`")]
    Port(String),

    #[error("unreadable byte counter: {0}")]
    Counter(#[from] SizeError),

    #[error("client rule in the INPUT chain")]
    WrongChain,

    #[error("no subject is registered for it")]
    Unmatched,

    #[error("another rule already accounts for the same subject")]
    Duplicate,
}

/// One line of a chain listing, as far as the collector is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListedRule {
    /// Not created by the collector; left alone.
    Foreign,
    /// Created by the collector but unusable.
    Stale { number: u32, reason: StaleReason },
    Server {
        number: u32,
        pid: u32,
        port: u16,
        bytes: u64,
    },
    Client {
        number: u32,
        pid: u32,
        address: String,
        port: u16,
        bytes: u64,
    },
}

impl ListedRule {
    /// Interpret a listing line of `chain`.
    ///
    /// Only lines shaped exactly like the collector's own rules, with a
    /// comment starting `pid=`, are considered; everything else, headers and
    /// other tools' commented rules included, is [`Foreign`].
    ///
    /// [`Foreign`]: ListedRule::Foreign
    pub fn classify(chain: Chain, line: &Line) -> Self {
        if line.len() != RULE_COLUMNS
            || line.column(COL_COMMENT_OPEN).text() != Ok("/*")
            || line.column(COL_COMMENT_CLOSE).text() != Ok("*/")
            || !line
                .column(COL_TAG)
                .text()
                .is_ok_and(|tag| tag.starts_with(TAG_PREFIX))
        {
            return ListedRule::Foreign;
        }
        let Ok(number) = line.column(COL_NUMBER).parse::<u32>() else {
            return ListedRule::Foreign;
        };

        match Self::interpret(chain, line, number) {
            Ok(rule) => rule,
            Err(reason) => ListedRule::Stale { number, reason },
        }
    }

    fn interpret(chain: Chain, line: &Line, number: u32) -> Result<Self, StaleReason> {
        let tag: RuleTag = line
            .column(COL_TAG)
            .text()
            .unwrap_or_default()
            .parse()?;

        let port_match = line.column(COL_PORT_MATCH);
        let pattern = match (tag.kind, chain) {
            (SubjectKind::Client, Chain::Input) => return Err(StaleReason::WrongChain),
            (SubjectKind::Server, Chain::Output) => &*SOURCE_PORT,
            _ => &*DESTINATION_PORT,
        };
        let port = port_match
            .capture(pattern)
            .parse::<u16>()
            .ok()
            .filter(|port| *port > 0)
            .ok_or_else(|| StaleReason::Port(port_match.text().unwrap_or_default().to_owned()))?;

        let bytes = parse_size(line.column(COL_BYTES).text().unwrap_or_default())?;

        Ok(match tag.kind {
            SubjectKind::Server => ListedRule::Server {
                number,
                pid: tag.pid,
                port,
                bytes,
            },
            SubjectKind::Client => ListedRule::Client {
                number,
                pid: tag.pid,
                address: line
                    .column(COL_DESTINATION)
                    .text()
                    .unwrap_or_default()
                    .to_owned(),
                port,
                bytes,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn classify(chain: Chain, text: &str) -> ListedRule {
        ListedRule::classify(chain, &Line::parse(text, true, None))
    }

    #[test]
    fn server_rules_use_direction_specific_ports() {
        let input = "1 10 23453 tcp -- * * 0.0.0.0/0 0.0.0.0/0 tcp dpt:1080 /* pid=10234;type=server */";
        assert_eq!(
            classify(Chain::Input, input),
            ListedRule::Server {
                number: 1,
                pid: 10234,
                port: 1080,
                bytes: 23453,
            }
        );

        // an OUTPUT server rule must match on the source port
        assert!(matches!(
            classify(Chain::Output, input),
            ListedRule::Stale {
                number: 1,
                reason: StaleReason::Port(_)
            }
        ));

        let output = "4 10 2k tcp -- * * 0.0.0.0/0 0.0.0.0/0 tcp spt:1080 /* pid=10234;type=server */";
        assert_eq!(
            classify(Chain::Output, output),
            ListedRule::Server {
                number: 4,
                pid: 10234,
                port: 1080,
                bytes: 2048,
            }
        );
    }

    #[test]
    fn client_rules_carry_the_destination() {
        let line = "2 3 1M tcp -- * * 0.0.0.0/0 10.1.2.3 tcp dpt:5432 /* pid=77;type=client */";
        assert_eq!(
            classify(Chain::Output, line),
            ListedRule::Client {
                number: 2,
                pid: 77,
                address: "10.1.2.3".to_owned(),
                port: 5432,
                bytes: 1024 * 1024,
            }
        );
        assert_eq!(
            classify(Chain::Input, line),
            ListedRule::Stale {
                number: 2,
                reason: StaleReason::WrongChain,
            }
        );
    }

    #[test]
    fn foreign_lines_are_left_alone() {
        for line in [
            "Chain INPUT (policy ACCEPT 0 packets, 0 bytes)",
            "num pkts bytes target prot opt in out source destination",
            "1 0 0 ACCEPT all -- lo * 0.0.0.0/0 0.0.0.0/0",
            "3 0 0 DROP tcp -- * * 0.0.0.0/0 0.0.0.0/0 tcp dpt:23 /* telnet */",
            "4 0 0 tcp -- * * 0.0.0.0/0 0.0.0.0/0 tcp dpt:22 /* ssh */",
            "x 0 0 tcp -- * * 0.0.0.0/0 0.0.0.0/0 tcp dpt:1 /* pid=1;type=server */",
            "",
        ] {
            assert_eq!(classify(Chain::Input, line), ListedRule::Foreign, "{line:?}");
        }
    }

    #[test]
    fn unusable_own_rules_are_stale() {
        let bad_tag = "5 0 0 tcp -- * * 0.0.0.0/0 0.0.0.0/0 tcp dpt:80 /* pid=x;type=server */";
        assert!(matches!(
            classify(Chain::Input, bad_tag),
            ListedRule::Stale {
                number: 5,
                reason: StaleReason::Tag(_)
            }
        ));

        let bad_counter = "6 0 12x tcp -- * * 0.0.0.0/0 0.0.0.0/0 tcp dpt:80 /* pid=1;type=server */";
        assert!(matches!(
            classify(Chain::Input, bad_counter),
            ListedRule::Stale {
                number: 6,
                reason: StaleReason::Counter(_)
            }
        ));

        let zero_port = "7 0 0 tcp -- * * 0.0.0.0/0 0.0.0.0/0 tcp dpt:0 /* pid=1;type=server */";
        assert!(matches!(
            classify(Chain::Input, zero_port),
            ListedRule::Stale {
                number: 7,
                reason: StaleReason::Port(_)
            }
        ));

        let arabic_port =
            "8 0 0 tcp -- * * 0.0.0.0/0 0.0.0.0/0 tcp dpt:\u{668}\u{660} /* pid=1;type=server */";
        assert!(matches!(
            classify(Chain::Input, arabic_port),
            ListedRule::Stale {
                number: 8,
                reason: StaleReason::Port(_)
            }
        ));
    }

    #[test]
    fn insert_args_follow_iptables_syntax() {
        let server_in = RuleSpec::Server {
            chain: Chain::Input,
            pid: 100,
            port: 9090,
        };
        assert_eq!(
            server_in.insert_args().join(" "),
            "-I INPUT -p tcp --dport 9090 -m comment --comment pid=100;type=server"
        );

        let server_out = RuleSpec::Server {
            chain: Chain::Output,
            pid: 100,
            port: 9090,
        };
        assert_eq!(
            server_out.insert_args().join(" "),
            "-I OUTPUT -p tcp --sport 9090 -m comment --comment pid=100;type=server"
        );

        let client = RuleSpec::Client {
            pid: 5,
            address: "10.0.0.9".to_owned(),
            port: 5432,
        };
        assert_eq!(client.chain(), Chain::Output);
        assert_eq!(
            client.insert_args().join(" "),
            "-I OUTPUT -p tcp -d 10.0.0.9 --dport 5432 -m comment --comment pid=5;type=client"
        );
    }
}
