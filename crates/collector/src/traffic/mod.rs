#![forbid(unsafe_code)]

//! Per-socket byte accounting through packet filter counters.
//!
//! Every accounting subject is backed by one counting rule per chain it is
//! measured in. Rules carry a [`RuleTag`] comment, so the chains themselves
//! are the only durable state: each pass lists the chains, absorbs the
//! counters of rules that still match a registered subject, deletes the rest
//! of the collector's rules and creates whatever is missing.

mod firewall;
mod rule;
mod tag;

pub use firewall::{Firewall, Iptables, MemoryFirewall};
pub use rule::{Chain, ListedRule, RULE_COLUMNS, RuleSpec, StaleReason};
pub use tag::{RuleTag, SubjectKind, TagError};

use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, trace, warn};

/// A byte counter, valid for the current pass only once `ready`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counter {
    pub bytes: u64,
    pub ready: bool,
}

impl Counter {
    fn reset(&mut self) {
        *self = Counter::default();
    }

    fn absorb(&mut self, bytes: u64) {
        self.bytes = bytes;
        self.ready = true;
    }
}

/// Traffic through a listening port: INPUT counts what arrives, OUTPUT what
/// leaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputSubject {
    pub inbound: Counter,
    pub outbound: Counter,
}

/// Traffic sent to one remote endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientSubject {
    pub outbound: Counter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirewallAction {
    List,
    Delete { number: u32 },
    Insert { tag: RuleTag },
}

impl fmt::Display for FirewallAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirewallAction::List => f.write_str("list"),
            FirewallAction::Delete { number } => write!(f, "delete rule {number}"),
            FirewallAction::Insert { tag } => write!(f, "insert [{tag}]"),
        }
    }
}

/// A firewall operation that failed during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallFailure {
    pub chain: Chain,
    pub action: FirewallAction,
    pub message: String,
}

impl fmt::Display for FirewallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.chain, self.action, self.message)
    }
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Rules whose counter was absorbed into a subject.
    pub matched: usize,
    pub deleted: usize,
    pub inserted: usize,
    pub failures: Vec<FirewallFailure>,
}

impl ReconcileReport {
    /// True when the pass changed nothing in the firewall and nothing failed.
    pub fn is_steady(&self) -> bool {
        self.deleted == 0 && self.inserted == 0 && self.failures.is_empty()
    }

    fn fail(&mut self, chain: Chain, action: FirewallAction, err: &crate::error::Error) {
        warn!(%chain, %action, %err, "firewall operation failed");
        self.failures.push(FirewallFailure {
            chain,
            action,
            message: err.to_string(),
        });
    }
}

enum Absorbed {
    Foreign,
    Matched,
    Stale(u32, StaleReason),
}

type InputKey = (u32, u16);
type ClientKey = (u32, String, u16);

/// The registered accounting subjects and their counters.
#[derive(Debug, Clone, Default)]
pub struct TrafficMonitor {
    inputs: BTreeMap<InputKey, InputSubject>,
    clients: BTreeMap<ClientKey, ClientSubject>,
}

impl TrafficMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every subject.
    pub fn clear(&mut self) {
        self.inputs.clear();
        self.clients.clear();
    }

    pub fn len(&self) -> usize {
        self.inputs.len() + self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.clients.is_empty()
    }

    /// Register traffic through `port` of `pid`. Returns `false` when the
    /// subject is invalid or already registered.
    pub fn add_input(&mut self, pid: u32, port: u16) -> bool {
        if pid == 0 || port == 0 {
            debug!(pid, port, "rejecting input subject");
            return false;
        }
        let mut added = false;
        self.inputs.entry((pid, port)).or_insert_with(|| {
            added = true;
            InputSubject::default()
        });
        added
    }

    /// Register traffic from `pid` to `address:port`. Returns `false` when
    /// the subject is invalid or already registered.
    pub fn add_client(&mut self, pid: u32, address: &str, port: u16) -> bool {
        if pid == 0 || port == 0 || address.is_empty() {
            debug!(pid, address, port, "rejecting client subject");
            return false;
        }
        let mut added = false;
        self.clients
            .entry((pid, address.to_owned(), port))
            .or_insert_with(|| {
                added = true;
                ClientSubject::default()
            });
        added
    }

    pub fn input(&self, pid: u32, port: u16) -> Option<&InputSubject> {
        self.inputs.get(&(pid, port))
    }

    pub fn client(&self, pid: u32, address: &str, port: u16) -> Option<&ClientSubject> {
        self.clients.get(&(pid, address.to_owned(), port))
    }

    /// Inbound and outbound bytes of an input subject.
    pub fn input_traffic(&self, pid: u32, port: u16) -> Option<(u64, u64)> {
        self.input(pid, port)
            .map(|subject| (subject.inbound.bytes, subject.outbound.bytes))
    }

    pub fn client_traffic(&self, pid: u32, address: &str, port: u16) -> Option<u64> {
        self.client(pid, address, port)
            .map(|subject| subject.outbound.bytes)
    }

    /// Bring the firewall in line with the registered subjects and read
    /// their counters.
    ///
    /// Firewall failures never abort the pass; they are logged and
    /// collected in the report. A chain that cannot be listed is left
    /// untouched and its subjects stay unready.
    pub async fn reconcile(&mut self, firewall: &dyn Firewall) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for subject in self.inputs.values_mut() {
            subject.inbound.reset();
            subject.outbound.reset();
        }
        for subject in self.clients.values_mut() {
            subject.outbound.reset();
        }

        let mut listed = Vec::with_capacity(Chain::ALL.len());
        for chain in Chain::ALL {
            let lines = match firewall.list(chain).await {
                Ok(lines) => lines,
                Err(err) => {
                    report.fail(chain, FirewallAction::List, &err);
                    continue;
                }
            };
            listed.push(chain);

            let mut stale = Vec::new();
            for line in &lines {
                match self.absorb(chain, ListedRule::classify(chain, line)) {
                    Absorbed::Foreign => trace!(%chain, %line, "foreign rule"),
                    Absorbed::Matched => report.matched += 1,
                    Absorbed::Stale(number, reason) => {
                        debug!(%chain, number, %reason, "stale rule");
                        stale.push(number);
                    }
                }
            }

            // deleting from the bottom keeps the remaining numbers valid
            stale.sort_unstable_by(|a, b| b.cmp(a));
            stale.dedup();
            for number in stale {
                match firewall.delete(chain, number).await {
                    Ok(()) => report.deleted += 1,
                    Err(err) => report.fail(chain, FirewallAction::Delete { number }, &err),
                }
            }
        }

        for chain in listed {
            for rule in self.missing(chain) {
                match firewall.insert(&rule).await {
                    Ok(()) => {
                        self.confirm(&rule);
                        report.inserted += 1;
                    }
                    Err(err) => report.fail(chain, FirewallAction::Insert { tag: rule.tag() }, &err),
                }
            }
        }

        info!(
            matched = report.matched,
            deleted = report.deleted,
            inserted = report.inserted,
            failures = report.failures.len(),
            subjects = self.len(),
            "firewall reconciled"
        );
        report
    }

    /// Absorb the counter of a classified rule into its subject.
    fn absorb(&mut self, chain: Chain, rule: ListedRule) -> Absorbed {
        match rule {
            ListedRule::Foreign => Absorbed::Foreign,
            ListedRule::Stale { number, reason } => Absorbed::Stale(number, reason),
            ListedRule::Server {
                number,
                pid,
                port,
                bytes,
            } => {
                let Some(subject) = self.inputs.get_mut(&(pid, port)) else {
                    return Absorbed::Stale(number, StaleReason::Unmatched);
                };
                let counter = match chain {
                    Chain::Input => &mut subject.inbound,
                    Chain::Output => &mut subject.outbound,
                };
                if counter.ready {
                    return Absorbed::Stale(number, StaleReason::Duplicate);
                }
                counter.absorb(bytes);
                trace!(%chain, number, pid, port, bytes, "server rule matched");
                Absorbed::Matched
            }
            ListedRule::Client {
                number,
                pid,
                address,
                port,
                bytes,
            } => {
                let Some(subject) = self.clients.get_mut(&(pid, address, port)) else {
                    return Absorbed::Stale(number, StaleReason::Unmatched);
                };
                if subject.outbound.ready {
                    return Absorbed::Stale(number, StaleReason::Duplicate);
                }
                subject.outbound.absorb(bytes);
                trace!(%chain, number, pid, port, bytes, "client rule matched");
                Absorbed::Matched
            }
        }
    }

    /// Rules to create in `chain` for subjects still unready.
    fn missing(&self, chain: Chain) -> Vec<RuleSpec> {
        let servers = self.inputs.iter().filter_map(|(&(pid, port), subject)| {
            let counter = match chain {
                Chain::Input => subject.inbound,
                Chain::Output => subject.outbound,
            };
            (!counter.ready).then_some(RuleSpec::Server { chain, pid, port })
        });
        let mut rules: Vec<_> = servers.collect();

        if chain == Chain::Output {
            rules.extend(
                self.clients
                    .iter()
                    .filter(|(_, subject)| !subject.outbound.ready)
                    .map(|((pid, address, port), _)| RuleSpec::Client {
                        pid: *pid,
                        address: address.clone(),
                        port: *port,
                    }),
            );
        }
        rules
    }

    /// Mark the subject behind a freshly created rule as counted from zero.
    fn confirm(&mut self, rule: &RuleSpec) {
        info!(%rule, "accounting rule created");
        match rule {
            RuleSpec::Server { chain, pid, port } => {
                if let Some(subject) = self.inputs.get_mut(&(*pid, *port)) {
                    match chain {
                        Chain::Input => subject.inbound.absorb(0),
                        Chain::Output => subject.outbound.absorb(0),
                    }
                }
            }
            RuleSpec::Client { pid, address, port } => {
                if let Some(subject) = self.clients.get_mut(&(*pid, address.clone(), *port)) {
                    subject.outbound.absorb(0);
                }
            }
        }
    }
}
