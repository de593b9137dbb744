#![forbid(unsafe_code)]

use crate::columns::{Line, split_lines};
use crate::error::Error;
use crate::exec::{CommandRunner, CommandSpec};
use crate::traffic::rule::{Chain, RuleSpec};
use crate::units::parse_size;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

const IPTABLES: &str = "iptables";

/// The host packet filter, reduced to what traffic accounting needs.
#[async_trait]
pub trait Firewall: Send + Sync {
    /// The rules of `chain` with line numbers, exact byte counters and
    /// comments, one listing line each (headers included).
    async fn list(&self, chain: Chain) -> Result<Vec<Line>, Error>;

    /// Insert `rule` at the head of its chain.
    async fn insert(&self, rule: &RuleSpec) -> Result<(), Error>;

    /// Delete rule `number` (1-based) of `chain`.
    async fn delete(&self, chain: Chain, number: u32) -> Result<(), Error>;
}

/// Drives `iptables`. Needs `CAP_NET_ADMIN`.
#[derive(Clone)]
pub struct Iptables {
    runner: Arc<dyn CommandRunner>,
}

impl Iptables {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    pub fn list_command(chain: Chain) -> CommandSpec {
        CommandSpec::new(IPTABLES).args(["-x", "-n", "-v", "-L", chain.as_str(), "--line-numbers"])
    }

    pub fn insert_command(rule: &RuleSpec) -> CommandSpec {
        CommandSpec::new(IPTABLES).args(rule.insert_args())
    }

    pub fn delete_command(chain: Chain, number: u32) -> CommandSpec {
        CommandSpec::new(IPTABLES).args(["-D".to_owned(), chain.to_string(), number.to_string()])
    }
}

#[async_trait]
impl Firewall for Iptables {
    async fn list(&self, chain: Chain) -> Result<Vec<Line>, Error> {
        Self::list_command(chain).run(self.runner.as_ref()).await
    }

    async fn insert(&self, rule: &RuleSpec) -> Result<(), Error> {
        Self::insert_command(rule).run(self.runner.as_ref()).await?;
        Ok(())
    }

    async fn delete(&self, chain: Chain, number: u32) -> Result<(), Error> {
        Self::delete_command(chain, number)
            .run(self.runner.as_ref())
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct MemoryRule {
    counter: String,
    body: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    chains: BTreeMap<Chain, Vec<MemoryRule>>,
    denied: BTreeSet<Chain>,
    reject_inserts: bool,
    reject_deletes: bool,
}

/// An in-process packet filter that lists its rules the way
/// `iptables -x -n -v -L <chain> --line-numbers` does.
///
/// Clones share the same rules.
#[derive(Debug, Clone, Default)]
pub struct MemoryFirewall {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryFirewall {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The listing body (everything after the counters) `iptables` prints for
    /// a rule created from `rule`.
    pub fn body(rule: &RuleSpec) -> String {
        let (destination, port_match) = match rule {
            RuleSpec::Server {
                chain: Chain::Input,
                port,
                ..
            } => ("0.0.0.0/0".to_owned(), format!("dpt:{port}")),
            RuleSpec::Server {
                chain: Chain::Output,
                port,
                ..
            } => ("0.0.0.0/0".to_owned(), format!("spt:{port}")),
            RuleSpec::Client { address, port, .. } => (address.clone(), format!("dpt:{port}")),
        };
        format!(
            "tcp -- * * 0.0.0.0/0 {destination} tcp {port_match} /* {} */",
            rule.tag()
        )
    }

    /// Append a raw rule to the tail of `chain`.
    pub fn seed(&self, chain: Chain, counter: &str, body: &str) {
        self.state()
            .chains
            .entry(chain)
            .or_default()
            .push(MemoryRule {
                counter: counter.to_owned(),
                body: body.to_owned(),
            });
    }

    /// Append the rule the collector would create for `rule`.
    pub fn seed_rule(&self, rule: &RuleSpec, counter: &str) {
        self.seed(rule.chain(), counter, &Self::body(rule));
    }

    /// Rule bodies of `chain`, in listing order.
    pub fn rules(&self, chain: Chain) -> Vec<String> {
        self.state()
            .chains
            .get(&chain)
            .map(|rules| rules.iter().map(|rule| rule.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Count `bytes` more traffic on rule `number` of `chain`.
    pub fn add_traffic(&self, chain: Chain, number: u32, bytes: u64) {
        let mut state = self.state();
        let rule = state
            .chains
            .get_mut(&chain)
            .and_then(|rules| rules.get_mut((number as usize).checked_sub(1)?));
        if let Some(rule) = rule {
            let current = parse_size(&rule.counter).unwrap_or_default();
            rule.counter = current.saturating_add(bytes).to_string();
        }
    }

    /// Make every operation on `chain` fail, as it does without privileges.
    pub fn deny(&self, chain: Chain) {
        self.state().denied.insert(chain);
    }

    pub fn reject_inserts(&self, reject: bool) {
        self.state().reject_inserts = reject;
    }

    pub fn reject_deletes(&self, reject: bool) {
        self.state().reject_deletes = reject;
    }

    fn render(chain: Chain, rules: &[MemoryRule]) -> String {
        let mut out = format!(
            "Chain {chain} (policy ACCEPT 0 packets, 0 bytes)\n\
             num      pkts      bytes target     prot opt in     out     source               destination\n"
        );
        for (idx, rule) in rules.iter().enumerate() {
            out.push_str(&format!("{} 0 {} {}\n", idx + 1, rule.counter, rule.body));
        }
        out
    }
}

#[async_trait]
impl Firewall for MemoryFirewall {
    async fn list(&self, chain: Chain) -> Result<Vec<Line>, Error> {
        let state = self.state();
        if state.denied.contains(&chain) {
            return Err(Error::ChainUnavailable(chain));
        }
        let rules = state.chains.get(&chain).map(Vec::as_slice).unwrap_or_default();
        Ok(split_lines(&Self::render(chain, rules), true, None))
    }

    async fn insert(&self, rule: &RuleSpec) -> Result<(), Error> {
        let chain = rule.chain();
        let mut state = self.state();
        if state.denied.contains(&chain) || state.reject_inserts {
            return Err(Error::ChainUnavailable(chain));
        }
        debug!(%rule, "memory firewall insert");
        state.chains.entry(chain).or_default().insert(
            0,
            MemoryRule {
                counter: "0".to_owned(),
                body: Self::body(rule),
            },
        );
        Ok(())
    }

    async fn delete(&self, chain: Chain, number: u32) -> Result<(), Error> {
        let mut state = self.state();
        if state.denied.contains(&chain) || state.reject_deletes {
            return Err(Error::ChainUnavailable(chain));
        }
        let rules = state.chains.entry(chain).or_default();
        let idx = (number as usize)
            .checked_sub(1)
            .filter(|idx| *idx < rules.len())
            .ok_or(Error::NoSuchRule { chain, number })?;
        let removed = rules.remove(idx);
        debug!(%chain, number, body = %removed.body, "memory firewall delete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traffic::rule::{ListedRule, RULE_COLUMNS};
    use pretty_assertions::assert_eq;

    #[test]
    fn iptables_invocations() {
        assert_eq!(
            Iptables::list_command(Chain::Output).command_line(),
            "iptables -x -n -v -L OUTPUT --line-numbers"
        );
        assert_eq!(
            Iptables::delete_command(Chain::Input, 7).command_line(),
            "iptables -D INPUT 7"
        );
        let rule = RuleSpec::Server {
            chain: Chain::Input,
            pid: 3,
            port: 80,
        };
        assert_eq!(
            Iptables::insert_command(&rule).command_line(),
            "iptables -I INPUT -p tcp --dport 80 -m comment --comment pid=3;type=server"
        );
    }

    #[tokio::test]
    async fn inserted_rules_list_in_the_classified_shape() {
        let firewall = MemoryFirewall::new();
        let client = RuleSpec::Client {
            pid: 9,
            address: "10.0.0.2".to_owned(),
            port: 443,
        };
        firewall.insert(&client).await.unwrap();
        firewall.add_traffic(Chain::Output, 1, 512);

        let lines = firewall.list(Chain::Output).await.unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2].len(), RULE_COLUMNS);
        assert_eq!(
            ListedRule::classify(Chain::Output, &lines[2]),
            ListedRule::Client {
                number: 1,
                pid: 9,
                address: "10.0.0.2".to_owned(),
                port: 443,
                bytes: 512,
            }
        );
        for header in &lines[..2] {
            assert_eq!(ListedRule::classify(Chain::Output, header), ListedRule::Foreign);
        }
    }

    #[tokio::test]
    async fn insert_goes_to_the_head_and_delete_renumbers() {
        let firewall = MemoryFirewall::new();
        firewall.seed(Chain::Input, "0", "all -- lo * 0.0.0.0/0 0.0.0.0/0");
        let rule = RuleSpec::Server {
            chain: Chain::Input,
            pid: 1,
            port: 22,
        };
        firewall.insert(&rule).await.unwrap();
        assert_eq!(
            firewall.rules(Chain::Input),
            vec![
                MemoryFirewall::body(&rule),
                "all -- lo * 0.0.0.0/0 0.0.0.0/0".to_owned()
            ]
        );

        firewall.delete(Chain::Input, 1).await.unwrap();
        assert_eq!(firewall.rules(Chain::Input).len(), 1);
        assert!(matches!(
            firewall.delete(Chain::Input, 2).await,
            Err(Error::NoSuchRule { number: 2, .. })
        ));
        assert!(matches!(
            firewall.delete(Chain::Input, 0).await,
            Err(Error::NoSuchRule { number: 0, .. })
        ));
    }

    #[tokio::test]
    async fn denied_chains_fail_every_operation() {
        let firewall = MemoryFirewall::new();
        firewall.deny(Chain::Output);
        assert!(firewall.list(Chain::Output).await.is_err());
        assert!(firewall.delete(Chain::Output, 1).await.is_err());
        assert!(firewall.list(Chain::Input).await.is_ok());

        firewall.reject_inserts(true);
        let rule = RuleSpec::Server {
            chain: Chain::Input,
            pid: 1,
            port: 22,
        };
        assert!(firewall.insert(&rule).await.is_err());
        assert!(firewall.rules(Chain::Input).is_empty());
    }

    #[tokio::test]
    async fn rejected_deletes_leave_the_rule_listed() {
        let firewall = MemoryFirewall::new();
        firewall.seed(Chain::Input, "0", "all -- lo * 0.0.0.0/0 0.0.0.0/0");
        firewall.reject_deletes(true);
        assert!(firewall.delete(Chain::Input, 1).await.is_err());
        assert!(firewall.list(Chain::Input).await.is_ok());
        assert_eq!(firewall.rules(Chain::Input).len(), 1);

        firewall.reject_deletes(false);
        firewall.delete(Chain::Input, 1).await.unwrap();
        assert!(firewall.rules(Chain::Input).is_empty());
    }
}
