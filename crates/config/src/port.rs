use crate::Error;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::fmt;
use std::str::FromStr;

/// A single port or an inclusive port range, written `"8080"` or
/// `"9000-9999"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub enum PortSpec {
    Single(u16),
    Range(u16, u16),
}

impl PortSpec {
    /// Whether `port` falls under this spec.
    pub fn contains(&self, port: u16) -> bool {
        match *self {
            PortSpec::Single(p) => p == port,
            PortSpec::Range(low, high) => (low..=high).contains(&port),
        }
    }
}

impl FromStr for PortSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidPortSpec(s.to_owned());
        let parse = |p: &str| -> Result<u16, Error> {
            if p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            match p.parse::<u16>() {
                Ok(0) | Err(_) => Err(invalid()),
                Ok(port) => Ok(port),
            }
        };

        match s.trim().split_once('-') {
            None => Ok(PortSpec::Single(parse(s.trim())?)),
            Some((low, high)) => {
                let (low, high) = (parse(low)?, parse(high)?);
                if low > high {
                    return Err(invalid());
                }
                Ok(PortSpec::Range(low, high))
            }
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpec::Single(port) => write!(f, "{port}"),
            PortSpec::Range(low, high) => write!(f, "{low}-{high}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Ports {
    /// Ports excluded from accounting on both ends of a connection.
    pub excludes: Vec<PortSpec>,

    /// Ports excluded only when they are the local (listening or source)
    /// port of a socket.
    pub local_excludes: Vec<PortSpec>,

    /// Ports excluded only when they are the remote port of an outbound
    /// connection.
    pub remote_excludes: Vec<PortSpec>,
}

impl Ports {
    /// Specs that apply to local ports.
    pub fn local(&self) -> impl Iterator<Item = &PortSpec> {
        self.excludes.iter().chain(&self.local_excludes)
    }

    /// Specs that apply to remote ports.
    pub fn remote(&self) -> impl Iterator<Item = &PortSpec> {
        self.excludes.iter().chain(&self.remote_excludes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_single_and_range() {
        assert_eq!("22".parse::<PortSpec>().unwrap(), PortSpec::Single(22));
        assert_eq!(
            "9000-9999".parse::<PortSpec>().unwrap(),
            PortSpec::Range(9000, 9999)
        );
    }

    #[test]
    fn rejects_malformed_specs() {
        for bad in ["", "0", "65536", "-1", "10-", "-10", "20-10", "a-b", "1-2-3", "+5"] {
            assert!(bad.parse::<PortSpec>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn range_is_inclusive() {
        let spec = PortSpec::Range(9000, 9999);
        assert!(spec.contains(9000));
        assert!(spec.contains(9090));
        assert!(spec.contains(9999));
        assert!(!spec.contains(8999));
        assert!(!spec.contains(10000));
    }

    #[test]
    fn shared_excludes_apply_to_both_sides() {
        let ports = Ports {
            excludes: vec![PortSpec::Single(22)],
            local_excludes: vec![PortSpec::Single(80)],
            remote_excludes: vec![PortSpec::Range(1, 10)],
        };
        assert_eq!(ports.local().count(), 2);
        assert_eq!(ports.remote().count(), 2);
        assert!(ports.remote().any(|s| s.contains(22)));
        assert!(!ports.remote().any(|s| s.contains(80)));
    }

    proptest! {
        #[test]
        fn range_membership_matches_bounds(
            low in 1u16..=u16::MAX,
            high in 1u16..=u16::MAX,
            port in 1u16..=u16::MAX,
        ) {
            let text = format!("{low}-{high}");
            match text.parse::<PortSpec>() {
                Ok(spec) => {
                    prop_assert!(low <= high);
                    prop_assert_eq!(spec.contains(port), low <= port && port <= high);
                }
                Err(_) => prop_assert!(low > high),
            }
        }
    }
}
