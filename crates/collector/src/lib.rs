#![forbid(unsafe_code)]

pub mod clock;
pub mod columns;
pub mod domain;
pub mod engine;
pub mod error;
pub mod exec;
pub mod filter;
pub mod inspect;
pub mod sink;
pub mod sockets;
pub mod traffic;
pub mod units;

pub use engine::{ControlEvent, ProcessMonitor, Services, Snapshot};
pub use error::{CycleStep, Error};
pub use exec::{CommandRunner, CommandSpec, SystemRunner};
pub use filter::{CommandFilter, Filters, PortBlacklist};
pub use inspect::{CommandInspector, SystemInspector};
pub use sink::{LogSink, NoopSink, SnapshotSink};
pub use sockets::{EstablishedEntry, ListenEntry, SocketEntry, SocketInventory};
pub use traffic::{
    Chain, Firewall, FirewallAction, FirewallFailure, Iptables, MemoryFirewall, ReconcileReport,
    RuleSpec, RuleTag, SubjectKind, TrafficMonitor,
};

pub use clock::{Clock, SystemClock};
pub use columns::{Field, FieldError, Line};
pub use domain::{ClientConnection, ListenSocket, Process, ProcessTable};
