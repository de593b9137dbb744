use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Monitor {
    /// Time between the start of two collection cycles. **Measured in
    /// seconds**.
    ///
    /// ## Note
    ///
    /// Every cycle runs `ps`, `lsof`, `top` and several `iptables`
    /// invocations. Setting this too low keeps those tools busy all the time.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub cycle: Duration,

    /// Upper bound on the run time of any single external command. A command
    /// still running after this long is killed and the invocation fails.
    /// **Measured in seconds**.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub command_timeout: Duration,

    /// How often configuration sources are re-read. **Measured in seconds**.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub refresh_interval: Duration,
}

impl Default for Monitor {
    fn default() -> Self {
        Self {
            cycle: Duration::from_secs(10),
            command_timeout: Duration::from_secs(10),
            refresh_interval: Duration::from_secs(25),
        }
    }
}
