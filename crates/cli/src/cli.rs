use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::path::{Path, PathBuf};

/// procnet: per-process network accounting
///
/// procnet periodically lists processes and their TCP sockets, measures the
/// traffic through each listening port and outbound connection with
/// iptables byte counters, and reports CPU and memory usage alongside.
#[derive(Debug, Parser, Clone)]
#[command(about, long_about, version)]
pub struct Cli {
    /// Path to configuration file.
    ///
    /// If not provided, the default locations are checked. They are
    /// `/etc/procnet/config.toml` and `/etc/procnet/config.d/*.toml`,
    /// where the latter being a glob pattern. If they don't exist, the default
    /// configuration is used.
    #[arg(short, long, value_parser = validate_file)]
    pub config: Option<PathBuf>,

    /// Keep accounting rules in memory instead of changing iptables.
    ///
    /// Processes and sockets are still read from the host; traffic counters
    /// stay at zero.
    #[arg(long)]
    pub dry_run: bool,

    /// Run a single cycle, log its snapshot and exit.
    #[arg(long)]
    pub once: bool,

    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,
}

/// Check if the file exists.
#[inline(always)]
fn validate_file(file: &str) -> Result<PathBuf, String> {
    let path = Path::new(file);
    if path.exists() {
        Ok(path.to_owned())
    } else {
        Err(format!("File not found: {:?}", path))
    }
}
