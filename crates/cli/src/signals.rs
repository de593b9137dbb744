#![forbid(unsafe_code)]

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// SIGINT or SIGTERM.
    Shutdown,
    /// SIGUSR1: log the current configuration and the last snapshot.
    DumpStatus,
    /// SIGHUP: re-read configuration sources now.
    RefreshConfig,
}

/// Forward process signals as [`SignalEvent`]s until the receiver is gone.
pub async fn wait_for_signal(tx: mpsc::UnboundedSender<SignalEvent>) -> std::io::Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut user1 = signal(SignalKind::user_defined1())?;
    let mut hangup = signal(SignalKind::hangup())?;

    loop {
        let event = tokio::select! {
            _ = interrupt.recv() => SignalEvent::Shutdown,
            _ = terminate.recv() => SignalEvent::Shutdown,
            _ = user1.recv() => SignalEvent::DumpStatus,
            _ = hangup.recv() => SignalEvent::RefreshConfig,
        };
        debug!(?event, "received signal");
        if tx.send(event).is_err() {
            return Ok(());
        }
    }
}
