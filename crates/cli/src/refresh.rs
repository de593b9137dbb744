#![forbid(unsafe_code)]

use config::{Config, ConfigChain};
use std::future;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Load `chain` and publish the result. Returns `false` when no source could
/// be loaded, in which case the current configuration stays in effect.
pub fn reload(chain: &ConfigChain, config_tx: &watch::Sender<Config>) -> bool {
    match chain.load() {
        Ok(loaded) => {
            for (source, err) in &loaded.skipped {
                warn!(source, %err, "config source skipped");
            }
            let changed = config_tx.send_if_modified(|current| {
                if *current == loaded.config {
                    return false;
                }
                *current = loaded.config;
                true
            });
            info!(source = %loaded.source, changed, "config reloaded");
            true
        }
        Err(err) => {
            warn!(%err, "no configuration source could be loaded, keeping the current one");
            false
        }
    }
}

/// Re-read configuration every `monitor.refresh_interval`, and whenever
/// `trigger` fires, until cancelled. A zero interval disables the timer.
pub async fn refresh_config(
    chain: ConfigChain,
    config_tx: watch::Sender<Config>,
    mut trigger: mpsc::UnboundedReceiver<()>,
    cancel: CancellationToken,
) {
    loop {
        let interval = config_tx.borrow().monitor.refresh_interval;
        let timer = async {
            if interval.is_zero() {
                future::pending::<()>().await;
            } else {
                tokio::time::sleep(interval).await;
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(()) = trigger.recv() => debug!("config refresh requested"),
            _ = timer => {}
        }
        reload(&chain, &config_tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{DefaultSource, FileSource, PortSpec};
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn failed_reload_keeps_current_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[port]\nexcludes = [\"22\"]\n").unwrap();

        let chain = ConfigChain::new().with(FileSource(path.clone()));
        let (tx, rx) = watch::channel(Config::default());
        assert!(reload(&chain, &tx));
        assert_eq!(rx.borrow().port.excludes, vec![PortSpec::Single(22)]);

        std::fs::write(&path, "[command]\nincludes = [\"(unclosed\"]\n").unwrap();
        assert!(!reload(&chain, &tx));
        assert_eq!(rx.borrow().port.excludes, vec![PortSpec::Single(22)]);
    }

    #[test]
    fn broken_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[port]\nexcludes = [\"70000\"]\n").unwrap();

        let chain = ConfigChain::new()
            .with(FileSource(path))
            .with(DefaultSource);
        let mut start = Config::default();
        start.command.includes = vec!["java".to_owned()];
        let (tx, rx) = watch::channel(start);

        assert!(reload(&chain, &tx));
        assert_eq!(*rx.borrow(), Config::default());
    }

    #[tokio::test]
    async fn trigger_forces_a_refresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[monitor]\nrefresh_interval = 0\n").unwrap();

        let mut start = Config::default();
        start.monitor.refresh_interval = Duration::ZERO;
        let (tx, mut rx) = watch::channel(start);
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let chain = ConfigChain::new().with(FileSource(path.clone()));
        let task = tokio::spawn(refresh_config(chain, tx, trigger_rx, cancel.clone()));

        std::fs::write(
            &path,
            "[monitor]\nrefresh_interval = 0\n\n[command]\nincludes = [\"nginx\"]\n",
        )
        .unwrap();
        trigger_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("refresh in time")
            .unwrap();
        assert_eq!(rx.borrow().command.includes, vec!["nginx".to_owned()]);

        cancel.cancel();
        task.await.unwrap();
    }
}
