use clap::Parser;
use collector::traffic::{Firewall, Iptables, MemoryFirewall};
use collector::{
    CommandInspector, ControlEvent, LogSink, ProcessMonitor, Services, SystemClock, SystemRunner,
};
use config::{ConfigChain, DefaultSource, FileSource, MergedSource};
use procnet::{
    cli::Cli,
    refresh::refresh_config,
    signals::{SignalEvent, wait_for_signal},
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const CONFIG_DIR: &str = "/etc/procnet";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // NOTE: The verbosity flag takes precedence over the environment variable
    // for log control. For example, `PROCNET_LOG=warn procnet -vvv` will
    // still log at the trace level. The environment variable (`PROCNET_LOG`)
    // can only set the log level per crate, not override the verbosity flag.
    // Eg. `PROCNET_LOG=collector=warn procnet -vvv` will log at the trace
    // level for all crates except `collector`.
    let env_filter = EnvFilter::builder()
        .with_env_var("PROCNET_LOG")
        .from_env()?
        .add_directive(cli.verbosity.log_level_filter().as_str().parse()?);

    let layer = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter)
        .init();

    // load config
    let chain = config_chain(&cli)?;
    let loaded = chain.load()?;
    for (source, err) in &loaded.skipped {
        warn!(source, %err, "config source skipped");
    }
    info!(source = %loaded.source, "config loaded");
    debug!(config = ?loaded.config, ?cli);

    let runner = Arc::new(SystemRunner::new(loaded.config.monitor.command_timeout));
    let firewall: Box<dyn Firewall> = if cli.dry_run {
        info!("dry run, iptables is left untouched");
        Box::new(MemoryFirewall::new())
    } else {
        Box::new(Iptables::new(runner.clone()))
    };

    let (config_tx, config_rx) = watch::channel(loaded.config);
    let services = Services {
        inspector: Box::new(CommandInspector::new(runner)),
        firewall,
        sink: Box::new(LogSink),
        clock: Box::new(SystemClock),
    };
    let mut monitor = ProcessMonitor::new(config_rx, services);

    if cli.once {
        monitor.tick().await?;
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();

    // install signal handlers
    let (signals_tx, mut signals_rx) = mpsc::unbounded_channel();
    let signal_handle = tokio::spawn(wait_for_signal(signals_tx));

    let dispatch_cancel = cancel.clone();
    let dispatch_handle = tokio::spawn(async move {
        while let Some(event) = signals_rx.recv().await {
            match event {
                SignalEvent::Shutdown => dispatch_cancel.cancel(),
                SignalEvent::DumpStatus => {
                    let _ = control_tx.send(ControlEvent::DumpStatus);
                }
                SignalEvent::RefreshConfig => {
                    let _ = refresh_tx.send(());
                }
            }
        }
    });

    let refresh_handle = tokio::spawn(refresh_config(chain, config_tx, refresh_rx, cancel.clone()));

    monitor.run_until(cancel.clone(), control_rx).await;

    cancel.cancel();
    refresh_handle.await?;
    dispatch_handle.abort();
    signal_handle.abort();
    match signal_handle.await {
        Ok(Err(err)) => error!(%err, "error happened during handling signals"),
        Ok(Ok(())) | Err(_) => {}
    }
    Ok(())
}

fn config_chain(cli: &Cli) -> anyhow::Result<ConfigChain> {
    let chain = match &cli.config {
        Some(path) => ConfigChain::new().with(FileSource(path.clone())),
        None => {
            let mut candidates = glob::glob(&format!("{CONFIG_DIR}/config.d/*.toml"))?
                .filter_map(Result::ok)
                .collect::<Vec<_>>();
            candidates.sort();
            candidates.insert(0, format!("{CONFIG_DIR}/config.toml").into());
            trace!(?candidates, "config file candidates");
            ConfigChain::new().with(MergedSource(candidates))
        }
    };
    Ok(chain.with(DefaultSource))
}
