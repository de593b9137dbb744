#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::columns::Line;
use crate::domain::{Process, ProcessTable};
use crate::error::{CycleStep, Error};
use crate::filter::Filters;
use crate::inspect::{PROCESS_COLUMNS, SystemInspector, USAGE_COLUMNS};
use crate::sink::SnapshotSink;
use crate::sockets::SocketInventory;
use crate::traffic::{Firewall, ReconcileReport, TrafficMonitor};
use crate::units::parse_size;
use config::Config;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub struct Services {
    pub inspector: Box<dyn SystemInspector>,
    pub firewall: Box<dyn Firewall>,
    pub sink: Box<dyn SnapshotSink>,
    pub clock: Box<dyn Clock>,
}

pub enum ControlEvent {
    DumpStatus,
}

/// The outcome of one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub cycle: u64,
    pub processes: Vec<Process>,
    pub traffic: ReconcileReport,
}

impl Snapshot {
    pub fn process(&self, pid: u32) -> Option<&Process> {
        self.processes.iter().find(|p| p.pid == pid)
    }

    pub fn listen_socket_count(&self) -> usize {
        self.processes.iter().map(|p| p.listen_sockets.len()).sum()
    }

    pub fn connection_count(&self) -> usize {
        self.processes.iter().map(|p| p.connections.len()).sum()
    }
}

pub struct ProcessMonitor {
    config: watch::Receiver<Config>,
    services: Services,
    traffic: TrafficMonitor,
    cycle: u64,
    last_snapshot: Option<Snapshot>,
}

impl ProcessMonitor {
    /// The monitor reads the current configuration from `config` at the
    /// start of every cycle.
    pub fn new(config: watch::Receiver<Config>, services: Services) -> Self {
        Self {
            config,
            services,
            traffic: TrafficMonitor::new(),
            cycle: 0,
            last_snapshot: None,
        }
    }

    /// Execute a single enumerate/attach/enrich/account cycle without
    /// sleeping, and publish the result.
    ///
    /// Failures of the first three steps end the cycle with
    /// [`Error::Cycle`]; the previous snapshot stays current. Firewall
    /// failures only leave the affected counters at zero.
    pub async fn tick(&mut self) -> Result<Snapshot, Error> {
        self.cycle = self.cycle.saturating_add(1);
        let config = self.config.borrow().clone();
        let filters = Filters::from_config(&config).map_err(CycleStep::Enumerate.wrap())?;

        let mut table = self
            .enumerate(&filters)
            .await
            .map_err(CycleStep::Enumerate.wrap())?;

        let sockets = self
            .services
            .inspector
            .sockets()
            .await
            .map_err(CycleStep::AttachSockets.wrap())?;
        attach_sockets(&mut table, &SocketInventory::from_lines(&sockets), &filters);

        let usage = self
            .services
            .inspector
            .resource_usage()
            .await
            .map_err(CycleStep::Enrich.wrap())?;
        enrich(&mut table, &usage);

        let traffic = self.account(&mut table).await;

        let snapshot = Snapshot {
            cycle: self.cycle,
            processes: table.into_vec(),
            traffic,
        };
        self.services.sink.publish(&snapshot);
        self.last_snapshot = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Run cycles until the cancellation token is triggered. A failed cycle
    /// is logged and the next one starts on schedule.
    pub async fn run_until(
        &mut self,
        cancel: CancellationToken,
        mut control_rx: mpsc::UnboundedReceiver<ControlEvent>,
    ) {
        loop {
            let tick_start = self.services.clock.now();
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("shutdown requested");
                    return;
                }
                result = self.tick() => {
                    if let Err(err) = result {
                        warn!(cycle = self.cycle, %err, "cycle failed");
                    }
                }
            }

            // Control events are served between cycles so they never cut
            // one short. Whatever queued up during the cycle is served even
            // when the cycle overran its period.
            while let Ok(event) = control_rx.try_recv() {
                self.handle_control(event);
            }
            loop {
                let period = self.config.borrow().monitor.cycle;
                let elapsed = self
                    .services
                    .clock
                    .now()
                    .saturating_duration_since(tick_start);
                let Some(remaining) = period.checked_sub(elapsed).filter(|d| !d.is_zero()) else {
                    break;
                };
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("shutdown requested");
                        return;
                    }
                    Some(event) = control_rx.recv() => {
                        self.handle_control(event);
                    }
                    _ = self.services.clock.sleep(remaining) => break,
                }
            }
        }
    }

    pub fn last_snapshot(&self) -> Option<&Snapshot> {
        self.last_snapshot.as_ref()
    }

    /// Subjects and counters of the last accounting step.
    pub fn traffic(&self) -> &TrafficMonitor {
        &self.traffic
    }

    fn handle_control(&self, event: ControlEvent) {
        match event {
            ControlEvent::DumpStatus => self.dump_status(),
        }
    }

    fn dump_status(&self) {
        let config = self.config.borrow();
        info!(config = ?*config, "current config");
        match &self.last_snapshot {
            Some(snapshot) => info!(
                cycle = snapshot.cycle,
                processes = snapshot.processes.len(),
                listen_sockets = snapshot.listen_socket_count(),
                connections = snapshot.connection_count(),
                subjects = self.traffic.len(),
                firewall_failures = snapshot.traffic.failures.len(),
                "last snapshot"
            ),
            None => info!(cycles = self.cycle, "no snapshot yet"),
        }
    }

    async fn enumerate(&self, filters: &Filters) -> Result<ProcessTable, Error> {
        let lines = self.services.inspector.processes().await?;
        let mut table = ProcessTable::default();

        for line in lines.iter().skip(1).filter(|line| line.len() > 1) {
            let pid = match line.column(2).parse::<u32>() {
                Ok(pid) if pid > 0 => pid,
                _ => {
                    debug!(%line, "skipping process line without a pid");
                    continue;
                }
            };
            let command = match line.column(PROCESS_COLUMNS).text() {
                Ok(command) => command,
                Err(err) => {
                    debug!(pid, %err, "skipping process line without a command");
                    continue;
                }
            };
            if !filters.accepts_command(command) {
                trace!(pid, command, "process filtered out");
                continue;
            }
            if !table.insert(Process::new(pid, command)) {
                debug!(pid, "duplicate pid in process listing");
            }
        }

        debug!(processes = table.len(), "processes enumerated");
        Ok(table)
    }

    /// Register one subject per socket and connection, reconcile, and copy
    /// the counters back.
    async fn account(&mut self, table: &mut ProcessTable) -> ReconcileReport {
        self.traffic.clear();
        for process in table.iter() {
            for socket in &process.listen_sockets {
                self.traffic.add_input(process.pid, socket.port);
            }
            for connection in &process.connections {
                self.traffic
                    .add_client(process.pid, &connection.address, connection.port);
            }
        }

        let report = self
            .traffic
            .reconcile(self.services.firewall.as_ref())
            .await;

        for process in table.iter_mut() {
            let pid = process.pid;
            for socket in &mut process.listen_sockets {
                if let Some((inbound, outbound)) = self.traffic.input_traffic(pid, socket.port) {
                    socket.inbound_bytes = inbound;
                    socket.outbound_bytes = outbound;
                }
            }
            for connection in &mut process.connections {
                if let Some(bytes) =
                    self.traffic
                        .client_traffic(pid, &connection.address, connection.port)
                {
                    connection.bytes = bytes;
                }
            }
        }
        report
    }
}

/// Attach listening sockets first, so the server side of accepted
/// connections can be told apart from outbound ones.
fn attach_sockets(table: &mut ProcessTable, inventory: &SocketInventory, filters: &Filters) {
    for listen in inventory.listening() {
        let Some(process) = table.get_mut(listen.pid) else {
            continue;
        };
        if filters.local_ports.contains(listen.bind_port) {
            debug!(pid = listen.pid, port = listen.bind_port, "listen port excluded");
            continue;
        }
        process.add_listen_socket(listen.bind_port);
    }

    for conn in inventory.established() {
        let Some(process) = table.get_mut(conn.pid) else {
            continue;
        };
        if process.is_listening(conn.local_port) {
            continue;
        }
        if filters.local_ports.contains(conn.local_port)
            || filters.remote_ports.contains(conn.remote_port)
        {
            debug!(
                pid = conn.pid,
                local_port = conn.local_port,
                remote_port = conn.remote_port,
                "connection excluded"
            );
            continue;
        }
        process.add_connection(&conn.remote_address, conn.remote_port);
    }
}

fn enrich(table: &mut ProcessTable, lines: &[Line]) {
    for line in lines.iter().filter(|line| line.len() == USAGE_COLUMNS) {
        let Ok(pid) = line.column(1).parse::<u32>() else {
            continue;
        };
        let Some(process) = table.get_mut(pid) else {
            continue;
        };

        match cpu_usage(line) {
            Ok(cpu) => process.cpu = cpu,
            Err(err) => debug!(pid, %err, "rejecting cpu usage"),
        }
        match virtual_memory(line) {
            Ok(bytes) => process.virtual_memory = bytes,
            Err(err) => debug!(pid, %err, "rejecting memory size"),
        }
    }
}

fn cpu_usage(line: &Line) -> Result<f32, Error> {
    let text = line.column(9).text()?;
    let cpu: f32 = line.column(9).parse()?;
    if cpu.is_finite() && cpu >= 0.0 {
        Ok(cpu)
    } else {
        Err(crate::columns::FieldError::Parse {
            text: text.to_owned(),
            target: "cpu percentage",
        }
        .into())
    }
}

fn virtual_memory(line: &Line) -> Result<u64, Error> {
    Ok(parse_size(line.column(5).text()?)?)
}
