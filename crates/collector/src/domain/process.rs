#![forbid(unsafe_code)]

use std::fmt;

/// A monitored process and what it does on the network.
#[derive(Debug, Clone, PartialEq)]
pub struct Process {
    pub pid: u32,
    pub command: String,
    /// CPU usage in percent of one core.
    pub cpu: f32,
    /// Virtual memory size in bytes.
    pub virtual_memory: u64,
    pub listen_sockets: Vec<ListenSocket>,
    pub connections: Vec<ClientConnection>,
}

impl Process {
    pub fn new(pid: u32, command: impl Into<String>) -> Self {
        Self {
            pid,
            command: command.into(),
            cpu: 0.0,
            virtual_memory: 0,
            listen_sockets: Vec::new(),
            connections: Vec::new(),
        }
    }

    /// Record a listening port. Returns `false` if it was already known.
    pub fn add_listen_socket(&mut self, port: u16) -> bool {
        if self.is_listening(port) {
            return false;
        }
        self.listen_sockets.push(ListenSocket::new(port));
        true
    }

    pub fn is_listening(&self, port: u16) -> bool {
        self.listen_sockets.iter().any(|l| l.port == port)
    }

    /// Record an outbound connection. Returns `false` if one to the same
    /// remote endpoint was already known.
    pub fn add_connection(&mut self, address: &str, port: u16) -> bool {
        if self
            .connections
            .iter()
            .any(|c| c.address == address && c.port == port)
        {
            return false;
        }
        self.connections.push(ClientConnection::new(address, port));
        true
    }
}

/// A port the process accepts connections on, with the traffic through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenSocket {
    pub port: u16,
    pub inbound_bytes: u64,
    pub outbound_bytes: u64,
}

impl ListenSocket {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            inbound_bytes: 0,
            outbound_bytes: 0,
        }
    }
}

impl fmt::Display for ListenSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            ":{} (in: {}, out: {})",
            self.port, self.inbound_bytes, self.outbound_bytes
        )
    }
}

/// An outbound connection and the bytes sent over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConnection {
    pub address: String,
    pub port: u16,
    pub bytes: u64,
}

impl ClientConnection {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            bytes: 0,
        }
    }
}

impl fmt::Display for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (out: {})", self.address, self.port, self.bytes)
    }
}
