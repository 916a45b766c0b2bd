//! Per-connection settings handed to an [`RpcConnector`](crate::RpcConnector).

use std::time::Duration;

/// How messages are delimited on the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportMode {
    /// Every message is prefixed with its length as a 4-byte big-endian integer.
    #[default]
    Framed,
    /// Messages are written to the socket as they are encoded.
    Unframed,
}

/// Settings for opening a single session to a server.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Framed or unframed transport.
    pub transport_mode: TransportMode,
    /// Read/write timeout of the socket. `None` means blocking forever.
    pub socket_timeout: Option<Duration>,
    /// Time allowed for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Idle time after which TCP keepalive packets start. `None` disables keepalive.
    pub tcp_keepalive_interval: Option<Duration>,
    /// Whether to set `TCP_NODELAY`.
    pub tcp_nodelay: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            transport_mode: TransportMode::Framed,
            socket_timeout: Some(Duration::from_millis(500)),
            connect_timeout: Duration::from_secs(5),
            tcp_keepalive_interval: None,
            tcp_nodelay: true,
        }
    }
}
