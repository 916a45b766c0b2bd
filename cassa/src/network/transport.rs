//! A blocking TCP transport for wire-protocol implementations.
//!
//! An [`RpcConnector`](cassa_rpc::RpcConnector) that speaks the real protocol
//! can run its codec on top of [`TcpTransport`]: it gets connect timeouts,
//! socket timeouts, keepalive and message framing configured from the same
//! [`ConnectionConfig`] the rest of the client uses.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use cassa_rpc::errors::ConnectionError;
use cassa_rpc::{ConnectionConfig, ServerAddr, TransportMode};
use socket2::{SockRef, TcpKeepalive};
use tracing::trace;

/// Largest frame accepted from a server.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16_384_000;

/// A connected socket, framed or unframed.
///
/// In framed mode writes are buffered until [`flush`](Write::flush), which sends
/// the buffer as a single frame prefixed with its length (4 bytes, big endian).
/// Reads consume one frame at a time. In unframed mode bytes pass through.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    server: ServerAddr,
    mode: TransportMode,
    max_frame_size: usize,
    write_buf: BytesMut,
    read_buf: Bytes,
}

impl TcpTransport {
    /// Connects to `server`, trying each resolved address within the connect timeout.
    pub fn connect(server: &ServerAddr, config: &ConnectionConfig) -> Result<Self, ConnectionError> {
        let addrs: Vec<SocketAddr> = (server.host(), server.port())
            .to_socket_addrs()
            .map_err(|_| ConnectionError::AddressResolution(server.clone()))?
            .collect();
        if addrs.is_empty() {
            return Err(ConnectionError::AddressResolution(server.clone()));
        }

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(stream) => {
                    return Self::from_stream(stream, server, config)
                        .map_err(|err| ConnectionError::io(server, err));
                }
                Err(err) => {
                    trace!(server = %server, %addr, error = %err, "Connect attempt failed");
                    last_error = Some(err);
                }
            }
        }
        let err = last_error.unwrap_or_else(|| io::ErrorKind::AddrNotAvailable.into());
        Err(ConnectionError::io(server, err))
    }

    fn from_stream(
        stream: TcpStream,
        server: &ServerAddr,
        config: &ConnectionConfig,
    ) -> io::Result<Self> {
        stream.set_nodelay(config.tcp_nodelay)?;
        stream.set_read_timeout(config.socket_timeout)?;
        stream.set_write_timeout(config.socket_timeout)?;
        if let Some(tcp_keepalive_interval) = config.tcp_keepalive_interval {
            Self::setup_tcp_keepalive(&stream, tcp_keepalive_interval)?;
        }
        Ok(TcpTransport {
            stream,
            server: server.clone(),
            mode: config.transport_mode,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            write_buf: BytesMut::new(),
            read_buf: Bytes::new(),
        })
    }

    fn setup_tcp_keepalive(stream: &TcpStream, tcp_keepalive_interval: Duration) -> io::Result<()> {
        // Our interval is the idle time before the first keepalive packet, which socket2 calls
        // "time". Its "interval" is the time between keepalive packets.
        let mut tcp_keepalive = TcpKeepalive::new().with_time(tcp_keepalive_interval);

        #[cfg(any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "fuchsia",
            target_os = "illumos",
            target_os = "ios",
            target_os = "linux",
            target_os = "macos",
            target_os = "netbsd",
            target_os = "tvos",
            target_os = "watchos",
            target_os = "windows",
        ))]
        {
            tcp_keepalive = tcp_keepalive.with_interval(Duration::from_secs(1));
        }

        #[cfg(any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "fuchsia",
            target_os = "illumos",
            target_os = "ios",
            target_os = "linux",
            target_os = "macos",
            target_os = "netbsd",
            target_os = "tvos",
            target_os = "watchos",
        ))]
        {
            tcp_keepalive = tcp_keepalive.with_retries(10);
        }

        let sf = SockRef::from(stream);
        sf.set_tcp_keepalive(&tcp_keepalive)
    }

    /// Sets the largest frame accepted from the server.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// The server this transport is connected to.
    pub fn server(&self) -> &ServerAddr {
        &self.server
    }

    /// Framed or unframed.
    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    /// Shuts the socket down in both directions.
    pub fn shutdown(&self) -> io::Result<()> {
        self.stream.shutdown(std::net::Shutdown::Both)
    }

    fn read_frame(&mut self) -> io::Result<()> {
        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Frame of {len} bytes exceeds the limit of {} bytes", self.max_frame_size),
            ));
        }
        let mut frame = vec![0u8; len];
        self.stream.read_exact(&mut frame)?;
        self.read_buf = Bytes::from(frame);
        Ok(())
    }
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.mode == TransportMode::Unframed {
            return self.stream.read(buf);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        while !self.read_buf.has_remaining() {
            self.read_frame()?;
        }
        let n = buf.len().min(self.read_buf.remaining());
        self.read_buf.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.mode {
            TransportMode::Unframed => self.stream.write(buf),
            TransportMode::Framed => {
                self.write_buf.extend_from_slice(buf);
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.mode == TransportMode::Framed && !self.write_buf.is_empty() {
            let len = u32::try_from(self.write_buf.len()).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "frame larger than 4GiB")
            })?;
            let mut frame = BytesMut::with_capacity(4 + self.write_buf.len());
            frame.put_u32(len);
            frame.extend_from_slice(&self.write_buf);
            self.write_buf.clear();
            self.stream.write_all(&frame)?;
        }
        self.stream.flush()
    }
}
