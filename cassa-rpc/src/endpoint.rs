//! Server endpoints.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

/// Port used when a configured server omits one.
pub const DEFAULT_PORT: u16 = 9160;

/// Address of one server of the cluster, in `host:port` form.
///
/// The address string is the identity of the server: two `ServerAddr`s are equal
/// iff their normalized strings are equal. Cheap to clone.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerAddr {
    addr: Arc<str>,
    port_offset: usize,
}

/// Returned when a configured server address cannot be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid server address {address:?}: {reason}")]
pub struct InvalidServerAddr {
    /// The address as configured.
    pub address: String,
    /// What was wrong with it.
    pub reason: &'static str,
}

impl ServerAddr {
    /// Builds an address from a host and a port.
    pub fn new(host: impl AsRef<str>, port: u16) -> Self {
        let host = host.as_ref();
        let addr = if host.contains(':') && !host.starts_with('[') {
            // Bare IPv6 literal.
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };
        let port_offset = addr.len() - port.to_string().len();
        ServerAddr {
            addr: addr.into(),
            port_offset,
        }
    }

    /// Host part, without brackets around IPv6 literals.
    pub fn host(&self) -> &str {
        let host = &self.addr[..self.port_offset - 1];
        host.strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host)
    }

    /// Port part.
    pub fn port(&self) -> u16 {
        // Validated on construction.
        self.addr[self.port_offset..].parse().unwrap_or(DEFAULT_PORT)
    }

    /// The full `host:port` string.
    pub fn as_str(&self) -> &str {
        &self.addr
    }
}

impl FromStr for ServerAddr {
    type Err = InvalidServerAddr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| InvalidServerAddr {
            address: s.to_owned(),
            reason,
        };
        let s = s.trim();
        if s.is_empty() {
            return Err(invalid("empty address"));
        }

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, after) = rest
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
            match after.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if after.is_empty() => (host, None),
                None => return Err(invalid("garbage after IPv6 literal")),
            }
        } else {
            match s.rsplit_once(':') {
                Some((host, _)) if host.contains(':') => (s, None),
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        let port = match port {
            Some(port) => port.parse().map_err(|_| invalid("port is not a number"))?,
            None => DEFAULT_PORT,
        };
        Ok(ServerAddr::new(host, port))
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr)
    }
}

impl fmt::Debug for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerAddr({})", self.addr)
    }
}
