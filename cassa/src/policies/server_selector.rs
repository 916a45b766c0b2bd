//! Choosing the server a new connection goes to.

use std::sync::atomic::{AtomicUsize, Ordering};

use cassa_rpc::ServerAddr;

/// Order in which servers are handed out for new connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServerOrder {
    /// Every new connection goes to the server after the one used last.
    #[default]
    RoundRobin,
    /// New connections go to the first server of the configured list; later
    /// servers are used only when failing over.
    Ordered,
}

/// Hands out servers from the configured list.
///
/// The cursor is shared by every caller of one selector, so concurrent callers
/// are spread over the servers too.
#[derive(Debug)]
pub struct ServerSelector {
    servers: Vec<ServerAddr>,
    order: ServerOrder,
    cursor: AtomicUsize,
}

impl ServerSelector {
    /// Creates a selector over a non-empty server list.
    pub fn new(servers: Vec<ServerAddr>, order: ServerOrder) -> Self {
        ServerSelector {
            servers,
            order,
            cursor: AtomicUsize::new(0),
        }
    }

    /// The configured servers, in configuration order.
    pub fn servers(&self) -> &[ServerAddr] {
        &self.servers
    }

    /// Configured ordering.
    pub fn order(&self) -> ServerOrder {
        self.order
    }

    /// Returns the next server.
    pub fn next_server(&self) -> Option<&ServerAddr> {
        if self.servers.is_empty() {
            return None;
        }
        let idx = match self.order {
            ServerOrder::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed) % self.servers.len(),
            ServerOrder::Ordered => 0,
        };
        self.servers.get(idx)
    }

    /// Returns the next server not present in `tried`, or `None` if all of them are.
    pub fn next_server_excluding(&self, tried: &[ServerAddr]) -> Option<&ServerAddr> {
        match self.order {
            ServerOrder::RoundRobin => {
                // At most one full lap. Concurrent callers may advance the cursor
                // meanwhile, which only shifts the starting point.
                for _ in 0..self.servers.len() {
                    let candidate = self.next_server()?;
                    if !tried.contains(candidate) {
                        return Some(candidate);
                    }
                }
                self.servers.iter().find(|s| !tried.contains(s))
            }
            ServerOrder::Ordered => self.servers.iter().find(|s| !tried.contains(s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use cassa_rpc::ServerAddr;

    use super::{ServerOrder, ServerSelector};

    fn servers(n: usize) -> Vec<ServerAddr> {
        (1..=n)
            .map(|i| format!("10.0.0.{i}:9160").parse().unwrap())
            .collect()
    }

    #[test]
    fn round_robin_alternates() {
        let selector = ServerSelector::new(servers(2), ServerOrder::RoundRobin);
        let picked: Vec<String> = (0..4)
            .map(|_| selector.next_server().unwrap().to_string())
            .collect();
        assert_eq!(
            picked,
            ["10.0.0.1:9160", "10.0.0.2:9160", "10.0.0.1:9160", "10.0.0.2:9160"]
        );
    }

    #[test]
    fn ordered_always_starts_with_first() {
        let list = servers(3);
        let selector = ServerSelector::new(list.clone(), ServerOrder::Ordered);
        for _ in 0..3 {
            assert_eq!(selector.next_server(), Some(&list[0]));
        }
        assert_eq!(selector.next_server_excluding(&list[..1]), Some(&list[1]));
        assert_eq!(selector.next_server_excluding(&list[..2]), Some(&list[2]));
        assert_eq!(selector.next_server_excluding(&list), None);
    }

    #[test]
    fn excluding_never_repeats_within_a_cycle() {
        let list = servers(4);
        let selector = ServerSelector::new(list.clone(), ServerOrder::RoundRobin);
        // Move the cursor somewhere in the middle.
        selector.next_server();
        selector.next_server();

        let mut tried = Vec::new();
        while let Some(server) = selector.next_server_excluding(&tried) {
            assert!(!tried.contains(server));
            tried.push(server.clone());
        }
        tried.sort();
        assert_eq!(tried, list);
    }

    #[test]
    fn empty_selector() {
        let selector = ServerSelector::new(Vec::new(), ServerOrder::RoundRobin);
        assert_eq!(selector.next_server(), None);
        assert_eq!(selector.next_server_excluding(&[]), None);
    }
}
