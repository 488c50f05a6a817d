//! Port reservation for bridge children.
//!
//! Ports are handed out lowest-first from a contiguous range. A released
//! port drains for ten seconds before another server may take it; the
//! previous owner can reclaim its port immediately, which keeps fast
//! restarts on the same port and avoids `EADDRINUSE` for everyone else.

use std::collections::HashMap;
use std::time::Duration;

use mcpgate_core::PortPoolStats;
use tokio::time::Instant;
use tracing::debug;

/// How long a released port is reserved for its previous owner.
pub const REUSE_COOLDOWN: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct DrainEntry {
    owner: String,
    until: Instant,
}

/// Reservation state over the configured `[start, end]` range.
#[derive(Debug)]
pub struct PortPool {
    start: u16,
    end: u16,
    by_id: HashMap<String, u16>,
    draining: HashMap<u16, DrainEntry>,
}

impl PortPool {
    /// Create a pool over the inclusive range `[start, end]`.
    #[must_use]
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            start,
            end,
            by_id: HashMap::new(),
            draining: HashMap::new(),
        }
    }

    /// Allocate a port for `server_id`.
    ///
    /// Idempotent: an id that already holds a port gets the same port back.
    /// An id whose port is still draining reclaims it. Otherwise the lowest
    /// free port wins. Returns `None` when the range is exhausted.
    pub fn allocate(&mut self, server_id: &str) -> Option<u16> {
        if let Some(port) = self.by_id.get(server_id) {
            return Some(*port);
        }

        self.purge_expired();

        // Reclaim a port this id released within the cooldown.
        let reclaimed = self
            .draining
            .iter()
            .find(|(_, entry)| entry.owner == server_id)
            .map(|(port, _)| *port);
        if let Some(port) = reclaimed {
            self.draining.remove(&port);
            self.by_id.insert(server_id.to_string(), port);
            debug!(server_id = %server_id, port = %port, "reclaimed draining port");
            return Some(port);
        }

        let allocated: Vec<u16> = self.by_id.values().copied().collect();
        for port in self.start..=self.end {
            if allocated.contains(&port) || self.draining.contains_key(&port) {
                continue;
            }
            self.by_id.insert(server_id.to_string(), port);
            debug!(server_id = %server_id, port = %port, "allocated port");
            return Some(port);
        }

        None
    }

    /// Release the port held by `server_id`, starting its drain period.
    pub fn release(&mut self, server_id: &str) {
        if let Some(port) = self.by_id.remove(server_id) {
            self.draining.insert(
                port,
                DrainEntry {
                    owner: server_id.to_string(),
                    until: Instant::now() + REUSE_COOLDOWN,
                },
            );
            debug!(server_id = %server_id, port = %port, "released port, draining");
        }
    }

    /// Whether `port` is inside the range and neither held nor draining.
    pub fn is_available(&mut self, port: u16) -> bool {
        if port < self.start || port > self.end {
            return false;
        }
        self.purge_expired();
        !self.by_id.values().any(|p| *p == port) && !self.draining.contains_key(&port)
    }

    /// The port currently held by `server_id`, if any.
    #[must_use]
    pub fn port_of(&self, server_id: &str) -> Option<u16> {
        self.by_id.get(server_id).copied()
    }

    /// Current `(server_id, port)` pairs, sorted by port.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, u16)> {
        let mut entries: Vec<(String, u16)> = self
            .by_id
            .iter()
            .map(|(id, port)| (id.clone(), *port))
            .collect();
        entries.sort_by_key(|(_, port)| *port);
        entries
    }

    /// Pool statistics for the status report.
    pub fn stats(&mut self) -> PortPoolStats {
        self.purge_expired();
        let total = usize::from(self.end - self.start) + 1;
        let allocated = self.by_id.len();
        let draining = self.draining.len();
        PortPoolStats {
            range_start: self.start,
            range_end: self.end,
            total,
            allocated,
            draining,
            free: total.saturating_sub(allocated + draining),
        }
    }

    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.draining.retain(|_, entry| entry.until > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{Duration, advance};

    #[tokio::test(start_paused = true)]
    async fn allocates_lowest_first() {
        let mut pool = PortPool::new(4000, 4005);
        assert_eq!(pool.allocate("a"), Some(4000));
        assert_eq!(pool.allocate("b"), Some(4001));
        assert_eq!(pool.allocate("c"), Some(4002));
    }

    #[tokio::test(start_paused = true)]
    async fn allocate_is_idempotent_per_id() {
        let mut pool = PortPool::new(4000, 4005);
        assert_eq!(pool.allocate("a"), Some(4000));
        assert_eq!(pool.allocate("a"), Some(4000));
        assert_eq!(pool.stats().allocated, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn released_port_is_withheld_from_others_during_cooldown() {
        let mut pool = PortPool::new(4000, 4001);
        assert_eq!(pool.allocate("a"), Some(4000));
        pool.release("a");

        // Another id must not see 4000 yet.
        assert_eq!(pool.allocate("b"), Some(4001));
        assert!(!pool.is_available(4000));

        advance(REUSE_COOLDOWN + Duration::from_millis(1)).await;
        assert!(pool.is_available(4000));
        assert_eq!(pool.allocate("c"), Some(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn previous_owner_reclaims_draining_port() {
        let mut pool = PortPool::new(4000, 4005);
        assert_eq!(pool.allocate("a"), Some(4000));
        pool.release("a");
        // Same id, within cooldown: same port.
        assert_eq!(pool.allocate("a"), Some(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn range_of_one_exhausts_then_recovers() {
        let mut pool = PortPool::new(4000, 4000);
        assert_eq!(pool.allocate("a"), Some(4000));
        assert_eq!(pool.allocate("b"), None);

        pool.release("a");
        assert_eq!(pool.allocate("b"), None);

        advance(REUSE_COOLDOWN + Duration::from_millis(1)).await;
        assert_eq!(pool.allocate("b"), Some(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn stats_track_allocated_and_draining() {
        let mut pool = PortPool::new(4000, 4009);
        pool.allocate("a");
        pool.allocate("b");
        pool.release("a");

        let stats = pool.stats();
        assert_eq!(stats.total, 10);
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.draining, 1);
        assert_eq!(stats.free, 8);

        advance(REUSE_COOLDOWN + Duration::from_millis(1)).await;
        let stats = pool.stats();
        assert_eq!(stats.draining, 0);
        assert_eq!(stats.free, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_are_sorted_by_port() {
        let mut pool = PortPool::new(4000, 4005);
        pool.allocate("b");
        pool.allocate("a");
        let entries = pool.entries();
        assert_eq!(entries[0].1, 4000);
        assert_eq!(entries[1].1, 4001);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_ports_are_never_available() {
        let mut pool = PortPool::new(4000, 4005);
        assert!(!pool.is_available(3999));
        assert!(!pool.is_available(4006));
        assert!(pool.is_available(4003));
    }
}
