//! The at-most-once duplicate filter: a memo of reply bytes keyed by
//! (normalized client endpoint, request id).

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::time::Instant;

pub const HISTORY_TTL: Duration = Duration::from_secs(5 * 60);

/// The OS may report the same peer as an IPv4 address or its IPv4-mapped
/// IPv6 form; fold those together so one client never aliases to two keys.
pub fn normalize_endpoint(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V6(v6) => SocketAddr::new(v6.to_canonical(), addr.port()),
        IpAddr::V4(_) => addr,
    }
}

pub struct HistoryCache {
    ttl: Duration,
    entries: FxHashMap<(SocketAddr, u32), (Bytes, Instant)>,
}

impl HistoryCache {
    pub fn new(ttl: Duration) -> HistoryCache {
        HistoryCache {
            ttl,
            entries: FxHashMap::default(),
        }
    }

    pub fn lookup(&self, endpoint: SocketAddr, request_id: u32) -> Option<Bytes> {
        let (reply, inserted_at) = self.entries.get(&(normalize_endpoint(endpoint), request_id))?;
        if inserted_at.elapsed() >= self.ttl {
            return None;
        }
        Some(reply.clone())
    }

    /// Expired entries are swept here rather than by a timer; the cache is
    /// unbounded apart from the TTL.
    pub fn insert(&mut self, endpoint: SocketAddr, request_id: u32, reply: Bytes) {
        let now = Instant::now();
        self.entries.retain(|_, (_, inserted_at)| now.duration_since(*inserted_at) < self.ttl);
        self.entries.insert((normalize_endpoint(endpoint), request_id), (reply, now));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;

    fn endpoint(s: &str) -> SocketAddr {
        SocketAddr::from_str(s).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_hits_and_misses() {
        let mut cache = HistoryCache::new(HISTORY_TTL);
        let peer = endpoint("127.0.0.1:4000");
        cache.insert(peer, 7, Bytes::from_static(b"reply"));

        assert_eq!(cache.lookup(peer, 7), Some(Bytes::from_static(b"reply")));
        assert_eq!(cache.lookup(peer, 8), None);
        assert_eq!(cache.lookup(endpoint("127.0.0.1:4001"), 7), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let mut cache = HistoryCache::new(HISTORY_TTL);
        let peer = endpoint("127.0.0.1:4000");
        cache.insert(peer, 1, Bytes::from_static(b"a"));

        tokio::time::sleep(HISTORY_TTL - Duration::from_secs(1)).await;
        assert!(cache.lookup(peer, 1).is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(cache.lookup(peer, 1).is_none());

        // the sweep on insertion drops the stale entry
        cache.insert(peer, 2, Bytes::from_static(b"b"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ipv4_mapped_endpoint_aliases_to_same_key() {
        let mut cache = HistoryCache::new(HISTORY_TTL);
        cache.insert(endpoint("[::ffff:127.0.0.1]:4000"), 1, Bytes::from_static(b"a"));
        assert!(cache.lookup(endpoint("127.0.0.1:4000"), 1).is_some());
    }
}
