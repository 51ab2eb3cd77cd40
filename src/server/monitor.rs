//! Monitor subscriptions: time-bounded interest in a facility's availability.
//! Duplicates coexist; a subscription is active until its expiry instant or
//! until a callback send fails.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Subscription {
    facility: String,
    endpoint: SocketAddr,
    expires_at: Instant,
}

#[derive(Default)]
pub struct MonitorRegistry {
    subscriptions: Vec<Subscription>,
}

impl MonitorRegistry {
    pub fn new() -> MonitorRegistry {
        MonitorRegistry::default()
    }

    pub fn register(&mut self, facility: &str, endpoint: SocketAddr, duration: Duration) {
        self.subscriptions.push(Subscription {
            facility: facility.to_string(),
            endpoint,
            expires_at: Instant::now() + duration,
        });
    }

    /// Endpoints to notify for `facility`, pruning expired subscriptions on
    /// the way. An endpoint subscribed twice is returned twice.
    pub fn active_endpoints(&mut self, facility: &str) -> Vec<SocketAddr> {
        let now = Instant::now();
        self.subscriptions.retain(|s| s.expires_at > now);
        self.subscriptions
            .iter()
            .filter(|s| s.facility == facility)
            .map(|s| s.endpoint)
            .collect()
    }

    /// Drops every subscription of `endpoint` on `facility`; called when a
    /// callback send returns a transport error.
    pub fn remove(&mut self, facility: &str, endpoint: SocketAddr) {
        self.subscriptions
            .retain(|s| !(s.facility == facility && s.endpoint == endpoint));
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;

    fn endpoint(port: u16) -> SocketAddr {
        SocketAddr::from_str(&format!("127.0.0.1:{}", port)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_and_fan_out_set() {
        let mut registry = MonitorRegistry::new();
        registry.register("Meeting Room A", endpoint(4000), Duration::from_secs(60));
        registry.register("Meeting Room A", endpoint(4001), Duration::from_secs(60));
        registry.register("Conference Hall", endpoint(4002), Duration::from_secs(60));

        assert_eq!(
            registry.active_endpoints("Meeting Room A"),
            vec![endpoint(4000), endpoint(4001)]
        );
        assert_eq!(registry.active_endpoints("Conference Hall"), vec![endpoint(4002)]);
        assert!(registry.active_endpoints("Seminar Room B").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_subscriptions_coexist() {
        let mut registry = MonitorRegistry::new();
        registry.register("Meeting Room A", endpoint(4000), Duration::from_secs(60));
        registry.register("Meeting Room A", endpoint(4000), Duration::from_secs(120));

        assert_eq!(
            registry.active_endpoints("Meeting Room A"),
            vec![endpoint(4000), endpoint(4000)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_prunes() {
        let mut registry = MonitorRegistry::new();
        registry.register("Meeting Room A", endpoint(4000), Duration::from_secs(10));
        registry.register("Meeting Room A", endpoint(4001), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(registry.active_endpoints("Meeting Room A"), vec![endpoint(4001)]);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_on_send_failure() {
        let mut registry = MonitorRegistry::new();
        registry.register("Meeting Room A", endpoint(4000), Duration::from_secs(60));
        registry.register("Meeting Room A", endpoint(4000), Duration::from_secs(90));
        registry.register("Conference Hall", endpoint(4000), Duration::from_secs(60));

        registry.remove("Meeting Room A", endpoint(4000));
        assert!(registry.active_endpoints("Meeting Room A").is_empty());
        assert_eq!(registry.active_endpoints("Conference Hall"), vec![endpoint(4000)]);
    }
}
