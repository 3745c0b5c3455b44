//! Background health checks.
//!
//! Every tick checks process memory against the cache thresholds, then
//! pings the database link and reconnects when it is down. Ticks run as
//! independent tasks so a slow reconnect never delays the next check;
//! overlapping reconnects are serialized by the connection manager.

use crate::cache::{MemoryStatus, SharedCache};
use crate::config::WatchdogConfig;
use crate::database::ConnectionManager;
use crate::memory::MemoryGauge;
use crate::state::ConnectionPhase;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// What one watchdog tick observed.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub memory: MemoryStatus,
    /// `None` when the link was not checked
    pub alive: Option<bool>,
    /// `Some(true)` when a reconnect was attempted and succeeded
    pub reconnected: Option<bool>,
}

#[derive(Clone)]
struct Checks {
    manager: Arc<ConnectionManager>,
    cache: SharedCache,
    gauge: Arc<dyn MemoryGauge>,
    memory_warning_mb: u64,
    memory_critical_mb: u64,
}

impl Checks {
    async fn run(&self) -> TickReport {
        let memory = self.cache.report_memory_pressure(
            self.gauge.as_ref(),
            self.memory_critical_mb,
            self.memory_warning_mb,
        );

        let phase = self.manager.phase();
        if !matches!(phase, ConnectionPhase::Connected | ConnectionPhase::Reconnecting) {
            debug!("Skipping liveness check while {}", phase);
            return TickReport {
                memory,
                alive: None,
                reconnected: None,
            };
        }

        let alive = self.manager.is_alive().await;
        if alive {
            if phase == ConnectionPhase::Reconnecting {
                self.manager.mark_link_restored();
            }
            return TickReport {
                memory,
                alive: Some(true),
                reconnected: None,
            };
        }

        self.manager.mark_link_lost("disconnected");
        let reconnected = match self.manager.reconnect().await {
            Ok(()) => true,
            Err(e) => {
                if self.manager.phase() == ConnectionPhase::Failed {
                    error!("Automatic reconnection has stopped: {}", e);
                }
                false
            }
        };

        TickReport {
            memory,
            alive: Some(false),
            reconnected: Some(reconnected),
        }
    }
}

/// Fixed-interval memory and liveness checks.
pub struct Watchdog {
    checks: Checks,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Watchdog {
    pub fn new(
        manager: Arc<ConnectionManager>,
        cache: SharedCache,
        gauge: Arc<dyn MemoryGauge>,
        config: &WatchdogConfig,
    ) -> Self {
        Self {
            checks: Checks {
                manager,
                cache,
                gauge,
                memory_warning_mb: config.memory_warning_mb,
                memory_critical_mb: config.memory_critical_mb,
            },
            interval: config.interval,
            task: Mutex::new(None),
        }
    }

    /// Start ticking. A running watchdog is replaced.
    pub fn start(&self) {
        let checks = self.checks.clone();
        let period = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let checks = checks.clone();
                tokio::spawn(async move {
                    checks.run().await;
                });
            }
        });

        if let Some(previous) = self.task.lock().replace(task) {
            previous.abort();
            debug!("Replaced running watchdog");
        }
        info!("Watchdog started (every {:?})", period);
    }

    /// Stop ticking. Returns `false` when it was not running.
    pub fn stop(&self) -> bool {
        match self.task.lock().take() {
            Some(task) => {
                task.abort();
                info!("Watchdog stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Run one round of checks now.
    pub async fn tick(&self) -> TickReport {
        let report = self.checks.run().await;
        if report.memory.critical {
            warn!("Watchdog cleared the cache under memory pressure");
        }
        report
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MetadataCache, Namespace};
    use crate::config::ConnectionConfig;
    use crate::memory::{FixedMemoryGauge, MemorySample};
    use crate::state::new_shared_state;
    use crate::testing::{FakeConnector, FakeStore};
    use std::sync::atomic::Ordering;

    struct Fixture {
        watchdog: Watchdog,
        manager: Arc<ConnectionManager>,
        connector: Arc<FakeConnector>,
        store: Arc<FakeStore>,
        cache: SharedCache,
    }

    async fn fixture(used_mb: u64) -> Fixture {
        let store = FakeStore::new().with_database("shop");
        let connector = FakeConnector::new(store.clone());
        let cache = Arc::new(MetadataCache::new());
        let manager = Arc::new(ConnectionManager::new(
            connector.clone(),
            ConnectionConfig {
                uri: "mongodb://host:27017/shop".to_string(),
                options: Default::default(),
            },
            new_shared_state(),
            cache.clone(),
        ));
        manager.connect().await.unwrap();

        let gauge = Arc::new(FixedMemoryGauge(MemorySample {
            used_mb,
            total_mb: 4_096,
        }));
        let config = WatchdogConfig {
            interval: Duration::from_secs(30),
            memory_warning_mb: 1_500,
            memory_critical_mb: 2_000,
        };
        let watchdog = Watchdog::new(manager.clone(), cache.clone(), gauge, &config);

        Fixture {
            watchdog,
            manager,
            connector,
            store,
            cache,
        }
    }

    #[tokio::test]
    async fn test_healthy_tick() {
        let f = fixture(100).await;
        let report = f.watchdog.tick().await;

        assert_eq!(report.alive, Some(true));
        assert_eq!(report.reconnected, None);
        assert!(!report.memory.warning);
        assert_eq!(f.connector.calls(), 1);
    }

    #[tokio::test]
    async fn test_tick_clears_cache_under_pressure() {
        let f = fixture(2_500).await;
        f.cache.set(Namespace::Stats, "shop.orders", 1_u32);

        let report = f.watchdog.tick().await;

        assert!(report.memory.critical);
        assert!(f.cache.is_empty());
    }

    #[tokio::test]
    async fn test_tick_reconnects_lost_link() {
        let f = fixture(100).await;
        f.store.kill();
        f.connector.replace_store(FakeStore::new().with_database("shop"));

        let report = f.watchdog.tick().await;

        assert_eq!(report.alive, Some(false));
        assert_eq!(report.reconnected, Some(true));
        assert_eq!(f.manager.phase(), ConnectionPhase::Connected);
        assert_eq!(f.manager.retry_count(), 0);
        assert_eq!(f.store.close_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tick_restores_link_that_answers_again() {
        let f = fixture(100).await;
        f.connector
            .notify_link_lost("heartbeat to host:27017 failed: timed out");
        assert_eq!(f.manager.phase(), ConnectionPhase::Reconnecting);

        let report = f.watchdog.tick().await;

        assert_eq!(report.alive, Some(true));
        assert_eq!(report.reconnected, None);
        assert_eq!(f.manager.phase(), ConnectionPhase::Connected);
        assert_eq!(f.connector.calls(), 1);
    }

    #[tokio::test]
    async fn test_tick_skips_failed_link() {
        let f = fixture(100).await;
        f.store.kill();
        f.connector.set_unreachable(true);

        for _ in 0..11 {
            f.watchdog.tick().await;
        }
        assert_eq!(f.manager.phase(), ConnectionPhase::Failed);
        let calls = f.connector.calls();

        let report = f.watchdog.tick().await;
        assert_eq!(report.alive, None);
        assert_eq!(f.connector.calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_drives_reconnect() {
        let f = fixture(100).await;
        f.watchdog.start();
        assert!(f.watchdog.is_running());

        f.store.kill();
        f.connector.replace_store(FakeStore::new().with_database("shop"));

        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(f.connector.calls(), 2);
        assert_eq!(f.manager.phase(), ConnectionPhase::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_replaces_and_stop_is_idempotent() {
        let f = fixture(100).await;
        f.watchdog.start();
        f.watchdog.start();
        assert!(f.watchdog.is_running());

        assert!(f.watchdog.stop());
        assert!(!f.watchdog.stop());
        assert!(!f.watchdog.is_running());

        f.store.kill();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(f.connector.calls(), 1);
    }
}
