//! Adaptive broadcast loop
//!
//! Runs for the life of the process. Each tick either idles (no
//! subscribers), builds and conditionally broadcasts a snapshot, or backs
//! off after an aggregation failure. The tick returns how long to sleep
//! before the next one.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracker_core::MarketSnapshot;

use crate::aggregator::SnapshotAggregator;
use crate::change_detector::ChangeDetector;
use crate::registry::SubscriberRegistry;

/// Sleep intervals and failure policy for the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    /// Sleep while nobody is connected
    pub idle_interval: Duration,
    /// Sleep between ticks while clients are connected
    pub active_interval: Duration,
    /// Consecutive failures that trigger the long cooldown
    pub max_consecutive_failures: u32,
    pub failure_cooldown: Duration,
    pub backoff_base: Duration,
    /// Added per consecutive failure
    pub backoff_step: Duration,
    pub backoff_cap: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(15),
            active_interval: Duration::from_secs(3),
            max_consecutive_failures: 5,
            failure_cooldown: Duration::from_secs(30),
            backoff_base: Duration::from_secs(10),
            backoff_step: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Active,
    ErrorBackoff,
}

/// Shared read handle on the loop's current state
#[derive(Debug, Clone)]
pub struct LoopStateHandle {
    state: Arc<RwLock<LoopState>>,
}

impl LoopStateHandle {
    pub fn get(&self) -> LoopState {
        *self.state.read()
    }

    fn set(&self, state: LoopState) {
        *self.state.write() = state;
    }
}

impl Default for LoopStateHandle {
    fn default() -> Self {
        Self {
            state: Arc::new(RwLock::new(LoopState::Idle)),
        }
    }
}

/// Consecutive-failure counter with linear backoff
#[derive(Debug, Clone)]
pub struct FailureBackoff {
    consecutive_failures: u32,
    config: LoopConfig,
}

impl FailureBackoff {
    pub fn new(config: LoopConfig) -> Self {
        Self {
            consecutive_failures: 0,
            config,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Count a failure and return the delay before the next attempt
    ///
    /// Reaching the failure limit yields the cooldown and resets the count.
    pub fn record_failure(&mut self) -> Duration {
        self.consecutive_failures += 1;

        if self.consecutive_failures >= self.config.max_consecutive_failures {
            self.consecutive_failures = 0;
            return self.config.failure_cooldown;
        }

        let delay = self.config.backoff_base + self.config.backoff_step * self.consecutive_failures;
        delay.min(self.config.backoff_cap)
    }
}

/// Shared slot holding the last snapshot that went out to clients
///
/// Only the broadcast loop writes it.
#[derive(Debug, Clone, Default)]
pub struct LastBroadcast {
    slot: Arc<RwLock<Option<Arc<MarketSnapshot>>>>,
}

impl LastBroadcast {
    pub fn get(&self) -> Option<Arc<MarketSnapshot>> {
        self.slot.read().clone()
    }

    fn set(&self, snapshot: Arc<MarketSnapshot>) {
        *self.slot.write() = Some(snapshot);
    }
}

/// Drives snapshot building and fan-out
pub struct BroadcastLoop {
    aggregator: Arc<SnapshotAggregator>,
    registry: Arc<SubscriberRegistry>,
    detector: ChangeDetector,
    last_broadcast: LastBroadcast,
    backoff: FailureBackoff,
    config: LoopConfig,
    state: LoopStateHandle,
}

impl BroadcastLoop {
    pub fn new(
        aggregator: Arc<SnapshotAggregator>,
        registry: Arc<SubscriberRegistry>,
        detector: ChangeDetector,
        config: LoopConfig,
    ) -> Self {
        Self {
            aggregator,
            registry,
            detector,
            last_broadcast: LastBroadcast::default(),
            backoff: FailureBackoff::new(config),
            config,
            state: LoopStateHandle::default(),
        }
    }

    /// Read handle on the last broadcast snapshot
    pub fn last_broadcast(&self) -> LastBroadcast {
        self.last_broadcast.clone()
    }

    pub fn state(&self) -> LoopState {
        self.state.get()
    }

    /// Read handle on the loop state for status reporting
    pub fn state_handle(&self) -> LoopStateHandle {
        self.state.clone()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.backoff.consecutive_failures()
    }

    /// Run one iteration and return the sleep before the next
    pub async fn tick(&mut self) -> Duration {
        if self.registry.is_empty() {
            if self.state.get() != LoopState::Idle {
                info!("No active connections, broadcast loop idling");
            }
            self.state.set(LoopState::Idle);
            return self.config.idle_interval;
        }

        let snapshot = match self.aggregator.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.state.set(LoopState::ErrorBackoff);
                let delay = self.backoff.record_failure();
                error!(
                    "Broadcast tick failed: {} (backing off {:?})",
                    e, delay
                );
                return delay;
            }
        };

        self.backoff.record_success();
        self.state.set(LoopState::Active);

        if snapshot.is_empty() {
            warn!("Empty market data received, skipping broadcast");
            return self.config.active_interval;
        }

        let previous = self.last_broadcast.get();
        match self.detector.broadcast_reason(previous.as_deref(), &snapshot) {
            Some(reason) => {
                debug!("Broadcasting snapshot: {:?}", reason);
                let snapshot = Arc::new(snapshot);
                let report = self
                    .registry
                    .broadcast_snapshot(MarketSnapshot::clone(&snapshot))
                    .await;
                self.last_broadcast.set(snapshot);
                debug!(
                    "Snapshot delivered to {} clients, {} dropped",
                    report.delivered,
                    report.dropped.len()
                );
            }
            None => debug!("No significant change, skipping broadcast"),
        }

        self.config.active_interval
    }

    /// Loop forever
    pub async fn run(mut self) {
        info!(
            "Broadcast loop started (idle {:?}, active {:?})",
            self.config.idle_interval, self.config.active_interval
        );
        loop {
            let delay = self.tick().await;
            tokio::time::sleep(delay).await;
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
