//! Significant-change detection between market snapshots
//!
//! Decides whether a freshly built snapshot is worth pushing to clients,
//! compared against the last snapshot that was actually broadcast.

use chrono::Duration;
use rust_decimal::Decimal;
use std::collections::HashSet;
use tracker_core::MarketSnapshot;

/// Thresholds for the broadcast decision
#[derive(Debug, Clone)]
pub struct ChangeThresholds {
    /// Symbols held to the tighter price threshold
    pub major_symbols: HashSet<String>,
    /// Relative price move for major symbols, in percent
    pub major_move_pct: Decimal,
    /// Relative price move for every other symbol, in percent
    pub minor_move_pct: Decimal,
    /// Absolute move of the 24h change field, in percentage points
    pub change_24h_delta: Decimal,
    /// Broadcast regardless of movement once this much time has passed
    pub max_silence: Duration,
}

impl Default for ChangeThresholds {
    fn default() -> Self {
        Self {
            major_symbols: ["BTC", "ETH", "BNB"].iter().map(|s| s.to_string()).collect(),
            major_move_pct: Decimal::new(5, 2),
            minor_move_pct: Decimal::new(1, 1),
            change_24h_delta: Decimal::new(5, 1),
            max_silence: Duration::seconds(30),
        }
    }
}

/// Why a snapshot qualified for broadcast
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastReason {
    /// Nothing has been broadcast yet
    FirstSnapshot,
    /// Number of priced symbols differs from the last broadcast
    SymbolSetChanged { previous: usize, current: usize },
    PriceMoved { symbol: String, percent: Decimal },
    DailyChangeMoved { symbol: String, delta: Decimal },
    /// Max silence elapsed
    Heartbeat,
}

#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    thresholds: ChangeThresholds,
}

impl ChangeDetector {
    pub fn new(thresholds: ChangeThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ChangeThresholds {
        &self.thresholds
    }

    pub fn should_broadcast(
        &self,
        previous: Option<&MarketSnapshot>,
        candidate: &MarketSnapshot,
    ) -> bool {
        self.broadcast_reason(previous, candidate).is_some()
    }

    /// First rule that fires, or `None` if the candidate should be held back
    ///
    /// Symbols are matched by name; a symbol missing from `previous` is
    /// ignored here and caught by the symbol-count rule instead.
    pub fn broadcast_reason(
        &self,
        previous: Option<&MarketSnapshot>,
        candidate: &MarketSnapshot,
    ) -> Option<BroadcastReason> {
        let Some(previous) = previous else {
            return Some(BroadcastReason::FirstSnapshot);
        };

        if previous.prices.len() != candidate.prices.len() {
            return Some(BroadcastReason::SymbolSetChanged {
                previous: previous.prices.len(),
                current: candidate.prices.len(),
            });
        }

        for current in &candidate.prices {
            let Some(old) = previous.price_of(&current.symbol) else {
                continue;
            };

            let threshold = if self.thresholds.major_symbols.contains(&current.symbol) {
                self.thresholds.major_move_pct
            } else {
                self.thresholds.minor_move_pct
            };

            // Zero previous price has no defined relative move
            if let Some(percent) = current.percent_change_from(old) {
                if percent > threshold {
                    return Some(BroadcastReason::PriceMoved {
                        symbol: current.symbol.clone(),
                        percent,
                    });
                }
            }

            let delta = (current.change_24h - old.change_24h).abs();
            if delta > self.thresholds.change_24h_delta {
                return Some(BroadcastReason::DailyChangeMoved {
                    symbol: current.symbol.clone(),
                    delta,
                });
            }
        }

        if candidate.taken_at - previous.taken_at > self.thresholds.max_silence {
            return Some(BroadcastReason::Heartbeat);
        }

        None
    }
}
