//! # Cost Engine
//!
//! Turns accepted RTT measurements into advertised link costs.
//!
//! The pipeline for one candidate cost:
//!
//! 1. compute the RTT-based candidate from the measurement history
//! 2. gate on the relative change against the current cost
//! 3. optionally delegate to the registered adaptive calculator
//! 4. re-gate the calculator's output against the current cost
//! 5. rate-limit LSA rebuilds to one per neighbor per rebuild interval;
//!    inside the window the cost still updates, silently
//!
//! Both change gates share the configured threshold. They look redundant
//! but the second one also debounces calculator output, so both stay.

use std::time::Duration;

use crate::calculator::{AdaptiveCalculator, TickContext};
use crate::host::HostServices;
use crate::name::NeighborName;
use crate::store::{LinkStateStore, NeighborStatus};

/// Tolerated divergence between the cost we wrote and the cost the host
/// stores, checked after every write-through.
const VERIFY_TOLERANCE: f64 = 0.02;

/// What `apply_cost_update` did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CostUpdate {
    /// Change too small, neighbor unknown, or neighbor inactive.
    Discarded,
    /// Cost updated inside the rebuild-rate window; no LSA rebuild asked.
    UpdatedSilently(f64),
    /// Cost updated while the neighbor has outstanding hello timeouts;
    /// the rebuild is withheld until the link is stable again.
    UpdatedUnstable(f64),
    /// Cost updated and an adjacency-LSA rebuild plus routing-table
    /// recalculation were requested.
    UpdatedAndRebuilt(f64),
}

/// The cost computation core. Holds at most one adaptive calculator.
pub struct CostEngine {
    max_cost_multiplier: f64,
    cost_change_threshold: f64,
    min_rebuild_interval: Duration,
    calculator: Option<Box<dyn AdaptiveCalculator>>,
    cost_updates: u64,
}

impl CostEngine {
    pub fn new(config: &crate::config::LinkCostConfig) -> Self {
        CostEngine {
            max_cost_multiplier: config.max_cost_multiplier,
            cost_change_threshold: config.cost_change_threshold,
            min_rebuild_interval: config.min_rebuild_interval,
            calculator: None,
            cost_updates: 0,
        }
    }

    // ── Calculator registration ─────────────────────────────────────────

    pub fn set_calculator(&mut self, calculator: Box<dyn AdaptiveCalculator>) {
        tracing::info!(calculator = calculator.name(), "cost calculator registered");
        self.calculator = Some(calculator);
    }

    pub fn clear_calculator(&mut self) {
        if self.calculator.take().is_some() {
            tracing::info!("cost calculator cleared, restored to standard mode");
        }
    }

    pub fn has_calculator(&self) -> bool {
        self.calculator.is_some()
    }

    pub fn calculator_name(&self) -> Option<&'static str> {
        self.calculator.as_deref().map(AdaptiveCalculator::name)
    }

    /// Number of cost updates that reached the write-through path.
    pub fn cost_updates(&self) -> u64 {
        self.cost_updates
    }

    // ── Feedback path ───────────────────────────────────────────────────

    /// Forward a link-performance observation to the registered calculator.
    pub fn publish_feedback(&mut self, neighbor: &NeighborName, performance: f64, ctx: &TickContext) {
        if let Some(calculator) = self.calculator.as_mut() {
            tracing::debug!(%neighbor, performance, "publishing link performance feedback");
            calculator.observe(neighbor, performance, ctx);
        }
    }

    // ── Cost computation ────────────────────────────────────────────────

    /// RTT-based candidate cost for `neighbor`.
    ///
    /// Returns `None` when the neighbor does not participate (unknown or
    /// INACTIVE). An ACTIVE neighbor with no measurements keeps its
    /// original cost.
    pub fn compute_rtt_based_cost(
        &self,
        store: &LinkStateStore,
        neighbor: &NeighborName,
    ) -> Option<f64> {
        let link = store.get(neighbor)?;
        if link.status == NeighborStatus::Inactive {
            tracing::debug!(%neighbor, "INACTIVE neighbor, skipping cost calculation");
            return None;
        }

        let Some(avg_rtt) = link.average_rtt() else {
            return Some(link.original_cost as f64);
        };

        let avg_ms = avg_rtt.as_millis() as f64;
        let rtt_factor = (1.0 + avg_ms / 100.0).ln();
        let cost = link.original_cost as f64 * (1.0 + rtt_factor);
        let capped = cost.min(link.original_cost as f64 * self.max_cost_multiplier);
        Some(capped.round())
    }

    /// Whether `candidate` differs enough from the current cost to be
    /// worth applying.
    pub fn should_update(
        &self,
        store: &LinkStateStore,
        neighbor: &NeighborName,
        candidate: f64,
    ) -> bool {
        let Some(link) = store.get(neighbor) else {
            return false;
        };
        let change_ratio = (candidate - link.current_cost).abs() / link.current_cost;
        change_ratio >= self.cost_change_threshold
    }

    /// Apply a candidate cost: delegate to the calculator, re-gate, rate
    /// limit, write through to the host, and trigger rebuilds when allowed.
    pub fn apply_cost_update(
        &mut self,
        store: &mut LinkStateStore,
        neighbor: &NeighborName,
        candidate: f64,
        ctx: &TickContext,
        host: &mut dyn HostServices,
    ) -> CostUpdate {
        let Some(snapshot) = store.snapshot(neighbor, ctx.now) else {
            return CostUpdate::Discarded;
        };
        if snapshot.status == NeighborStatus::Inactive {
            tracing::debug!(%neighbor, "skipping cost update for INACTIVE neighbor");
            return CostUpdate::Discarded;
        }

        let mut final_cost = candidate;
        if let Some(calculator) = self.calculator.as_mut() {
            let adjusted = calculator.adjust(neighbor, candidate, &snapshot, ctx);
            if adjusted.is_finite() && adjusted > 0.0 {
                tracing::debug!(
                    %neighbor,
                    calculator = calculator.name(),
                    candidate,
                    adjusted,
                    "calculator adjusted cost"
                );
                final_cost = adjusted;
            } else {
                tracing::warn!(
                    %neighbor,
                    calculator = calculator.name(),
                    adjusted,
                    "calculator produced unusable cost, keeping RTT-based candidate"
                );
            }
        }

        let Some(link) = store.get_mut(neighbor) else {
            return CostUpdate::Discarded;
        };
        let floor = (link.original_cost as f64).max(1.0);
        let ceiling = (link.original_cost as f64 * self.max_cost_multiplier).max(floor);
        final_cost = final_cost.clamp(floor, ceiling);

        let old_cost = link.current_cost;
        if (final_cost - old_cost).abs() / old_cost < self.cost_change_threshold {
            tracing::trace!(%neighbor, "cost change too small, skipping update");
            return CostUpdate::Discarded;
        }

        // Rebuild rate limiter: update the cost, hold the LSA.
        if let Some(last) = link.last_rebuild_trigger {
            if ctx.now.duration_since(last) < self.min_rebuild_interval {
                tracing::trace!(%neighbor, "rate limiting LSA trigger");
                link.current_cost = final_cost;
                host.update_link_cost(neighbor, final_cost);
                return CostUpdate::UpdatedSilently(final_cost);
            }
        }

        link.current_cost = final_cost;
        link.last_rebuild_trigger = Some(ctx.now);
        let stable = link.timeout_count == 0;

        host.update_link_cost(neighbor, final_cost);
        self.verify_write_through(neighbor, final_cost, host);
        self.cost_updates += 1;

        if stable {
            host.schedule_adj_lsa_build();
            host.schedule_routing_table_calculation();
            tracing::info!(%neighbor, old_cost, new_cost = final_cost, "cost updated, LSA rebuild triggered");
            CostUpdate::UpdatedAndRebuilt(final_cost)
        } else {
            tracing::info!(%neighbor, old_cost, new_cost = final_cost, "cost updated, rebuild withheld (unstable)");
            CostUpdate::UpdatedUnstable(final_cost)
        }
    }

    /// Re-read the adjacency slot and warn when the stored cost diverges
    /// from what we just wrote.
    fn verify_write_through(&self, neighbor: &NeighborName, expected: f64, host: &dyn HostServices) {
        match host.link_cost(neighbor) {
            Some(actual) if (actual - expected).abs() > VERIFY_TOLERANCE => {
                tracing::warn!(%neighbor, expected, actual, "cost update verification failed");
            }
            Some(_) => {
                tracing::trace!(%neighbor, expected, "cost update verified");
            }
            None => {
                tracing::warn!(%neighbor, "cost update verification failed: neighbor not found");
            }
        }
    }
}
