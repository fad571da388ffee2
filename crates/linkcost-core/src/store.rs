//! # Link State Store
//!
//! Per-neighbor state for the link cost subsystem: liveness status, the
//! original and currently advertised cost, a bounded RTT history, timeout
//! accounting, and externally configured metrics.
//!
//! The store is the only structure shared between the manager, the cost
//! engine, and the metrics channel; all of them run on the host loop thread
//! so access is plain `&mut`.
//!
//! Invariants upheld here:
//! - only neighbors present at initialization exist in the store
//! - `original_cost` never changes after initialization
//! - `rtt_history` is non-empty only while the neighbor is ACTIVE
//! - on any decline to INACTIVE the history is cleared

use quanta::Instant;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::name::NeighborName;

/// Liveness of a neighbor, driven by the host's hello subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NeighborStatus {
    Active,
    Inactive,
}

/// One accepted RTT measurement.
#[derive(Debug, Clone, Copy)]
pub struct RttSample {
    /// Measured round-trip time, millisecond resolution.
    pub rtt: Duration,
    /// When the response arrived.
    pub received_at: Instant,
}

/// RTT readings above this are discarded as transient noise.
pub const MAX_RTT_MS: u64 = 5000;
/// Readings below this clamp up to it.
pub const MIN_RTT_MS: u64 = 1;
/// Samples required before a cost recomputation is justified.
pub const MIN_SAMPLES_FOR_COST: usize = 3;

// ─── External metrics ───────────────────────────────────────────────────────

/// Operator-supplied link metrics, set through the control channel.
#[derive(Debug, Clone, Copy)]
pub struct ExternalMetrics {
    pub bandwidth_mbps: Option<f64>,
    /// Bandwidth utilization in `[0, 1]`.
    pub utilization: Option<f64>,
    /// Packet loss rate in `[0, 1]`.
    pub packet_loss: Option<f64>,
    /// Received signal strength in dBm (meaningful range −100..−20).
    pub spectrum_dbm: Option<f64>,
    pub updated_at: Instant,
}

/// Partial update for [`ExternalMetrics`]; `None` fields keep their
/// previous value. Range validation happens in the control channel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExternalMetricsPatch {
    pub bandwidth_mbps: Option<f64>,
    pub utilization: Option<f64>,
    pub packet_loss: Option<f64>,
    pub spectrum_dbm: Option<f64>,
}

impl ExternalMetricsPatch {
    pub fn is_empty(&self) -> bool {
        self.bandwidth_mbps.is_none()
            && self.utilization.is_none()
            && self.packet_loss.is_none()
            && self.spectrum_dbm.is_none()
    }
}

// ─── Link state ─────────────────────────────────────────────────────────────

/// Mutable per-neighbor state. Lives for the daemon's lifetime.
#[derive(Debug, Clone)]
pub struct LinkState {
    pub status: NeighborStatus,
    /// Cost from static configuration. Immutable after initialization.
    pub original_cost: u64,
    /// Most recently published cost.
    pub current_cost: f64,
    pub rtt_history: VecDeque<RttSample>,
    /// Consecutive hello timeouts.
    pub timeout_count: u32,
    pub last_success: Instant,
    /// Rate-limits LSA rebuilds; `None` until the first rebuild.
    pub last_rebuild_trigger: Option<Instant>,
    pub external_metrics: Option<ExternalMetrics>,
}

impl LinkState {
    fn new(status: NeighborStatus, original_cost: u64, now: Instant) -> Self {
        LinkState {
            status,
            original_cost,
            current_cost: original_cost as f64,
            rtt_history: VecDeque::new(),
            timeout_count: 0,
            last_success: now,
            last_rebuild_trigger: None,
            external_metrics: None,
        }
    }

    /// A neighbor is stable when it is ACTIVE with no recent hello timeouts.
    /// RTT measurement is only allowed in this state.
    pub fn is_stable(&self) -> bool {
        self.status == NeighborStatus::Active && self.timeout_count == 0
    }

    /// Mean of the RTT history, if any samples exist.
    pub fn average_rtt(&self) -> Option<Duration> {
        if self.rtt_history.is_empty() {
            return None;
        }
        let total_ms: u64 = self
            .rtt_history
            .iter()
            .map(|s| s.rtt.as_millis() as u64)
            .sum();
        Some(Duration::from_millis(
            total_ms / self.rtt_history.len() as u64,
        ))
    }
}

// ─── Snapshots ──────────────────────────────────────────────────────────────

/// Read-only view of a neighbor's state, handed to calculators and the
/// control channel.
#[derive(Debug, Clone, Serialize)]
pub struct LinkSnapshot {
    pub neighbor: NeighborName,
    pub status: NeighborStatus,
    pub original_cost: u64,
    pub current_cost: f64,
    pub timeout_count: u32,
    pub average_rtt_ms: Option<f64>,
    pub rtt_history_ms: Vec<f64>,
    pub last_success_age_ms: u64,
    pub external: Option<ExternalMetricsView>,
}

/// Serializable view of [`ExternalMetrics`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ExternalMetricsView {
    pub bandwidth_mbps: Option<f64>,
    pub utilization: Option<f64>,
    pub packet_loss: Option<f64>,
    pub spectrum_dbm: Option<f64>,
    pub updated_age_ms: u64,
}

// ─── Event outcomes ─────────────────────────────────────────────────────────

/// Result of recording a probe measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementOutcome {
    /// Neighbor unknown, INACTIVE, or not stable: dropped.
    Ignored,
    /// Reading exceeded the acceptance window: dropped, retried next probe.
    Rejected,
    /// Appended to the history.
    Recorded {
        samples: usize,
        /// Enough samples now exist to justify a cost recomputation.
        ready: bool,
    },
}

/// Result of a hello timeout notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelloOutcome {
    Ignored,
    Counted,
    /// Retry limit reached: neighbor transitioned to INACTIVE.
    Declined,
}

/// Result of a status-change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    Ignored,
    Unchanged,
    /// ACTIVE → INACTIVE: history cleared, pending probes must be dropped.
    Declined,
    /// Came (back) up: cost reset to original, probing may resume.
    Activated,
}

// ─── Store ──────────────────────────────────────────────────────────────────

/// The per-neighbor state table.
#[derive(Debug)]
pub struct LinkStateStore {
    links: HashMap<NeighborName, LinkState>,
    retry_limit: u32,
    history_capacity: usize,
}

impl LinkStateStore {
    pub fn new(retry_limit: u32, history_capacity: usize) -> Self {
        LinkStateStore {
            links: HashMap::new(),
            retry_limit,
            history_capacity: history_capacity.max(10),
        }
    }

    /// One-shot population from the host's adjacency list.
    pub fn initialize<I>(&mut self, adjacencies: I, now: Instant)
    where
        I: IntoIterator<Item = (NeighborName, u64, NeighborStatus)>,
    {
        for (neighbor, original_cost, status) in adjacencies {
            tracing::debug!(%neighbor, original_cost, "initialized link state");
            self.links
                .insert(neighbor, LinkState::new(status, original_cost, now));
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn contains(&self, neighbor: &NeighborName) -> bool {
        self.links.contains_key(neighbor)
    }

    /// All known neighbors, in name order (stable for reports and tests).
    pub fn neighbors(&self) -> Vec<NeighborName> {
        let mut names: Vec<_> = self.links.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get(&self, neighbor: &NeighborName) -> Option<&LinkState> {
        self.links.get(neighbor)
    }

    pub(crate) fn get_mut(&mut self, neighbor: &NeighborName) -> Option<&mut LinkState> {
        self.links.get_mut(neighbor)
    }

    pub fn is_stable(&self, neighbor: &NeighborName) -> bool {
        self.links.get(neighbor).is_some_and(LinkState::is_stable)
    }

    // ── Measurements ────────────────────────────────────────────────────

    /// Record a probe RTT for `neighbor`.
    ///
    /// Readings under 1 ms clamp up to 1 ms and proceed; readings over
    /// 5000 ms are rejected outright. Unknown or non-stable neighbors are
    /// ignored.
    pub fn record_measurement(
        &mut self,
        neighbor: &NeighborName,
        rtt: Duration,
        now: Instant,
    ) -> MeasurementOutcome {
        let Some(link) = self.links.get_mut(neighbor) else {
            return MeasurementOutcome::Ignored;
        };
        if !link.is_stable() {
            return MeasurementOutcome::Ignored;
        }

        let rtt_ms = rtt.as_millis() as u64;
        if rtt_ms > MAX_RTT_MS {
            tracing::warn!(%neighbor, rtt_ms, "RTT above acceptance window, discarding");
            return MeasurementOutcome::Rejected;
        }
        let rtt = Duration::from_millis(rtt_ms.max(MIN_RTT_MS));

        if link.rtt_history.len() == self.history_capacity {
            link.rtt_history.pop_front();
        }
        link.rtt_history.push_back(RttSample {
            rtt,
            received_at: now,
        });
        link.last_success = now;

        let samples = link.rtt_history.len();
        MeasurementOutcome::Recorded {
            samples,
            ready: samples >= MIN_SAMPLES_FOR_COST,
        }
    }

    // ── Hello events ────────────────────────────────────────────────────

    /// Hello data arrived: the neighbor is alive. Returns whether the
    /// caller should arm a probe (stable with no samples yet).
    pub fn on_hello_data(&mut self, neighbor: &NeighborName, now: Instant) -> bool {
        let Some(link) = self.links.get_mut(neighbor) else {
            return false;
        };
        link.status = NeighborStatus::Active;
        link.timeout_count = 0;
        link.last_success = now;
        tracing::trace!(%neighbor, "hello data received, link stable");
        link.rtt_history.is_empty()
    }

    /// Hello timeout number `count` for `neighbor`.
    pub fn on_hello_timeout(&mut self, neighbor: &NeighborName, count: u32) -> HelloOutcome {
        let Some(link) = self.links.get_mut(neighbor) else {
            return HelloOutcome::Ignored;
        };
        link.timeout_count = count;
        tracing::debug!(%neighbor, count, "hello timeout");

        if count >= self.retry_limit {
            link.status = NeighborStatus::Inactive;
            link.rtt_history.clear();
            tracing::info!(%neighbor, "neighbor declined to INACTIVE after hello timeouts");
            HelloOutcome::Declined
        } else {
            HelloOutcome::Counted
        }
    }

    /// Status change pushed by the host's hello subsystem.
    pub fn on_status_change(
        &mut self,
        neighbor: &NeighborName,
        new_status: NeighborStatus,
        now: Instant,
    ) -> StatusOutcome {
        let retry_limit = self.retry_limit;
        let Some(link) = self.links.get_mut(neighbor) else {
            return StatusOutcome::Ignored;
        };
        let old_status = link.status;
        link.status = new_status;
        tracing::info!(%neighbor, ?old_status, ?new_status, "neighbor status change");

        match new_status {
            NeighborStatus::Inactive => {
                link.rtt_history.clear();
                link.timeout_count = retry_limit;
                // The hello subsystem owns the LSA rebuild for this path.
                StatusOutcome::Declined
            }
            NeighborStatus::Active if old_status != NeighborStatus::Active => {
                link.current_cost = link.original_cost as f64;
                link.timeout_count = 0;
                link.last_success = now;
                StatusOutcome::Activated
            }
            NeighborStatus::Active => StatusOutcome::Unchanged,
        }
    }

    // ── External metrics ────────────────────────────────────────────────

    /// Upsert operator-supplied metrics. Returns the merged record, or
    /// `None` for an unknown neighbor.
    pub fn apply_external_metrics(
        &mut self,
        neighbor: &NeighborName,
        patch: ExternalMetricsPatch,
        now: Instant,
    ) -> Option<ExternalMetrics> {
        let link = self.links.get_mut(neighbor)?;
        let mut metrics = link.external_metrics.unwrap_or(ExternalMetrics {
            bandwidth_mbps: None,
            utilization: None,
            packet_loss: None,
            spectrum_dbm: None,
            updated_at: now,
        });
        if patch.bandwidth_mbps.is_some() {
            metrics.bandwidth_mbps = patch.bandwidth_mbps;
        }
        if patch.utilization.is_some() {
            metrics.utilization = patch.utilization;
        }
        if patch.packet_loss.is_some() {
            metrics.packet_loss = patch.packet_loss;
        }
        if patch.spectrum_dbm.is_some() {
            metrics.spectrum_dbm = patch.spectrum_dbm;
        }
        metrics.updated_at = now;
        link.external_metrics = Some(metrics);
        Some(metrics)
    }

    // ── Snapshots & rollback ────────────────────────────────────────────

    pub fn snapshot(&self, neighbor: &NeighborName, now: Instant) -> Option<LinkSnapshot> {
        let link = self.links.get(neighbor)?;
        Some(LinkSnapshot {
            neighbor: neighbor.clone(),
            status: link.status,
            original_cost: link.original_cost,
            current_cost: link.current_cost,
            timeout_count: link.timeout_count,
            average_rtt_ms: link.average_rtt().map(|d| d.as_millis() as f64),
            rtt_history_ms: link
                .rtt_history
                .iter()
                .map(|s| s.rtt.as_millis() as f64)
                .collect(),
            last_success_age_ms: now.duration_since(link.last_success).as_millis() as u64,
            external: link.external_metrics.map(|m| ExternalMetricsView {
                bandwidth_mbps: m.bandwidth_mbps,
                utilization: m.utilization,
                packet_loss: m.packet_loss,
                spectrum_dbm: m.spectrum_dbm,
                updated_age_ms: now.duration_since(m.updated_at).as_millis() as u64,
            }),
        })
    }

    /// Roll every neighbor's current cost back to its original value.
    /// Returns the neighbors whose cost actually changed, for write-through
    /// to the host's adjacency list.
    pub fn rollback_all(&mut self) -> Vec<(NeighborName, u64)> {
        let mut restored = Vec::new();
        for (neighbor, link) in &mut self.links {
            if (link.current_cost - link.original_cost as f64).abs() > f64::EPSILON {
                link.current_cost = link.original_cost as f64;
                restored.push((neighbor.clone(), link.original_cost));
            }
        }
        restored.sort_by(|a, b| a.0.cmp(&b.0));
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quanta::Clock;

    fn store_with(neighbors: &[(&str, u64)]) -> (LinkStateStore, Clock) {
        let (clock, _mock) = Clock::mock();
        let mut store = LinkStateStore::new(3, 10);
        store.initialize(
            neighbors
                .iter()
                .map(|(n, c)| (NeighborName::new(n), *c, NeighborStatus::Active)),
            clock.now(),
        );
        (store, clock)
    }

    // ─── Initialization ─────────────────────────────────────────────────

    #[test]
    fn initialize_populates_neighbors() {
        let (store, _clock) = store_with(&[("/r/a", 12), ("/r/b", 5)]);
        assert_eq!(store.len(), 2);
        let a = store.get(&NeighborName::new("/r/a")).unwrap();
        assert_eq!(a.original_cost, 12);
        assert!((a.current_cost - 12.0).abs() < 1e-9);
        assert!(a.rtt_history.is_empty());
    }

    #[test]
    fn unknown_neighbor_is_ignored_everywhere() {
        let (mut store, clock) = store_with(&[("/r/a", 12)]);
        let ghost = NeighborName::new("/r/ghost");
        assert_eq!(
            store.record_measurement(&ghost, Duration::from_millis(10), clock.now()),
            MeasurementOutcome::Ignored
        );
        assert_eq!(store.on_hello_timeout(&ghost, 5), HelloOutcome::Ignored);
        assert_eq!(
            store.on_status_change(&ghost, NeighborStatus::Inactive, clock.now()),
            StatusOutcome::Ignored
        );
        assert!(store.snapshot(&ghost, clock.now()).is_none());
    }

    // ─── Measurements ───────────────────────────────────────────────────

    #[test]
    fn three_samples_signal_ready() {
        let (mut store, clock) = store_with(&[("/r/a", 10)]);
        let a = NeighborName::new("/r/a");
        let now = clock.now();

        for i in 1..=2 {
            assert_eq!(
                store.record_measurement(&a, Duration::from_millis(40), now),
                MeasurementOutcome::Recorded {
                    samples: i,
                    ready: false
                }
            );
        }
        assert_eq!(
            store.record_measurement(&a, Duration::from_millis(40), now),
            MeasurementOutcome::Recorded {
                samples: 3,
                ready: true
            }
        );
    }

    #[test]
    fn sub_millisecond_rtt_clamps_to_one() {
        let (mut store, clock) = store_with(&[("/r/a", 10)]);
        let a = NeighborName::new("/r/a");
        store.record_measurement(&a, Duration::from_micros(50), clock.now());
        assert_eq!(
            store.get(&a).unwrap().average_rtt(),
            Some(Duration::from_millis(1))
        );
    }

    #[test]
    fn oversized_rtt_is_rejected() {
        let (mut store, clock) = store_with(&[("/r/a", 10)]);
        let a = NeighborName::new("/r/a");
        assert_eq!(
            store.record_measurement(&a, Duration::from_millis(5001), clock.now()),
            MeasurementOutcome::Rejected
        );
        assert!(store.get(&a).unwrap().rtt_history.is_empty());
    }

    #[test]
    fn history_is_bounded_fifo() {
        let (mut store, clock) = store_with(&[("/r/a", 10)]);
        let a = NeighborName::new("/r/a");
        for i in 0..15 {
            store.record_measurement(&a, Duration::from_millis(10 + i), clock.now());
        }
        let link = store.get(&a).unwrap();
        assert_eq!(link.rtt_history.len(), 10);
        // Oldest five evicted: first surviving sample is 15 ms.
        assert_eq!(link.rtt_history[0].rtt, Duration::from_millis(15));
    }

    #[test]
    fn unstable_neighbor_measurement_ignored() {
        let (mut store, clock) = store_with(&[("/r/a", 10)]);
        let a = NeighborName::new("/r/a");
        store.on_hello_timeout(&a, 1);
        assert_eq!(
            store.record_measurement(&a, Duration::from_millis(20), clock.now()),
            MeasurementOutcome::Ignored
        );
    }

    // ─── Hello events ───────────────────────────────────────────────────

    #[test]
    fn timeout_below_limit_counts_only() {
        let (mut store, _clock) = store_with(&[("/r/a", 10)]);
        let a = NeighborName::new("/r/a");
        assert_eq!(store.on_hello_timeout(&a, 2), HelloOutcome::Counted);
        assert_eq!(store.get(&a).unwrap().status, NeighborStatus::Active);
        assert_eq!(store.get(&a).unwrap().timeout_count, 2);
    }

    #[test]
    fn timeout_at_limit_declines_and_clears_history() {
        let (mut store, clock) = store_with(&[("/r/a", 10)]);
        let a = NeighborName::new("/r/a");
        for _ in 0..4 {
            store.record_measurement(&a, Duration::from_millis(30), clock.now());
        }
        assert_eq!(store.on_hello_timeout(&a, 3), HelloOutcome::Declined);
        let link = store.get(&a).unwrap();
        assert_eq!(link.status, NeighborStatus::Inactive);
        assert!(link.rtt_history.is_empty());
    }

    #[test]
    fn hello_data_resets_timeouts_and_hints_probe() {
        let (mut store, clock) = store_with(&[("/r/a", 10)]);
        let a = NeighborName::new("/r/a");
        store.on_hello_timeout(&a, 2);

        // Empty history: caller should arm a probe.
        assert!(store.on_hello_data(&a, clock.now()));
        assert_eq!(store.get(&a).unwrap().timeout_count, 0);

        store.record_measurement(&a, Duration::from_millis(20), clock.now());
        assert!(!store.on_hello_data(&a, clock.now()));
    }

    // ─── Status changes ─────────────────────────────────────────────────

    #[test]
    fn decline_clears_history_and_forces_timeout_count() {
        let (mut store, clock) = store_with(&[("/r/a", 10)]);
        let a = NeighborName::new("/r/a");
        for _ in 0..3 {
            store.record_measurement(&a, Duration::from_millis(30), clock.now());
        }
        // Decline must not touch current_cost.
        store.get_mut(&a).unwrap().current_cost = 17.0;

        assert_eq!(
            store.on_status_change(&a, NeighborStatus::Inactive, clock.now()),
            StatusOutcome::Declined
        );
        let link = store.get(&a).unwrap();
        assert!(link.rtt_history.is_empty());
        assert_eq!(link.timeout_count, 3);
        assert!((link.current_cost - 17.0).abs() < 1e-9);
    }

    #[test]
    fn reactivation_restores_original_cost() {
        let (mut store, clock) = store_with(&[("/r/a", 10)]);
        let a = NeighborName::new("/r/a");
        store.get_mut(&a).unwrap().current_cost = 26.0;
        store.on_status_change(&a, NeighborStatus::Inactive, clock.now());

        assert_eq!(
            store.on_status_change(&a, NeighborStatus::Active, clock.now()),
            StatusOutcome::Activated
        );
        let link = store.get(&a).unwrap();
        assert!((link.current_cost - 10.0).abs() < 1e-9);
        assert_eq!(link.timeout_count, 0);
    }

    #[test]
    fn active_to_active_is_unchanged() {
        let (mut store, clock) = store_with(&[("/r/a", 10)]);
        let a = NeighborName::new("/r/a");
        assert_eq!(
            store.on_status_change(&a, NeighborStatus::Active, clock.now()),
            StatusOutcome::Unchanged
        );
    }

    // ─── External metrics ───────────────────────────────────────────────

    #[test]
    fn external_metrics_upsert_merges() {
        let (mut store, clock) = store_with(&[("/r/a", 10)]);
        let a = NeighborName::new("/r/a");

        store.apply_external_metrics(
            &a,
            ExternalMetricsPatch {
                utilization: Some(0.5),
                ..Default::default()
            },
            clock.now(),
        );
        let merged = store
            .apply_external_metrics(
                &a,
                ExternalMetricsPatch {
                    packet_loss: Some(0.02),
                    ..Default::default()
                },
                clock.now(),
            )
            .unwrap();
        assert_eq!(merged.utilization, Some(0.5));
        assert_eq!(merged.packet_loss, Some(0.02));
        assert_eq!(merged.bandwidth_mbps, None);
    }

    // ─── Rollback ───────────────────────────────────────────────────────

    #[test]
    fn rollback_restores_only_changed_costs() {
        let (mut store, _clock) = store_with(&[("/r/a", 10), ("/r/b", 5)]);
        let a = NeighborName::new("/r/a");
        store.get_mut(&a).unwrap().current_cost = 26.0;

        let restored = store.rollback_all();
        assert_eq!(restored, vec![(a.clone(), 10)]);
        assert!((store.get(&a).unwrap().current_cost - 10.0).abs() < 1e-9);
    }

    #[test]
    fn snapshot_serializes_for_operator_output() {
        let (mut store, clock) = store_with(&[("/r/a", 12)]);
        let a = NeighborName::new("/r/a");
        store.record_measurement(&a, Duration::from_millis(40), clock.now());
        store.apply_external_metrics(
            &a,
            ExternalMetricsPatch {
                spectrum_dbm: Some(-45.0),
                ..Default::default()
            },
            clock.now(),
        );

        let snap = store.snapshot(&a, clock.now()).unwrap();
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["neighbor"], "/r/a");
        assert_eq!(json["status"], "ACTIVE");
        assert_eq!(json["original_cost"], 12);
        assert_eq!(json["external"]["spectrum_dbm"], -45.0);
    }

    #[test]
    fn snapshot_reflects_state() {
        let (mut store, clock) = store_with(&[("/r/a", 12)]);
        let a = NeighborName::new("/r/a");
        store.record_measurement(&a, Duration::from_millis(40), clock.now());
        store.record_measurement(&a, Duration::from_millis(60), clock.now());

        let snap = store.snapshot(&a, clock.now()).unwrap();
        assert_eq!(snap.original_cost, 12);
        assert_eq!(snap.average_rtt_ms, Some(50.0));
        assert_eq!(snap.rtt_history_ms, vec![40.0, 60.0]);
        assert!(snap.external.is_none());
    }
}
