//! # Link Cost Manager
//!
//! Owns the subsystem lifecycle and wires the store, probe scheduling, cost
//! engine, and feedback publication together.
//!
//! ```text
//!   Uninitialized ──initialize──▶ Initialized ──start──▶ Running
//!                                                          │ stop
//!                                                          ▼
//!                                                 Stopping ──▶ Stopped
//! ```
//!
//! The manager is driven entirely by the host event loop: hello signals and
//! probe responses arrive through the handler methods, and delayed work
//! fires when the host calls [`poll`](LinkCostManager::poll). `start` arms a
//! one-shot warm-up; only after it elapses are probes scheduled, each with
//! uniform jitter on top of the base interval. `stop` cancels everything,
//! drops in-flight measurements, rolls every neighbor back to its original
//! cost, and requests one final LSA rebuild.

use quanta::{Clock, Instant};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashMap;
use std::time::Duration;

use chrono::Timelike;

use crate::calculator::TickContext;
use crate::config::LinkCostConfig;
use crate::engine::CostEngine;
use crate::feedback;
use crate::host::{HostServices, ProbeFace};
use crate::metrics::{self, ChannelError, GetReply, MetricsReply, MetricsRequest};
use crate::name::NeighborName;
use crate::probe::{PendingMeasurements, ProbeRequest, ProbeResponder};
use crate::store::{
    HelloOutcome, LinkStateStore, MeasurementOutcome, NeighborStatus, StatusOutcome,
    MIN_SAMPLES_FOR_COST,
};
use crate::timer::{TimerId, TimerQueue};
use crate::tlv::{
    CommandFrame, CommandVerb, ResponseFrame, STATUS_INVALID_ARGUMENT, STATUS_NOT_FOUND, STATUS_OK,
};

/// Subsystem lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    Running,
    Stopping,
    Stopped,
}

/// Delayed work on the cooperative timer queue.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TimerEvent {
    WarmupDone,
    Probe(NeighborName),
    StatusReport,
}

/// Measurement counters for the status report.
#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    pub probes_sent: u64,
    pub successful_measurements: u64,
}

/// The link cost subsystem.
pub struct LinkCostManager {
    config: LinkCostConfig,
    clock: Clock,
    state: LifecycleState,
    store: LinkStateStore,
    engine: CostEngine,
    timers: TimerQueue<TimerEvent>,
    probe_timers: HashMap<NeighborName, TimerId>,
    pending: PendingMeasurements,
    responder: ProbeResponder,
    rng: StdRng,
    counters: Counters,
}

impl LinkCostManager {
    pub fn new(own_router: &NeighborName, config: LinkCostConfig, clock: Clock) -> Self {
        let engine = CostEngine::new(&config);
        let store = LinkStateStore::new(config.retry_limit, config.rtt_history_capacity);
        LinkCostManager {
            responder: ProbeResponder::new(own_router),
            engine,
            store,
            config,
            clock,
            state: LifecycleState::Uninitialized,
            timers: TimerQueue::new(),
            probe_timers: HashMap::new(),
            pending: PendingMeasurements::new(),
            rng: StdRng::from_os_rng(),
            counters: Counters::default(),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn store(&self) -> &LinkStateStore {
        &self.store
    }

    pub fn engine(&self) -> &CostEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut CostEngine {
        &mut self.engine
    }

    pub fn responder(&self) -> &ProbeResponder {
        &self.responder
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn pending_probes(&self) -> usize {
        self.pending.len()
    }

    /// Earliest deadline the host should wake us at.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// One-shot population from the host's adjacency list.
    pub fn initialize<I>(&mut self, adjacencies: I)
    where
        I: IntoIterator<Item = (NeighborName, u64, NeighborStatus)>,
    {
        if self.state != LifecycleState::Uninitialized {
            tracing::warn!(state = ?self.state, "initialize called twice, ignoring");
            return;
        }
        self.store.initialize(adjacencies, self.clock.now());
        self.state = LifecycleState::Initialized;
        tracing::info!(neighbors = self.store.len(), "link cost manager initialized");
    }

    /// Begin measuring after the warm-up delay. Idempotent while running.
    pub fn start(&mut self) {
        match self.state {
            LifecycleState::Running => {
                tracing::warn!("link cost manager already active");
                return;
            }
            LifecycleState::Initialized => {}
            other => {
                tracing::warn!(state = ?other, "start called in invalid state, ignoring");
                return;
            }
        }

        self.state = LifecycleState::Running;
        let warmup_done = self.clock.now() + self.config.warmup;
        self.timers.schedule(warmup_done, TimerEvent::WarmupDone);
        tracing::info!(warmup_secs = self.config.warmup.as_secs(), "link cost manager started");
    }

    /// Cancel all scheduled work, drop in-flight probes, restore original
    /// costs, and request one final LSA rebuild.
    pub fn stop(&mut self, host: &mut dyn HostServices) {
        if self.state != LifecycleState::Running {
            tracing::debug!(state = ?self.state, "stop called while not running, ignoring");
            return;
        }
        self.state = LifecycleState::Stopping;

        self.timers.cancel_all();
        self.probe_timers.clear();
        self.pending.clear();

        for (neighbor, original_cost) in self.store.rollback_all() {
            host.update_link_cost(&neighbor, original_cost as f64);
            tracing::info!(%neighbor, original_cost, "restored original cost");
        }
        host.schedule_adj_lsa_build();

        self.state = LifecycleState::Stopped;
        tracing::info!("link cost manager stopped and original costs restored");
    }

    // ── Event loop ──────────────────────────────────────────────────────

    /// Run every due timer event. Called by the host loop; each event runs
    /// to completion before the next is popped, so handlers never observe
    /// half-applied state. Returns the number of events processed.
    pub fn poll(&mut self, face: &mut dyn ProbeFace) -> usize {
        let mut processed = 0;
        loop {
            if self.state != LifecycleState::Running {
                return processed;
            }
            let now = self.clock.now();
            let Some(event) = self.timers.pop_due(now) else {
                return processed;
            };
            processed += 1;
            match event {
                TimerEvent::WarmupDone => self.on_warmup_done(),
                TimerEvent::Probe(neighbor) => self.on_probe_timer(&neighbor, now, face),
                TimerEvent::StatusReport => self.on_status_report(),
            }
        }
    }

    fn on_warmup_done(&mut self) {
        tracing::info!("warm-up complete, arming probes");
        for neighbor in self.store.neighbors() {
            if self.store.is_stable(&neighbor) {
                self.arm_probe(&neighbor);
            }
        }
        let at = self.clock.now() + self.config.status_report_interval;
        self.timers.schedule(at, TimerEvent::StatusReport);
    }

    fn on_probe_timer(&mut self, neighbor: &NeighborName, now: Instant, face: &mut dyn ProbeFace) {
        self.probe_timers.remove(neighbor);

        if self.store.is_stable(neighbor) {
            let seq = self.pending.next_seq();
            let probe = ProbeRequest::new(neighbor, seq, self.config.measurement_timeout);
            face.send_probe(&probe);
            self.pending.insert(seq, neighbor.clone(), now);
            self.counters.probes_sent += 1;
            tracing::trace!(%neighbor, seq, "RTT probe sent");
        } else {
            tracing::trace!(%neighbor, "skipping probe, link not stable");
        }

        // Reschedule unconditionally while the subsystem is active.
        self.arm_probe(neighbor);
    }

    fn on_status_report(&mut self) {
        tracing::info!(
            probes_sent = self.counters.probes_sent,
            successful = self.counters.successful_measurements,
            cost_updates = self.engine.cost_updates(),
            neighbors = self.store.len(),
            "link cost status report"
        );
        let now = self.clock.now();
        for neighbor in self.store.neighbors() {
            if let Some(link) = self.store.get(&neighbor) {
                tracing::info!(
                    %neighbor,
                    status = ?link.status,
                    cost = link.current_cost,
                    original_cost = link.original_cost,
                    samples = link.rtt_history.len(),
                    avg_rtt_ms = link.average_rtt().map(|d| d.as_millis() as u64),
                    timeouts = link.timeout_count,
                    "neighbor status"
                );
            }
        }
        self.timers.schedule(
            now + self.config.status_report_interval,
            TimerEvent::StatusReport,
        );
    }

    /// Schedule the next probe for `neighbor`, replacing any existing one.
    fn arm_probe(&mut self, neighbor: &NeighborName) {
        if self.state != LifecycleState::Running {
            return;
        }
        if let Some(id) = self.probe_timers.remove(neighbor) {
            self.timers.cancel(id);
        }
        let delay = self.config.measurement_interval + self.probe_jitter();
        let id = self
            .timers
            .schedule(self.clock.now() + delay, TimerEvent::Probe(neighbor.clone()));
        self.probe_timers.insert(neighbor.clone(), id);
    }

    fn probe_jitter(&mut self) -> Duration {
        let max_ms = self.config.probe_jitter_max.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.rng.random_range(0..max_ms))
    }

    fn cancel_probe(&mut self, neighbor: &NeighborName) {
        if let Some(id) = self.probe_timers.remove(neighbor) {
            self.timers.cancel(id);
        }
    }

    fn tick_context(&self) -> TickContext {
        TickContext::new(self.clock.now(), minute_of_day())
    }

    // ── Hello signals from the host ─────────────────────────────────────

    pub fn on_hello_sent(&mut self, neighbor: &NeighborName) {
        if self.store.contains(neighbor) {
            tracing::trace!(%neighbor, "hello interest sent");
        }
    }

    pub fn on_hello_data(&mut self, neighbor: &NeighborName) {
        let should_arm = self.store.on_hello_data(neighbor, self.clock.now());
        if should_arm && self.state == LifecycleState::Running && self.store.is_stable(neighbor) {
            self.arm_probe(neighbor);
        }
    }

    pub fn on_hello_timeout(&mut self, neighbor: &NeighborName, count: u32) {
        if self.store.on_hello_timeout(neighbor, count) == HelloOutcome::Declined {
            let dropped = self.pending.drop_neighbor(neighbor);
            self.cancel_probe(neighbor);
            tracing::info!(%neighbor, dropped, "cleaned up probes for declined neighbor");
        }
    }

    pub fn on_status_change(
        &mut self,
        neighbor: &NeighborName,
        status: NeighborStatus,
        host: &mut dyn HostServices,
    ) {
        match self.store.on_status_change(neighbor, status, self.clock.now()) {
            StatusOutcome::Declined => {
                let dropped = self.pending.drop_neighbor(neighbor);
                self.cancel_probe(neighbor);
                tracing::info!(%neighbor, dropped, "cleaned up state for INACTIVE neighbor");
                // The hello subsystem owns the LSA rebuild on this path.
            }
            StatusOutcome::Activated => {
                if let Some(link) = self.store.get(neighbor) {
                    host.update_link_cost(neighbor, link.original_cost as f64);
                }
                if self.state == LifecycleState::Running {
                    self.arm_probe(neighbor);
                }
            }
            StatusOutcome::Unchanged | StatusOutcome::Ignored => {}
        }
    }

    // ── Probe result plumbing ───────────────────────────────────────────

    /// A probe response arrived. Resolves the measurement token, records
    /// the sample, publishes feedback, and runs the cost pipeline.
    pub fn handle_probe_response(&mut self, seq: u32, host: &mut dyn HostServices) {
        let now = self.clock.now();
        let Some((neighbor, sent_at)) = self.pending.take(seq) else {
            return;
        };
        let rtt = now.duration_since(sent_at);
        self.counters.successful_measurements += 1;

        let outcome = self.store.record_measurement(&neighbor, rtt, now);
        let MeasurementOutcome::Recorded { samples, ready } = outcome else {
            tracing::debug!(%neighbor, seq, ?outcome, "measurement not recorded");
            return;
        };
        tracing::debug!(
            %neighbor,
            rtt_ms = rtt.as_millis() as u64,
            samples,
            "RTT measurement recorded"
        );

        let ctx = self.tick_context();
        if samples >= MIN_SAMPLES_FOR_COST && self.engine.has_calculator() {
            if let Some(link) = self.store.get(&neighbor) {
                let rtt_ms = (rtt.as_millis() as f64).max(1.0);
                let performance = feedback::evaluate(&self.config.feedback_weights, link, rtt_ms);
                self.engine.publish_feedback(&neighbor, performance, &ctx);
            }
        }

        if ready {
            if let Some(candidate) = self.engine.compute_rtt_based_cost(&self.store, &neighbor) {
                if self.engine.should_update(&self.store, &neighbor, candidate) {
                    self.engine
                        .apply_cost_update(&mut self.store, &neighbor, candidate, &ctx, host);
                }
            }
        }
    }

    /// Probe lifetime expiry, nack, and network timeout all converge here.
    pub fn handle_probe_timeout(&mut self, seq: u32) {
        if let Some((neighbor, _)) = self.pending.take(seq) {
            tracing::debug!(%neighbor, seq, "RTT probe timed out");
        }
    }

    // ── Metrics control channel ─────────────────────────────────────────

    /// Handle a decoded control-channel request.
    pub fn handle_metrics_request(
        &mut self,
        request: MetricsRequest,
    ) -> Result<MetricsReply, ChannelError> {
        metrics::dispatch(
            &mut self.store,
            &self.config.preview_weights,
            request,
            self.clock.now(),
        )
    }

    /// Handle a raw TLV command frame and produce the response frame the
    /// host should send back.
    pub fn handle_metrics_command(&mut self, frame: CommandFrame) -> ResponseFrame {
        let verb = frame.verb;
        let request = match verb {
            CommandVerb::Set => MetricsRequest::Set {
                neighbor: frame.neighbor,
                patch: frame.metrics.unwrap_or_default(),
            },
            CommandVerb::Get | CommandVerb::GetJson => MetricsRequest::Get {
                neighbor: frame.neighbor,
            },
        };

        match self.handle_metrics_request(request) {
            Ok(MetricsReply::Set(ack)) => ResponseFrame {
                status: STATUS_OK,
                message: format!("metrics updated for {}", ack.neighbor),
                metrics: Some(crate::store::ExternalMetricsPatch {
                    bandwidth_mbps: ack.bandwidth_mbps,
                    utilization: ack.utilization,
                    packet_loss: ack.packet_loss,
                    spectrum_dbm: ack.spectrum_dbm,
                }),
                preview_cost: None,
            },
            Ok(MetricsReply::Get(reply)) => {
                let message = if verb == CommandVerb::GetJson {
                    render_snapshot_json(&reply)
                } else {
                    render_snapshot_digest(&reply)
                };
                ResponseFrame {
                    status: STATUS_OK,
                    message,
                    metrics: reply.snapshot.external.map(|m| {
                        crate::store::ExternalMetricsPatch {
                            bandwidth_mbps: m.bandwidth_mbps,
                            utilization: m.utilization,
                            packet_loss: m.packet_loss,
                            spectrum_dbm: m.spectrum_dbm,
                        }
                    }),
                    preview_cost: Some(reply.preview.cost),
                }
            }
            Err(err @ ChannelError::NotFound(_)) => ResponseFrame {
                status: STATUS_NOT_FOUND,
                message: err.to_string(),
                metrics: None,
                preview_cost: None,
            },
            Err(err @ ChannelError::InvalidArgument(_)) => ResponseFrame {
                status: STATUS_INVALID_ARGUMENT,
                message: err.to_string(),
                metrics: None,
                preview_cost: None,
            },
        }
    }
}

/// One-line human digest of a `get` reply.
fn render_snapshot_digest(reply: &GetReply) -> String {
    let snap = &reply.snapshot;
    format!(
        "{}: status={:?} cost={} (orig={}) samples={} avg_rtt={}ms preview={}",
        snap.neighbor,
        snap.status,
        snap.current_cost,
        snap.original_cost,
        snap.rtt_history_ms.len(),
        snap.average_rtt_ms.unwrap_or(0.0),
        reply.preview.cost,
    )
}

/// Machine-readable form of a `get` reply, for `link-metrics show --json`.
fn render_snapshot_json(reply: &GetReply) -> String {
    serde_json::to_string(reply).unwrap_or_else(|err| {
        tracing::warn!(%err, "snapshot serialization failed, falling back to digest");
        render_snapshot_digest(reply)
    })
}

/// Minutes since local midnight, for temporal pattern slots.
fn minute_of_day() -> u32 {
    let now = chrono::Local::now();
    now.hour() * 60 + now.minute()
}
