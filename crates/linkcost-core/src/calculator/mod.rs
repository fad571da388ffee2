//! # Adaptive Route-Cost Calculators
//!
//! A calculator is a pluggable rewriter of the engine's RTT-based cost. The
//! engine holds at most one; registration and deregistration are explicit,
//! so the cost path and the feedback path always terminate in the same
//! object and tearing the calculator down cannot leave a dangling callback.
//!
//! Two implementations ship: the deterministic [`load_aware`] calculator and
//! the online-learning [`ml`] calculator.

pub mod load_aware;
pub mod ml;

use quanta::Instant;

use crate::config::LinkCostConfig;
use crate::engine::CostEngine;
use crate::name::NeighborName;
use crate::store::LinkSnapshot;

/// Per-event context threaded into calculators: the monotonic instant of
/// the event and the local minute of day (for temporal pattern lookups).
#[derive(Debug, Clone, Copy)]
pub struct TickContext {
    pub now: Instant,
    /// Minutes since local midnight, `0..1440`.
    pub minute_of_day: u32,
}

impl TickContext {
    pub fn new(now: Instant, minute_of_day: u32) -> Self {
        TickContext {
            now,
            minute_of_day: minute_of_day % (24 * 60),
        }
    }
}

/// A pluggable route-cost rewriter.
///
/// `adjust` consumes the engine's RTT-based candidate and a read-only link
/// snapshot and returns the final cost. `observe` receives the scalar
/// link-performance signal published after each accepted measurement
/// (lower is better), closing the learning loop for calculators that train.
///
/// Implementations must not panic; the engine additionally guards against
/// non-finite or non-positive results and falls back to the candidate.
pub trait AdaptiveCalculator {
    fn name(&self) -> &'static str;

    fn adjust(
        &mut self,
        neighbor: &NeighborName,
        rtt_based_cost: f64,
        snapshot: &LinkSnapshot,
        ctx: &TickContext,
    ) -> f64;

    fn observe(&mut self, neighbor: &NeighborName, performance: f64, ctx: &TickContext);
}

// ─── Mode selection ─────────────────────────────────────────────────────────

/// Which route-cost calculation the daemon runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMode {
    /// Plain link-state calculation, no cost mutation.
    Standard,
    LoadAware,
    MlAdaptive,
    /// Hyperbolic routing; handled entirely by the host, no calculator.
    Hyperbolic,
    HyperbolicDryRun,
}

impl RoutingMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(RoutingMode::Standard),
            "load-aware" => Some(RoutingMode::LoadAware),
            "ml-adaptive" => Some(RoutingMode::MlAdaptive),
            "hyperbolic" => Some(RoutingMode::Hyperbolic),
            "hyperbolic-dry-run" => Some(RoutingMode::HyperbolicDryRun),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingMode::Standard => "standard",
            RoutingMode::LoadAware => "load-aware",
            RoutingMode::MlAdaptive => "ml-adaptive",
            RoutingMode::Hyperbolic => "hyperbolic",
            RoutingMode::HyperbolicDryRun => "hyperbolic-dry-run",
        }
    }

    /// Whether this mode wants an adaptive calculator registered.
    pub fn is_adaptive(&self) -> bool {
        matches!(self, RoutingMode::LoadAware | RoutingMode::MlAdaptive)
    }
}

// ─── Selector ───────────────────────────────────────────────────────────────

/// Instantiates the configured calculator lazily on the first routing-table
/// build and registers it with the cost engine. If an adaptive mode is
/// configured but the link cost manager is absent, degrades to Standard
/// with a warning: no cost mutation, no probes.
#[derive(Debug)]
pub struct CalculatorSelector {
    mode: RoutingMode,
    installed: bool,
    degraded: bool,
}

impl CalculatorSelector {
    pub fn new(mode: RoutingMode) -> Self {
        CalculatorSelector {
            mode,
            installed: false,
            degraded: false,
        }
    }

    /// The mode currently in effect (after any degradation).
    pub fn effective_mode(&self) -> RoutingMode {
        if self.degraded {
            RoutingMode::Standard
        } else {
            self.mode
        }
    }

    /// Hook for each routing-table build. `engine` is `None` when the link
    /// cost manager is not running in this daemon.
    pub fn on_routing_build(&mut self, engine: Option<&mut CostEngine>, config: &LinkCostConfig) {
        if !self.mode.is_adaptive() || self.installed || self.degraded {
            return;
        }

        let Some(engine) = engine else {
            tracing::warn!(
                mode = self.mode.as_str(),
                "adaptive routing requested but link cost manager is absent, \
                 falling back to standard"
            );
            self.degraded = true;
            return;
        };

        let calculator: Box<dyn AdaptiveCalculator> = match self.mode {
            RoutingMode::LoadAware => Box::new(load_aware::LoadAwareCalculator::new(
                config.load_aware_weights,
            )),
            RoutingMode::MlAdaptive => Box::new(ml::MlAdaptiveCalculator::new()),
            _ => unreachable!("is_adaptive() gated above"),
        };
        tracing::info!(calculator = calculator.name(), "registered adaptive calculator");
        engine.set_calculator(calculator);
        self.installed = true;
    }

    /// Deregister the calculator on daemon teardown.
    pub fn teardown(&mut self, engine: Option<&mut CostEngine>) {
        if self.installed {
            if let Some(engine) = engine {
                engine.clear_calculator();
            }
            self.installed = false;
        }
    }
}
