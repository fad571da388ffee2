//! Shared fakes for the integration suites. No real network I/O — the
//! "host daemon" is a pair of recording stubs and time is a mock clock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use quanta::{Clock, Mock};

use linkcost_core::config::LinkCostConfig;
use linkcost_core::host::{HostServices, ProbeFace};
use linkcost_core::manager::LinkCostManager;
use linkcost_core::name::NeighborName;
use linkcost_core::probe::ProbeRequest;
use linkcost_core::store::NeighborStatus;

/// Records every outbound call the subsystem makes into the host.
#[derive(Default)]
pub struct FakeHost {
    pub costs: HashMap<NeighborName, f64>,
    pub lsa_builds: u32,
    pub rt_calcs: u32,
}

impl HostServices for FakeHost {
    fn schedule_adj_lsa_build(&mut self) {
        self.lsa_builds += 1;
    }

    fn schedule_routing_table_calculation(&mut self) {
        self.rt_calcs += 1;
    }

    fn update_link_cost(&mut self, neighbor: &NeighborName, cost: f64) -> bool {
        self.costs.insert(neighbor.clone(), cost);
        true
    }

    fn link_cost(&self, neighbor: &NeighborName) -> Option<f64> {
        self.costs.get(neighbor).copied()
    }
}

/// Captures outbound probes.
#[derive(Default)]
pub struct FakeFace {
    pub probes: Vec<ProbeRequest>,
}

impl ProbeFace for FakeFace {
    fn send_probe(&mut self, probe: &ProbeRequest) {
        self.probes.push(probe.clone());
    }
}

/// Deterministic config: no probe jitter, defaults otherwise.
pub fn test_config() -> LinkCostConfig {
    LinkCostConfig {
        probe_jitter_max: Duration::ZERO,
        ..LinkCostConfig::default()
    }
}

/// A manager over a mock clock, initialized with the given adjacencies.
pub fn manager_with(
    config: LinkCostConfig,
    adjacencies: &[(&str, u64)],
) -> (LinkCostManager, Arc<Mock>) {
    let (clock, mock) = Clock::mock();
    let mut mgr = LinkCostManager::new(&NeighborName::new("/nd/router-a"), config, clock);
    mgr.initialize(
        adjacencies
            .iter()
            .map(|(n, c)| (NeighborName::new(n), *c, NeighborStatus::Active)),
    );
    (mgr, mock)
}

/// Drive one full probe/response cycle for the earliest armed probe:
/// advance past the probe deadline, poll, then answer the newest probe
/// after `rtt` has elapsed.
pub fn probe_cycle(
    mgr: &mut LinkCostManager,
    mock: &Mock,
    host: &mut FakeHost,
    face: &mut FakeFace,
    advance: Duration,
    rtt: Duration,
) {
    mock.increment(advance);
    mgr.poll(face);
    let seq = face.probes.last().expect("a probe should have fired").seq;
    mock.increment(rtt);
    mgr.handle_probe_response(seq, host);
}
