//! # Control-channel scenarios
//!
//! The operator path end-to-end: TLV command frame → decode → dispatch
//! against the store → response frame → decode, exactly as the host daemon
//! wires it between the face and the subsystem.

mod common;

use std::time::Duration;

use common::{manager_with, probe_cycle, test_config, FakeFace, FakeHost};
use linkcost_core::name::NeighborName;
use linkcost_core::store::ExternalMetricsPatch;
use linkcost_core::tlv::{
    decode_command, decode_response, encode_command, encode_response, CommandFrame, CommandVerb,
    STATUS_INVALID_ARGUMENT, STATUS_NOT_FOUND, STATUS_OK,
};

fn round_trip(mgr: &mut linkcost_core::manager::LinkCostManager, frame: CommandFrame) -> linkcost_core::tlv::ResponseFrame {
    let wire = encode_command(&frame);
    let decoded = decode_command(&wire).expect("command frame decodes");
    let response = mgr.handle_metrics_command(decoded);
    let response_wire = encode_response(&response);
    decode_response(&response_wire).expect("response frame decodes")
}

// ─── Preview factors ────────────────────────────────────────────────────────

#[test]
fn set_then_show_computes_documented_preview() {
    let (mut mgr, _mock) = manager_with(test_config(), &[("/r/b", 12)]);
    let b = NeighborName::new("/r/b");

    let ack = round_trip(
        &mut mgr,
        CommandFrame {
            verb: CommandVerb::Set,
            neighbor: b.clone(),
            metrics: Some(ExternalMetricsPatch {
                utilization: Some(0.65),
                packet_loss: Some(0.02),
                spectrum_dbm: Some(-45.0),
                ..Default::default()
            }),
        },
    );
    assert_eq!(ack.status, STATUS_OK);
    let echoed = ack.metrics.expect("set echoes values");
    assert_eq!(echoed.utilization, Some(0.65));
    assert_eq!(echoed.packet_loss, Some(0.02));
    assert_eq!(echoed.spectrum_dbm, Some(-45.0));

    // No RTT data: preview = round(12 × (0.4·1.10 + 0.3·1.65 + 0.2·1.04
    // + 0.1·1.30)) = 15.
    let shown = round_trip(
        &mut mgr,
        CommandFrame {
            verb: CommandVerb::Get,
            neighbor: b,
            metrics: None,
        },
    );
    assert_eq!(shown.status, STATUS_OK);
    assert_eq!(shown.preview_cost, Some(15));
}

#[test]
fn show_json_carries_serialized_snapshot() {
    let (mut mgr, _mock) = manager_with(test_config(), &[("/r/b", 12)]);
    let b = NeighborName::new("/r/b");

    round_trip(
        &mut mgr,
        CommandFrame {
            verb: CommandVerb::Set,
            neighbor: b.clone(),
            metrics: Some(ExternalMetricsPatch {
                utilization: Some(0.65),
                packet_loss: Some(0.02),
                spectrum_dbm: Some(-45.0),
                ..Default::default()
            }),
        },
    );

    let shown = round_trip(
        &mut mgr,
        CommandFrame {
            verb: CommandVerb::GetJson,
            neighbor: b,
            metrics: None,
        },
    );
    assert_eq!(shown.status, STATUS_OK);

    // The message survives the TLV round trip as one JSON document.
    let value: serde_json::Value =
        serde_json::from_str(&shown.message).expect("message should be JSON");
    assert_eq!(value["snapshot"]["neighbor"], "/r/b");
    assert_eq!(value["snapshot"]["status"], "ACTIVE");
    assert_eq!(value["snapshot"]["external"]["spectrum_dbm"], -45.0);
    assert_eq!(value["preview"]["cost"], 15);

    // The binary fields still ride alongside for non-JSON consumers.
    assert_eq!(shown.preview_cost, Some(15));
    assert_eq!(shown.metrics.unwrap().utilization, Some(0.65));
}

#[test]
fn repeated_set_is_idempotent() {
    let (mut mgr, _mock) = manager_with(test_config(), &[("/r/b", 12)]);
    let b = NeighborName::new("/r/b");
    let patch = ExternalMetricsPatch {
        bandwidth_mbps: Some(80.0),
        utilization: Some(0.4),
        packet_loss: Some(0.05),
        spectrum_dbm: Some(-60.0),
    };

    let mut previews = Vec::new();
    for _ in 0..2 {
        round_trip(
            &mut mgr,
            CommandFrame {
                verb: CommandVerb::Set,
                neighbor: b.clone(),
                metrics: Some(patch),
            },
        );
        let shown = round_trip(
            &mut mgr,
            CommandFrame {
                verb: CommandVerb::Get,
                neighbor: b.clone(),
                metrics: None,
            },
        );
        previews.push((shown.preview_cost, shown.metrics));
    }
    assert_eq!(previews[0].0, previews[1].0, "preview cost identical");
    assert_eq!(
        previews[0].1, previews[1].1,
        "snapshot metrics identical after repeated set"
    );
}

// ─── Preview reflects measurements but never routing ────────────────────────

#[test]
fn preview_tracks_measured_rtt_without_touching_routing_cost() {
    let (mut mgr, mock) = manager_with(test_config(), &[("/r/b", 12)]);
    let b = NeighborName::new("/r/b");
    mgr.start();

    let mut host = FakeHost::default();
    let mut face = FakeFace::default();
    mock.increment(Duration::from_secs(30));
    mgr.poll(&mut face);

    // Two samples only: below the cost-recomputation threshold, so the
    // routing cost must stay at the original.
    for _ in 0..2 {
        probe_cycle(
            &mut mgr,
            &mock,
            &mut host,
            &mut face,
            Duration::from_secs(61),
            Duration::from_millis(100),
        );
    }

    let shown = round_trip(
        &mut mgr,
        CommandFrame {
            verb: CommandVerb::Get,
            neighbor: b.clone(),
            metrics: None,
        },
    );
    // f_rtt = 1.5 at 100 ms; other factors at their absent defaults:
    // 12 × (0.4·1.5 + 0.3·1.3 + 0.2·1.02 + 0.1·1.4) = 16.13 → 16
    assert_eq!(shown.preview_cost, Some(16));

    // The preview never entered the routing path.
    assert_eq!(mgr.store().get(&b).unwrap().current_cost, 12.0);
    assert_eq!(host.lsa_builds, 0);
    assert!(host.costs.is_empty());
}

// ─── Error surfaces ─────────────────────────────────────────────────────────

#[test]
fn unknown_neighbor_yields_not_found_status() {
    let (mut mgr, _mock) = manager_with(test_config(), &[("/r/b", 12)]);
    for verb in [CommandVerb::Get, CommandVerb::Set] {
        let response = round_trip(
            &mut mgr,
            CommandFrame {
                verb,
                neighbor: NeighborName::new("/r/ghost"),
                metrics: Some(ExternalMetricsPatch {
                    utilization: Some(0.1),
                    ..Default::default()
                }),
            },
        );
        assert_eq!(response.status, STATUS_NOT_FOUND, "{verb:?}");
        assert!(response.message.contains("/r/ghost"));
    }
}

#[test]
fn out_of_range_metrics_yield_invalid_argument_status() {
    let (mut mgr, _mock) = manager_with(test_config(), &[("/r/b", 12)]);
    let response = round_trip(
        &mut mgr,
        CommandFrame {
            verb: CommandVerb::Set,
            neighbor: NeighborName::new("/r/b"),
            metrics: Some(ExternalMetricsPatch {
                packet_loss: Some(1.5),
                ..Default::default()
            }),
        },
    );
    assert_eq!(response.status, STATUS_INVALID_ARGUMENT);
    assert!(response.metrics.is_none());
    assert!(response.preview_cost.is_none());
}
