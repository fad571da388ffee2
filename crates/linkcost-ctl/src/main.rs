//! link-metrics — operator CLI for the link cost metrics channel.
//!
//! Sends TLV `LinkMetricsCommand` frames to a running daemon's control
//! socket over UDP and renders the response.
//!
//! Exit codes: 0 success, 1 validation error, 2 timeout/unreachable,
//! 3 neighbor not found.

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use linkcost_core::name::NeighborName;
use linkcost_core::store::ExternalMetricsPatch;
use linkcost_core::tlv::{
    decode_response, encode_command, CommandFrame, CommandVerb, ResponseFrame,
    STATUS_NOT_FOUND, STATUS_OK,
};

const EXIT_VALIDATION: u8 = 1;
const EXIT_UNREACHABLE: u8 = 2;
const EXIT_NOT_FOUND: u8 = 3;

/// Operator CLI for the link cost subsystem.
#[derive(Parser, Debug)]
#[command(name = "link-metrics", about = "Inspect and set external link metrics")]
struct Cli {
    /// Address of the daemon's metrics control socket.
    #[arg(long, default_value = "127.0.0.1:6363")]
    router: String,

    /// Seconds to wait for a response.
    #[arg(long, default_value_t = 4)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Set external metrics for a neighbor.
    Set {
        /// Neighbor router name, e.g. /nd/edu/router-b.
        neighbor: String,
        /// Link bandwidth in Mbps.
        #[arg(long, allow_negative_numbers = true)]
        bandwidth: Option<f64>,
        /// Bandwidth utilization in [0, 1].
        #[arg(long = "bandwidth-util", allow_negative_numbers = true)]
        bandwidth_util: Option<f64>,
        /// Packet loss rate in [0, 1].
        #[arg(long = "packet-loss", allow_negative_numbers = true)]
        packet_loss: Option<f64>,
        /// Received spectrum strength in dBm.
        #[arg(long, allow_negative_numbers = true)]
        spectrum: Option<f64>,
    },
    /// Show a neighbor's metrics snapshot and preview cost.
    Show {
        /// Neighbor router name.
        neighbor: String,
        /// Print the snapshot as a single JSON document.
        #[arg(long)]
        json: bool,
    },
}

fn validate(patch: &ExternalMetricsPatch) -> Result<(), String> {
    if let Some(bw) = patch.bandwidth_mbps {
        if !bw.is_finite() || bw < 0.0 {
            return Err(format!("--bandwidth must be non-negative Mbps, got {bw}"));
        }
    }
    if let Some(u) = patch.utilization {
        if !u.is_finite() || !(0.0..=1.0).contains(&u) {
            return Err(format!("--bandwidth-util must be within [0, 1], got {u}"));
        }
    }
    if let Some(l) = patch.packet_loss {
        if !l.is_finite() || !(0.0..=1.0).contains(&l) {
            return Err(format!("--packet-loss must be within [0, 1], got {l}"));
        }
    }
    if let Some(s) = patch.spectrum_dbm {
        if !s.is_finite() {
            return Err(format!("--spectrum must be a finite dBm value, got {s}"));
        }
    }
    Ok(())
}

fn build_frame(command: &Command) -> Result<CommandFrame, String> {
    match command {
        Command::Set {
            neighbor,
            bandwidth,
            bandwidth_util,
            packet_loss,
            spectrum,
        } => {
            let name = NeighborName::new(neighbor);
            if name.is_empty() {
                return Err(format!("invalid neighbor name {neighbor:?}"));
            }
            let patch = ExternalMetricsPatch {
                bandwidth_mbps: *bandwidth,
                utilization: *bandwidth_util,
                packet_loss: *packet_loss,
                spectrum_dbm: *spectrum,
            };
            if patch.is_empty() {
                return Err("set requires at least one metric option".into());
            }
            validate(&patch)?;
            Ok(CommandFrame {
                verb: CommandVerb::Set,
                neighbor: name,
                metrics: Some(patch),
            })
        }
        Command::Show { neighbor, json } => {
            let name = NeighborName::new(neighbor);
            if name.is_empty() {
                return Err(format!("invalid neighbor name {neighbor:?}"));
            }
            Ok(CommandFrame {
                verb: if *json {
                    CommandVerb::GetJson
                } else {
                    CommandVerb::Get
                },
                neighbor: name,
                metrics: None,
            })
        }
    }
}

/// Send the frame and wait for the response datagram.
fn transact(router: &str, timeout: Duration, frame: &CommandFrame) -> Result<ResponseFrame, String> {
    let socket = UdpSocket::bind("0.0.0.0:0").map_err(|e| format!("socket: {e}"))?;
    socket
        .set_read_timeout(Some(timeout))
        .map_err(|e| format!("socket: {e}"))?;
    socket
        .connect(router)
        .map_err(|e| format!("cannot reach {router}: {e}"))?;

    let wire = encode_command(frame);
    tracing::debug!(router, verb = ?frame.verb, bytes = wire.len(), "sending command");
    socket.send(&wire).map_err(|e| format!("send failed: {e}"))?;

    let mut buf = [0u8; 4096];
    let len = socket.recv(&mut buf).map_err(|e| match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => format!("no response from {router} within {}s", timeout.as_secs()),
        _ => format!("receive failed: {e}"),
    })?;

    decode_response(&buf[..len]).map_err(|e| format!("malformed response: {e}"))
}

fn render(response: &ResponseFrame) {
    println!("{}", response.message);
    if let Some(metrics) = &response.metrics {
        if let Some(bw) = metrics.bandwidth_mbps {
            println!("  bandwidth:      {bw} Mbps");
        }
        if let Some(u) = metrics.utilization {
            println!("  utilization:    {u}");
        }
        if let Some(l) = metrics.packet_loss {
            println!("  packet loss:    {l}");
        }
        if let Some(s) = metrics.spectrum_dbm {
            println!("  spectrum:       {s} dBm");
        }
    }
    if let Some(cost) = response.preview_cost {
        println!("  preview cost:   {cost}");
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    let frame = match build_frame(&cli.command) {
        Ok(frame) => frame,
        Err(message) => {
            eprintln!("link-metrics: {message}");
            return ExitCode::from(EXIT_VALIDATION);
        }
    };

    let response = match transact(&cli.router, Duration::from_secs(cli.timeout), &frame) {
        Ok(response) => response,
        Err(message) => {
            eprintln!("link-metrics: {message}");
            return ExitCode::from(EXIT_UNREACHABLE);
        }
    };

    match response.status {
        STATUS_OK => {
            if frame.verb == CommandVerb::GetJson {
                // The message IS the JSON document.
                println!("{}", response.message);
            } else {
                render(&response);
            }
            ExitCode::SUCCESS
        }
        STATUS_NOT_FOUND => {
            eprintln!("link-metrics: {}", response.message);
            ExitCode::from(EXIT_NOT_FOUND)
        }
        _ => {
            eprintln!("link-metrics: {}", response.message);
            ExitCode::from(EXIT_VALIDATION)
        }
    }
}
