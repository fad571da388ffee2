//! # Control-Channel TLV Codec
//!
//! Binary envelopes for the metrics control channel, using the type codes
//! registered with the host daemon's TLV registry.
//!
//! ## Command frame
//!
//! ```text
//! +------+--------+------+----------+--------------+------------------------+
//! | 210  | length | verb | name_len | name (utf-8) | ExternalMetrics? (211) |
//! | u8   | u16    | u8   | u16      | ...          | ...                    |
//! +------+--------+------+----------+--------------+------------------------+
//! ```
//!
//! ## Response frame
//!
//! ```text
//! +------+--------+--------+---------+-----+------+------+
//! | 210  | length | status | msg_len | msg | 211? | 216? |
//! +------+--------+--------+---------+-----+------+------+
//! ```
//!
//! An `ExternalMetrics` block (211) is a sequence of fixed 8-byte f64
//! entries, one per present field (codes 212–215). Unrecognized inner codes
//! are skipped on decode so the format can grow.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::name::NeighborName;
use crate::store::ExternalMetricsPatch;

/// TLV type codes added to the host daemon's registry.
pub mod codes {
    pub const LINK_METRICS_COMMAND: u8 = 210;
    pub const EXTERNAL_METRICS: u8 = 211;
    pub const BANDWIDTH: u8 = 212;
    pub const BANDWIDTH_UTILIZATION: u8 = 213;
    pub const PACKET_LOSS: u8 = 214;
    pub const SPECTRUM_STRENGTH: u8 = 215;
    pub const MULTI_DIMENSIONAL_COST: u8 = 216;
}

/// Response status codes. Chosen to line up with the CLI exit codes
/// (2 is reserved for client-side timeout/unreachable).
pub const STATUS_OK: u8 = 0;
pub const STATUS_INVALID_ARGUMENT: u8 = 1;
pub const STATUS_NOT_FOUND: u8 = 3;

#[derive(Debug, Error, PartialEq)]
pub enum TlvError {
    #[error("truncated TLV frame")]
    Truncated,
    #[error("unexpected TLV type {found}, expected {expected}")]
    UnexpectedType { expected: u8, found: u8 },
    #[error("malformed TLV value: {0}")]
    BadValue(String),
}

/// The control-channel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandVerb {
    Set = 1,
    Get = 2,
    /// Like `Get`, but the response message carries the serialized
    /// snapshot instead of the human-readable digest.
    GetJson = 3,
}

impl CommandVerb {
    fn from_u8(v: u8) -> Result<Self, TlvError> {
        match v {
            1 => Ok(CommandVerb::Set),
            2 => Ok(CommandVerb::Get),
            3 => Ok(CommandVerb::GetJson),
            other => Err(TlvError::BadValue(format!("unknown command verb {other}"))),
        }
    }
}

/// A decoded `LinkMetricsCommand`.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandFrame {
    pub verb: CommandVerb,
    pub neighbor: NeighborName,
    pub metrics: Option<ExternalMetricsPatch>,
}

/// A decoded control-channel response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFrame {
    pub status: u8,
    pub message: String,
    pub metrics: Option<ExternalMetricsPatch>,
    pub preview_cost: Option<u64>,
}

// ─── Encoding ───────────────────────────────────────────────────────────────

fn put_metrics_block(out: &mut BytesMut, metrics: &ExternalMetricsPatch) {
    let mut inner = BytesMut::new();
    for (code, value) in [
        (codes::BANDWIDTH, metrics.bandwidth_mbps),
        (codes::BANDWIDTH_UTILIZATION, metrics.utilization),
        (codes::PACKET_LOSS, metrics.packet_loss),
        (codes::SPECTRUM_STRENGTH, metrics.spectrum_dbm),
    ] {
        if let Some(v) = value {
            inner.put_u8(code);
            inner.put_u16(8);
            inner.put_f64(v);
        }
    }
    out.put_u8(codes::EXTERNAL_METRICS);
    out.put_u16(inner.len() as u16);
    out.put_slice(&inner);
}

fn put_outer(payload: BytesMut) -> Bytes {
    let mut out = BytesMut::with_capacity(payload.len() + 3);
    out.put_u8(codes::LINK_METRICS_COMMAND);
    out.put_u16(payload.len() as u16);
    out.put_slice(&payload);
    out.freeze()
}

/// Encode a command frame.
pub fn encode_command(frame: &CommandFrame) -> Bytes {
    let name = frame.neighbor.to_string();
    let mut payload = BytesMut::new();
    payload.put_u8(frame.verb as u8);
    payload.put_u16(name.len() as u16);
    payload.put_slice(name.as_bytes());
    if let Some(metrics) = &frame.metrics {
        put_metrics_block(&mut payload, metrics);
    }
    put_outer(payload)
}

/// Encode a response frame.
pub fn encode_response(frame: &ResponseFrame) -> Bytes {
    let mut payload = BytesMut::new();
    payload.put_u8(frame.status);
    payload.put_u16(frame.message.len() as u16);
    payload.put_slice(frame.message.as_bytes());
    if let Some(metrics) = &frame.metrics {
        put_metrics_block(&mut payload, metrics);
    }
    if let Some(cost) = frame.preview_cost {
        payload.put_u8(codes::MULTI_DIMENSIONAL_COST);
        payload.put_u16(8);
        payload.put_u64(cost);
    }
    put_outer(payload)
}

// ─── Decoding ───────────────────────────────────────────────────────────────

fn take_outer(buf: &mut impl Buf) -> Result<Bytes, TlvError> {
    if buf.remaining() < 3 {
        return Err(TlvError::Truncated);
    }
    let found = buf.get_u8();
    if found != codes::LINK_METRICS_COMMAND {
        return Err(TlvError::UnexpectedType {
            expected: codes::LINK_METRICS_COMMAND,
            found,
        });
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(TlvError::Truncated);
    }
    Ok(buf.copy_to_bytes(len))
}

fn take_string(buf: &mut impl Buf) -> Result<String, TlvError> {
    if buf.remaining() < 2 {
        return Err(TlvError::Truncated);
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(TlvError::Truncated);
    }
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| TlvError::BadValue("name is not utf-8".into()))
}

fn take_metrics_block(buf: &mut impl Buf) -> Result<ExternalMetricsPatch, TlvError> {
    if buf.remaining() < 2 {
        return Err(TlvError::Truncated);
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(TlvError::Truncated);
    }
    let mut inner = buf.copy_to_bytes(len);

    let mut patch = ExternalMetricsPatch::default();
    while inner.has_remaining() {
        if inner.remaining() < 3 {
            return Err(TlvError::Truncated);
        }
        let code = inner.get_u8();
        let value_len = inner.get_u16() as usize;
        if inner.remaining() < value_len {
            return Err(TlvError::Truncated);
        }
        match code {
            codes::BANDWIDTH | codes::BANDWIDTH_UTILIZATION | codes::PACKET_LOSS
            | codes::SPECTRUM_STRENGTH => {
                if value_len != 8 {
                    return Err(TlvError::BadValue(format!(
                        "metric TLV {code} has length {value_len}, expected 8"
                    )));
                }
                let v = inner.get_f64();
                match code {
                    codes::BANDWIDTH => patch.bandwidth_mbps = Some(v),
                    codes::BANDWIDTH_UTILIZATION => patch.utilization = Some(v),
                    codes::PACKET_LOSS => patch.packet_loss = Some(v),
                    _ => patch.spectrum_dbm = Some(v),
                }
            }
            _ => {
                // Unknown inner TLV: skip for forward compatibility.
                inner.advance(value_len);
            }
        }
    }
    Ok(patch)
}

/// Decode a command frame.
pub fn decode_command(mut buf: &[u8]) -> Result<CommandFrame, TlvError> {
    let mut payload = take_outer(&mut buf)?;
    if !payload.has_remaining() {
        return Err(TlvError::Truncated);
    }
    let verb = CommandVerb::from_u8(payload.get_u8())?;
    let name = take_string(&mut payload)?;
    if name.is_empty() {
        return Err(TlvError::BadValue("empty neighbor name".into()));
    }

    let mut metrics = None;
    while payload.has_remaining() {
        let code = payload.get_u8();
        match code {
            codes::EXTERNAL_METRICS => metrics = Some(take_metrics_block(&mut payload)?),
            _ => {
                if payload.remaining() < 2 {
                    return Err(TlvError::Truncated);
                }
                let len = payload.get_u16() as usize;
                if payload.remaining() < len {
                    return Err(TlvError::Truncated);
                }
                payload.advance(len);
            }
        }
    }

    Ok(CommandFrame {
        verb,
        neighbor: NeighborName::new(&name),
        metrics,
    })
}

/// Decode a response frame.
pub fn decode_response(mut buf: &[u8]) -> Result<ResponseFrame, TlvError> {
    let mut payload = take_outer(&mut buf)?;
    if !payload.has_remaining() {
        return Err(TlvError::Truncated);
    }
    let status = payload.get_u8();
    let message = take_string(&mut payload)?;

    let mut metrics = None;
    let mut preview_cost = None;
    while payload.has_remaining() {
        let code = payload.get_u8();
        match code {
            codes::EXTERNAL_METRICS => metrics = Some(take_metrics_block(&mut payload)?),
            codes::MULTI_DIMENSIONAL_COST => {
                if payload.remaining() < 2 {
                    return Err(TlvError::Truncated);
                }
                let len = payload.get_u16() as usize;
                if len != 8 || payload.remaining() < len {
                    return Err(TlvError::BadValue("bad preview cost length".into()));
                }
                preview_cost = Some(payload.get_u64());
            }
            _ => {
                if payload.remaining() < 2 {
                    return Err(TlvError::Truncated);
                }
                let len = payload.get_u16() as usize;
                if payload.remaining() < len {
                    return Err(TlvError::Truncated);
                }
                payload.advance(len);
            }
        }
    }

    Ok(ResponseFrame {
        status,
        message,
        metrics,
        preview_cost,
    })
}
