//! # RTB Frame Module
//!
//! Ranging command frames carried in the MAC payload of a data frame.
//!
//! ## Payload Layout
//!
//! Every ranging payload starts with the 3-byte frame id `"RTB"` followed by
//! the command byte. All multi-byte integers are little-endian.
//!
//! | Command | Code | Payload after the command byte |
//! |---|---|---|
//! | Range-Request | 0x01 | len, version, method, f_start(2), f_step, f_stop(2), caps, [0x01, tx_power] |
//! | Range-Accept | 0x02 | status, reject reason, method, caps |
//! | Time-Sync-Request | 0x11 | version |
//! | PMU-Start | 0x12 | - |
//! | Result-Request | 0x21 | result type, pair index, count(2), offset(2) |
//! | Result-Confirm | 0x22 | result type, pair index, count(2), values |
//! | Remote-Range-Request | 0x31 | len, version, reflector spec, method, f_start(2), f_step, f_stop(2), remote caps, [0x01, tx_power] |
//! | Remote-Range-Confirm | 0x32 | reflector spec, status, reject reason, distance(4), dqf, IE, [count, count x (distance(4), dqf)] |
//!
//! The `len` octet of both request frames counts the octets following it up to
//! and including the optional transmit power IE, which lets the decoder detect
//! the IE without guessing from the frame length.

use super::FrameError;
use super::address::AddrSpec;
use super::radio_frame::{FrameWriter, MacHeader, PHY_MAX_PACKET_SIZE, RadioFrame};
use crate::confirm::{AntennaPairResults, MeasurementPair, MeasurementResult};
use crate::pmu::{Capabilities, FrequencySweep, RemoteCapabilities};
use crate::status::RtbStatus;

/// Frame id prefixing every ranging payload
pub const RTB_FRAME_ID: [u8; 3] = *b"RTB";

/// Protocol version implemented by this crate
pub const RTB_PROTOCOL_VERSION: u8 = 0x01;

/// Information element id of the requested transmit power
pub const TX_POWER_IE_ID: u8 = 0x01;

/// Result type of per-frequency PMU values
pub const RESULT_TYPE_PMU_VALUES: u8 = 0x00;

/// aMaxMACSafePayloadSize of IEEE 802.15.4-2006
pub const MAX_MAC_SAFE_PAYLOAD_SIZE: usize = 102;

/// Octets of a Result-Confirm in front of the values
const RESULT_CONFIRM_HEADER_LEN: usize = RTB_FRAME_ID.len() + 5;

/// Values carried by one Result-Confirm frame
pub const MAX_RESULT_VALUES_PER_FRAME: usize = MAX_MAC_SAFE_PAYLOAD_SIZE - RESULT_CONFIRM_HEADER_LEN;

/// Length octet value of a Range-Request without transmit power IE
const RANGE_REQUEST_IE_LEN: usize = 8;
const TX_POWER_IE_LEN: usize = 2;

const NO_ADDITIONAL_RESULTS: u8 = 0x00;
const ANTENNA_DIV_RESULTS: u8 = 0x01;

/// Command codes of the ranging protocol
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum RtbCommand {
    RangeRequest = 0x01,
    RangeAccept = 0x02,
    TimeSyncRequest = 0x11,
    PmuStart = 0x12,
    ResultRequest = 0x21,
    ResultConfirm = 0x22,
    RemoteRangeRequest = 0x31,
    RemoteRangeConfirm = 0x32,
}

impl RtbCommand {
    pub fn from_u8(value: u8) -> Result<Self, FrameError> {
        match value {
            0x01 => Ok(RtbCommand::RangeRequest),
            0x02 => Ok(RtbCommand::RangeAccept),
            0x11 => Ok(RtbCommand::TimeSyncRequest),
            0x12 => Ok(RtbCommand::PmuStart),
            0x21 => Ok(RtbCommand::ResultRequest),
            0x22 => Ok(RtbCommand::ResultConfirm),
            0x31 => Ok(RtbCommand::RemoteRangeRequest),
            0x32 => Ok(RtbCommand::RemoteRangeConfirm),
            other => Err(FrameError::UnknownCommand(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RtbCommand::RangeRequest => "Range-Request",
            RtbCommand::RangeAccept => "Range-Accept",
            RtbCommand::TimeSyncRequest => "Time-Sync-Request",
            RtbCommand::PmuStart => "PMU-Start",
            RtbCommand::ResultRequest => "Result-Request",
            RtbCommand::ResultConfirm => "Result-Confirm",
            RtbCommand::RemoteRangeRequest => "Remote-Range-Request",
            RtbCommand::RemoteRangeConfirm => "Remote-Range-Confirm",
        }
    }

    /// Minimum number of payload octets following the command byte
    fn min_payload_len(self) -> usize {
        match self {
            RtbCommand::RangeRequest => 2,
            RtbCommand::RangeAccept => 4,
            RtbCommand::TimeSyncRequest => 1,
            RtbCommand::PmuStart => 0,
            RtbCommand::ResultRequest => 6,
            RtbCommand::ResultConfirm => 4,
            RtbCommand::RemoteRangeRequest => 2,
            RtbCommand::RemoteRangeConfirm => 13,
        }
    }

    /// Whether this frame is sent with acknowledgment and CSMA-CA
    ///
    /// Time-Sync-Request and PMU-Start are timing critical and go out directly.
    pub fn uses_csma_and_ack(self) -> bool {
        !matches!(self, RtbCommand::TimeSyncRequest | RtbCommand::PmuStart)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RangeRequestPayload {
    pub version: u8,
    pub method: u8,
    pub sweep: FrequencySweep,
    pub caps: Capabilities,
    pub tx_power: Option<u8>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum RangeAcceptPayload {
    Accepted { method: u8, caps: Capabilities },
    Rejected { reason: RtbStatus },
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct ResultRequestPayload {
    pub result_type: u8,
    pub pair_index: u8,
    pub count: u16,
    pub offset: u16,
}

/// One chunk of per-frequency values of one antenna pair
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct ResultConfirmPayload {
    pub result_type: u8,
    pub pair_index: u8,
    values: [u8; MAX_RESULT_VALUES_PER_FRAME],
    count: usize,
}

impl ResultConfirmPayload {
    /// Builds a chunk; values beyond one frame are cut off
    pub fn with(result_type: u8, pair_index: u8, values: &[u8]) -> Self {
        let count = values.len().min(MAX_RESULT_VALUES_PER_FRAME);
        let mut buffer = [0u8; MAX_RESULT_VALUES_PER_FRAME];
        buffer[..count].copy_from_slice(&values[..count]);
        Self {
            result_type,
            pair_index,
            values: buffer,
            count,
        }
    }

    pub fn values(&self) -> &[u8] {
        &self.values[..self.count]
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RemoteRangeRequestPayload {
    pub version: u8,
    pub reflector: AddrSpec,
    pub method: u8,
    pub sweep: FrequencySweep,
    pub remote_caps: RemoteCapabilities,
    pub tx_power: Option<u8>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RemoteRangeConfirmPayload {
    pub reflector: AddrSpec,
    pub result: MeasurementResult,
}

/// A decoded ranging command frame
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum RtbFrame {
    RangeRequest(RangeRequestPayload),
    RangeAccept(RangeAcceptPayload),
    TimeSyncRequest { version: u8 },
    PmuStart,
    ResultRequest(ResultRequestPayload),
    ResultConfirm(ResultConfirmPayload),
    RemoteRangeRequest(RemoteRangeRequestPayload),
    RemoteRangeConfirm(RemoteRangeConfirmPayload),
}

impl RtbFrame {
    pub fn command(&self) -> RtbCommand {
        match self {
            RtbFrame::RangeRequest(_) => RtbCommand::RangeRequest,
            RtbFrame::RangeAccept(_) => RtbCommand::RangeAccept,
            RtbFrame::TimeSyncRequest { .. } => RtbCommand::TimeSyncRequest,
            RtbFrame::PmuStart => RtbCommand::PmuStart,
            RtbFrame::ResultRequest(_) => RtbCommand::ResultRequest,
            RtbFrame::ResultConfirm(_) => RtbCommand::ResultConfirm,
            RtbFrame::RemoteRangeRequest(_) => RtbCommand::RemoteRangeRequest,
            RtbFrame::RemoteRangeConfirm(_) => RtbCommand::RemoteRangeConfirm,
        }
    }

    /// Encodes the frame behind the given MAC header
    ///
    /// # Arguments
    /// * `header` - Addressing, sequence number and ack request of the frame
    ///
    /// # Returns
    /// A PHY frame ready for transmission, or `BufferOverflow` if it does not fit
    pub fn encode(&self, header: &MacHeader) -> Result<RadioFrame, FrameError> {
        let mut payload = PayloadWriter::new();
        self.encode_payload(&mut payload)?;

        let mut frame = RadioFrame::new();
        let mut writer = FrameWriter::with(&mut frame.data);
        writer.prepend(payload.as_slice())?;
        header.prepend_to(&mut writer)?;
        frame.length = writer.finish();
        Ok(frame)
    }

    /// Decodes MAC header and ranging frame from a received PHY frame
    pub fn decode(frame: &RadioFrame) -> Result<(MacHeader, RtbFrame), FrameError> {
        let (header, payload) = frame.parse()?;
        Ok((header, Self::decode_payload(payload)?))
    }

    /// Decodes a MAC payload
    ///
    /// # Returns
    /// `BadMagic` if the payload is not a ranging frame, otherwise the frame or
    /// the first length/format violation found
    pub fn decode_payload(payload: &[u8]) -> Result<RtbFrame, FrameError> {
        if payload.len() < RTB_FRAME_ID.len() + 1 || payload[..RTB_FRAME_ID.len()] != RTB_FRAME_ID {
            return Err(FrameError::BadMagic);
        }
        let command = RtbCommand::from_u8(payload[RTB_FRAME_ID.len()])?;
        let body = &payload[RTB_FRAME_ID.len() + 1..];
        if body.len() < command.min_payload_len() {
            return Err(FrameError::TooShort);
        }
        let mut reader = PayloadReader::new(body);

        let frame = match command {
            RtbCommand::RangeRequest => RtbFrame::RangeRequest(decode_range_request(&mut reader)?),
            RtbCommand::RangeAccept => {
                let status = RtbStatus::from_u8(reader.u8()?);
                let reason = RtbStatus::from_u8(reader.u8()?);
                let method = reader.u8()?;
                let caps = Capabilities(reader.u8()?);
                if status.is_success() {
                    RtbFrame::RangeAccept(RangeAcceptPayload::Accepted { method, caps })
                } else {
                    RtbFrame::RangeAccept(RangeAcceptPayload::Rejected { reason })
                }
            }
            RtbCommand::TimeSyncRequest => RtbFrame::TimeSyncRequest { version: reader.u8()? },
            RtbCommand::PmuStart => RtbFrame::PmuStart,
            RtbCommand::ResultRequest => RtbFrame::ResultRequest(ResultRequestPayload {
                result_type: reader.u8()?,
                pair_index: reader.u8()?,
                count: reader.u16()?,
                offset: reader.u16()?,
            }),
            RtbCommand::ResultConfirm => {
                let result_type = reader.u8()?;
                let pair_index = reader.u8()?;
                let count = reader.u16()? as usize;
                if count > MAX_RESULT_VALUES_PER_FRAME || count > reader.remaining() {
                    return Err(FrameError::LengthMismatch);
                }
                let values = reader.take(count)?;
                RtbFrame::ResultConfirm(ResultConfirmPayload::with(result_type, pair_index, values))
            }
            RtbCommand::RemoteRangeRequest => RtbFrame::RemoteRangeRequest(decode_remote_range_request(&mut reader)?),
            RtbCommand::RemoteRangeConfirm => RtbFrame::RemoteRangeConfirm(decode_remote_range_confirm(&mut reader)?),
        };
        Ok(frame)
    }

    fn encode_payload(&self, w: &mut PayloadWriter) -> Result<(), FrameError> {
        w.put_slice(&RTB_FRAME_ID)?;
        w.put_u8(self.command() as u8)?;

        match self {
            RtbFrame::RangeRequest(req) => {
                let len = RANGE_REQUEST_IE_LEN + if req.tx_power.is_some() { TX_POWER_IE_LEN } else { 0 };
                w.put_u8(len as u8)?;
                w.put_u8(req.version)?;
                w.put_u8(req.method)?;
                put_sweep(w, &req.sweep)?;
                w.put_u8(req.caps.0)?;
                put_tx_power(w, req.tx_power)?;
            }
            RtbFrame::RangeAccept(accept) => match accept {
                RangeAcceptPayload::Accepted { method, caps } => {
                    w.put_slice(&[RtbStatus::Success as u8, RtbStatus::Success as u8, *method, caps.0])?;
                }
                RangeAcceptPayload::Rejected { reason } => {
                    w.put_slice(&[RtbStatus::Reject as u8, *reason as u8, 0, 0])?;
                }
            },
            RtbFrame::TimeSyncRequest { version } => w.put_u8(*version)?,
            RtbFrame::PmuStart => {}
            RtbFrame::ResultRequest(req) => {
                w.put_u8(req.result_type)?;
                w.put_u8(req.pair_index)?;
                w.put_u16(req.count)?;
                w.put_u16(req.offset)?;
            }
            RtbFrame::ResultConfirm(conf) => {
                w.put_u8(conf.result_type)?;
                w.put_u8(conf.pair_index)?;
                w.put_u16(conf.count as u16)?;
                w.put_slice(conf.values())?;
            }
            RtbFrame::RemoteRangeRequest(req) => {
                let len = RANGE_REQUEST_IE_LEN + req.reflector.embedded_len() + if req.tx_power.is_some() { TX_POWER_IE_LEN } else { 0 };
                w.put_u8(len as u8)?;
                w.put_u8(req.version)?;
                w.put_embedded(&req.reflector)?;
                w.put_u8(req.method)?;
                put_sweep(w, &req.sweep)?;
                w.put_u8(req.remote_caps.0)?;
                put_tx_power(w, req.tx_power)?;
            }
            RtbFrame::RemoteRangeConfirm(conf) => {
                w.put_embedded(&conf.reflector)?;
                let result = &conf.result;
                if result.is_success() {
                    w.put_u8(RtbStatus::Success as u8)?;
                    w.put_u8(0)?;
                } else {
                    w.put_u8(RtbStatus::Reject as u8)?;
                    w.put_u8(result.status() as u8)?;
                }
                w.put_u32(result.distance_cm())?;
                w.put_u8(result.dqf())?;
                if result.pairs().is_empty() {
                    w.put_u8(NO_ADDITIONAL_RESULTS)?;
                } else {
                    w.put_u8(ANTENNA_DIV_RESULTS)?;
                    w.put_u8(result.pairs().len() as u8)?;
                    for pair in result.pairs() {
                        w.put_u32(pair.distance_cm)?;
                        w.put_u8(pair.dqf)?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn put_sweep(w: &mut PayloadWriter, sweep: &FrequencySweep) -> Result<(), FrameError> {
    w.put_u16(sweep.start_mhz)?;
    w.put_u8(sweep.step)?;
    w.put_u16(sweep.stop_mhz)
}

fn put_tx_power(w: &mut PayloadWriter, tx_power: Option<u8>) -> Result<(), FrameError> {
    match tx_power {
        Some(power) => w.put_slice(&[TX_POWER_IE_ID, power]),
        None => Ok(()),
    }
}

fn read_sweep(r: &mut PayloadReader<'_>) -> Result<FrequencySweep, FrameError> {
    let start_mhz = r.u16()?;
    let step = r.u8()?;
    let stop_mhz = r.u16()?;
    Ok(FrequencySweep { start_mhz, step, stop_mhz })
}

/// Reads the optional transmit power IE from the octets the length field left over
fn read_tx_power(r: &mut PayloadReader<'_>, extra: usize) -> Result<Option<u8>, FrameError> {
    if extra < TX_POWER_IE_LEN {
        return Ok(None);
    }
    let id = r.u8()?;
    let value = r.u8()?;
    Ok(if id == TX_POWER_IE_ID { Some(value) } else { None })
}

fn decode_range_request(r: &mut PayloadReader<'_>) -> Result<RangeRequestPayload, FrameError> {
    let len = r.u8()? as usize;
    let version = r.u8()?;
    if version != RTB_PROTOCOL_VERSION {
        // Layout of other versions is unknown; the version alone decides the answer
        return Ok(RangeRequestPayload {
            version,
            method: 0,
            sweep: FrequencySweep::with(0, 0, 0),
            caps: Capabilities(0),
            tx_power: None,
        });
    }
    if len < RANGE_REQUEST_IE_LEN || r.remaining() + 1 < len {
        return Err(FrameError::LengthMismatch);
    }
    let method = r.u8()?;
    let sweep = read_sweep(r)?;
    let caps = Capabilities(r.u8()?);
    let tx_power = read_tx_power(r, len - RANGE_REQUEST_IE_LEN)?;
    Ok(RangeRequestPayload {
        version,
        method,
        sweep,
        caps,
        tx_power,
    })
}

fn decode_remote_range_request(r: &mut PayloadReader<'_>) -> Result<RemoteRangeRequestPayload, FrameError> {
    let len = r.u8()? as usize;
    let version = r.u8()?;
    if version != RTB_PROTOCOL_VERSION {
        return Ok(RemoteRangeRequestPayload {
            version,
            reflector: AddrSpec::NONE,
            method: 0,
            sweep: FrequencySweep::with(0, 0, 0),
            remote_caps: RemoteCapabilities(0),
            tx_power: None,
        });
    }
    let reflector = r.embedded()?;
    let fixed = RANGE_REQUEST_IE_LEN + reflector.embedded_len();
    if len < fixed || r.remaining() + 1 + reflector.embedded_len() < len {
        return Err(FrameError::LengthMismatch);
    }
    let method = r.u8()?;
    let sweep = read_sweep(r)?;
    let remote_caps = RemoteCapabilities(r.u8()?);
    let tx_power = read_tx_power(r, len - fixed)?;
    Ok(RemoteRangeRequestPayload {
        version,
        reflector,
        method,
        sweep,
        remote_caps,
        tx_power,
    })
}

fn decode_remote_range_confirm(r: &mut PayloadReader<'_>) -> Result<RemoteRangeConfirmPayload, FrameError> {
    let reflector = r.embedded()?;
    let status = RtbStatus::from_u8(r.u8()?);
    let reason = RtbStatus::from_u8(r.u8()?);
    let distance_cm = r.u32()?;
    let dqf = r.u8()?;
    let ie = r.u8()?;

    let result = if status.is_success() {
        let mut pairs = AntennaPairResults::new();
        if ie == ANTENNA_DIV_RESULTS {
            let count = r.u8()? as usize;
            for _ in 0..count {
                let distance_cm = r.u32()?;
                let dqf = r.u8()?;
                pairs.push(MeasurementPair { distance_cm, dqf });
            }
        }
        MeasurementResult::success(distance_cm, dqf).with_pairs(pairs)
    } else {
        MeasurementResult::failure(reason)
    };
    Ok(RemoteRangeConfirmPayload { reflector, result })
}

/// Forward writer for the MAC payload
struct PayloadWriter {
    buffer: [u8; PHY_MAX_PACKET_SIZE],
    len: usize,
}

impl PayloadWriter {
    fn new() -> Self {
        Self {
            buffer: [0; PHY_MAX_PACKET_SIZE],
            len: 0,
        }
    }

    fn put_slice(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        if self.len + bytes.len() > self.buffer.len() {
            return Err(FrameError::BufferOverflow);
        }
        self.buffer[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }

    fn put_u8(&mut self, value: u8) -> Result<(), FrameError> {
        self.put_slice(&[value])
    }

    fn put_u16(&mut self, value: u16) -> Result<(), FrameError> {
        self.put_slice(&value.to_le_bytes())
    }

    fn put_u32(&mut self, value: u32) -> Result<(), FrameError> {
        self.put_slice(&value.to_le_bytes())
    }

    fn put_embedded(&mut self, spec: &AddrSpec) -> Result<(), FrameError> {
        let mut buffer = [0u8; 11];
        let len = spec.write_embedded(&mut buffer)?;
        self.put_slice(&buffer[..len])
    }

    fn as_slice(&self) -> &[u8] {
        &self.buffer[..self.len]
    }
}

/// Bounds-checked reader over a MAC payload
struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FrameError> {
        if self.remaining() < n {
            return Err(FrameError::TooShort);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, FrameError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, FrameError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, FrameError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn embedded(&mut self) -> Result<AddrSpec, FrameError> {
        let (spec, consumed) = AddrSpec::read_embedded(&self.data[self.pos..])?;
        self.pos += consumed;
        Ok(spec)
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    const SHORT_A: AddrSpec = AddrSpec::short_with(0x1234, 0x0001);
    const SHORT_B: AddrSpec = AddrSpec::short_with(0x1234, 0x0002);
    const LONG_A: AddrSpec = AddrSpec::long_with(0x1234, 0x0004_25FF_FF00_0001);
    const LONG_B: AddrSpec = AddrSpec::long_with(0x4321, 0x0004_25FF_FF00_0002);

    fn header(src: AddrSpec, dst: AddrSpec) -> MacHeader {
        MacHeader {
            sequence_number: 7,
            ack_request: true,
            destination: dst,
            source: src,
        }
    }

    fn range_request(tx_power: Option<u8>) -> RtbFrame {
        RtbFrame::RangeRequest(RangeRequestPayload {
            version: RTB_PROTOCOL_VERSION,
            method: 0x01,
            sweep: FrequencySweep::with(2403, 2, 2443),
            caps: Capabilities(0b10),
            tx_power,
        })
    }

    fn sample_frames() -> Vec<RtbFrame> {
        let mut pairs = AntennaPairResults::new();
        pairs.push(MeasurementPair { distance_cm: 101, dqf: 80 });
        pairs.push(MeasurementPair { distance_cm: 97, dqf: 60 });

        vec![
            range_request(Some(0xAF)),
            range_request(None),
            RtbFrame::RangeAccept(RangeAcceptPayload::Accepted {
                method: 0x01,
                caps: Capabilities(0b11),
            }),
            RtbFrame::RangeAccept(RangeAcceptPayload::Rejected {
                reason: RtbStatus::UnsupportedMethod,
            }),
            RtbFrame::TimeSyncRequest {
                version: RTB_PROTOCOL_VERSION,
            },
            RtbFrame::PmuStart,
            RtbFrame::ResultRequest(ResultRequestPayload {
                result_type: RESULT_TYPE_PMU_VALUES,
                pair_index: 3,
                count: 407,
                offset: 94,
            }),
            RtbFrame::ResultConfirm(ResultConfirmPayload::with(RESULT_TYPE_PMU_VALUES, 1, &[0x10; MAX_RESULT_VALUES_PER_FRAME])),
            RtbFrame::RemoteRangeRequest(RemoteRangeRequestPayload {
                version: RTB_PROTOCOL_VERSION,
                reflector: LONG_B,
                method: 0x01,
                sweep: FrequencySweep::with(2410, 1, 2480),
                remote_caps: RemoteCapabilities::with(true, true),
                tx_power: Some(0x20),
            }),
            RtbFrame::RemoteRangeRequest(RemoteRangeRequestPayload {
                version: RTB_PROTOCOL_VERSION,
                reflector: SHORT_B,
                method: 0x01,
                sweep: FrequencySweep::with(2403, 2, 2443),
                remote_caps: RemoteCapabilities(0),
                tx_power: None,
            }),
            RtbFrame::RemoteRangeConfirm(RemoteRangeConfirmPayload {
                reflector: SHORT_B,
                result: MeasurementResult::success(99, 70).with_pairs(pairs),
            }),
            RtbFrame::RemoteRangeConfirm(RemoteRangeConfirmPayload {
                reflector: LONG_B,
                result: MeasurementResult::failure(RtbStatus::Timeout),
            }),
        ]
    }

    // ====== Round Trip ======

    #[test]
    fn every_frame_kind_survives_every_addressing_combination() {
        let combinations = [(SHORT_A, SHORT_B), (SHORT_A, LONG_B), (LONG_A, SHORT_B), (LONG_A, LONG_B)];
        for (src, dst) in combinations {
            for frame in sample_frames() {
                let hdr = header(src, dst);
                let encoded = frame.encode(&hdr).unwrap();
                let (decoded_header, decoded) = RtbFrame::decode(&encoded).unwrap();
                assert_eq!(decoded_header, hdr);
                assert_eq!(decoded, frame);
            }
        }
    }

    // ====== Wire Layout ======

    #[test]
    fn range_request_payload_layout() {
        let mut w = PayloadWriter::new();
        range_request(Some(0xAF)).encode_payload(&mut w).unwrap();
        assert_eq!(w.as_slice(), &[b'R', b'T', b'B', 0x01, 10, 0x01, 0x01, 0x63, 0x09, 0x02, 0x8B, 0x09, 0x02, 0x01, 0xAF]);
    }

    #[test]
    fn largest_result_confirm_fits_safe_payload() {
        let frame = RtbFrame::ResultConfirm(ResultConfirmPayload::with(0, 0, &[0u8; 200]));
        let mut w = PayloadWriter::new();
        frame.encode_payload(&mut w).unwrap();
        assert_eq!(w.as_slice().len(), MAX_MAC_SAFE_PAYLOAD_SIZE);
        assert_eq!(MAX_RESULT_VALUES_PER_FRAME, 94);
    }

    #[test]
    fn rejected_accept_is_zero_filled() {
        let frame = RtbFrame::RangeAccept(RangeAcceptPayload::Rejected {
            reason: RtbStatus::UnsupportedRanging,
        });
        let mut w = PayloadWriter::new();
        frame.encode_payload(&mut w).unwrap();
        assert_eq!(&w.as_slice()[4..], &[0x83, 0x87, 0x00, 0x00]);
    }

    // ====== Decoding Errors ======

    #[test]
    fn foreign_payload_is_not_for_ranging() {
        assert_eq!(RtbFrame::decode_payload(b"XYZ\x01"), Err(FrameError::BadMagic));
        assert_eq!(RtbFrame::decode_payload(b"RT"), Err(FrameError::BadMagic));
    }

    #[test]
    fn unknown_command_is_reported() {
        assert_eq!(RtbFrame::decode_payload(b"RTB\x7F"), Err(FrameError::UnknownCommand(0x7F)));
    }

    #[test]
    fn truncated_frames_are_rejected() {
        assert_eq!(RtbFrame::decode_payload(b"RTB\x02\x00\x00"), Err(FrameError::TooShort));
        assert_eq!(RtbFrame::decode_payload(b"RTB\x21\x00\x00\x05\x00"), Err(FrameError::TooShort));
        // count claims more values than present
        assert_eq!(RtbFrame::decode_payload(b"RTB\x22\x00\x00\x05\x00\x01\x02"), Err(FrameError::LengthMismatch));
    }

    #[test]
    fn other_protocol_version_still_decodes() {
        match RtbFrame::decode_payload(b"RTB\x01\x08\x02") {
            Ok(RtbFrame::RangeRequest(req)) => assert_eq!(req.version, 2),
            other => panic!("Expected RangeRequest, got: {:?}", other.map(|f| core::mem::discriminant(&f))),
        }
    }
}
