//! # Radio Frame Module
//!
//! PHY frame buffer and IEEE 802.15.4 MAC header handling.
//!
//! ## Buffer Layout
//!
//! - Byte 0: PHY length (MPDU length including the 2-byte FCS)
//! - Bytes 1..: MPDU (MAC header, MAC payload, FCS slot)
//!
//! The FCS itself is computed by the transceiver; the frame only reserves room
//! for it so the PHY length is correct.
//!
//! ## Header Encoding
//!
//! [`FrameWriter`] fills the buffer from the end towards the start. Callers push
//! the payload first and the header fields in reverse order afterwards, then
//! [`FrameWriter::finish`] moves the assembled MPDU behind the length byte.

use super::FrameError;
use super::address::{AddrMode, AddrSpec};

/// Maximum PSDU size of the 2.4 GHz O-QPSK PHY
pub const PHY_MAX_PACKET_SIZE: usize = 127;

/// Length of the frame check sequence appended by the transceiver
pub const FCS_LEN: usize = 2;

/// Frame buffer size: one PHY length octet plus the largest PSDU
pub const RADIO_FRAME_BUFFER_SIZE: usize = PHY_MAX_PACKET_SIZE + 1;

/// Frame type value of a MAC data frame
const FCF_FRAMETYPE_DATA: u16 = 0b001;
const FCF_FRAMETYPE_MASK: u16 = 0b111;
const FCF_ACK_REQUEST: u16 = 1 << 5;
const FCF_PAN_ID_COMPRESSION: u16 = 1 << 6;
const FCF_DEST_ADDR_MODE_SHIFT: u16 = 10;
const FCF_SOURCE_ADDR_MODE_SHIFT: u16 = 14;
const FCF_ADDR_MODE_MASK: u16 = 0b11;

/// PHY frame as handed to and received from the link layer
///
/// # Public Fields
/// `data` and `length` are public so link layer implementations can move the
/// frame into and out of transceiver buffers without extra copies.
#[derive(Clone)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RadioFrame {
    /// PHY length octet followed by the MPDU
    pub data: [u8; RADIO_FRAME_BUFFER_SIZE],

    /// MPDU length including FCS (equals `data[0]`)
    pub length: usize,
}

impl RadioFrame {
    pub const fn new() -> Self {
        Self {
            data: [0; RADIO_FRAME_BUFFER_SIZE],
            length: 0,
        }
    }

    /// Builds a frame from a received MPDU (including the FCS octets)
    pub fn from_mpdu(mpdu: &[u8]) -> Result<Self, FrameError> {
        if mpdu.len() > PHY_MAX_PACKET_SIZE {
            return Err(FrameError::BufferOverflow);
        }
        let mut frame = Self::new();
        frame.data[0] = mpdu.len() as u8;
        frame.data[1..1 + mpdu.len()].copy_from_slice(mpdu);
        frame.length = mpdu.len();
        Ok(frame)
    }

    /// MPDU including the FCS slot
    pub fn mpdu(&self) -> &[u8] {
        let len = self.length.min(PHY_MAX_PACKET_SIZE);
        &self.data[1..1 + len]
    }

    /// Splits the frame into its MAC header and MAC payload (FCS excluded)
    pub fn parse(&self) -> Result<(MacHeader, &[u8]), FrameError> {
        let mpdu = self.mpdu();
        if mpdu.len() < FCS_LEN {
            return Err(FrameError::TooShort);
        }
        let without_fcs = &mpdu[..mpdu.len() - FCS_LEN];
        let (header, header_len) = MacHeader::parse(without_fcs)?;
        Ok((header, &without_fcs[header_len..]))
    }
}

impl Default for RadioFrame {
    fn default() -> Self {
        Self::new()
    }
}

/// Parsed or to-be-encoded IEEE 802.15.4 data frame header
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct MacHeader {
    pub sequence_number: u8,
    pub ack_request: bool,
    pub destination: AddrSpec,
    pub source: AddrSpec,
}

impl MacHeader {
    /// PAN-ID compression applies whenever both PAN ids are equal
    pub fn pan_id_compression(&self) -> bool {
        self.destination.pan_id == self.source.pan_id
    }

    pub fn frame_control(&self) -> u16 {
        let mut fcf = FCF_FRAMETYPE_DATA;
        if self.ack_request {
            fcf |= FCF_ACK_REQUEST;
        }
        if self.pan_id_compression() {
            fcf |= FCF_PAN_ID_COMPRESSION;
        }
        fcf |= (self.destination.mode as u16) << FCF_DEST_ADDR_MODE_SHIFT;
        fcf |= (self.source.mode as u16) << FCF_SOURCE_ADDR_MODE_SHIFT;
        fcf
    }

    /// Encoded header length in octets
    pub fn encoded_len(&self) -> usize {
        let src_pan = if self.pan_id_compression() { 0 } else { 2 };
        2 + 1 + 2 + self.destination.mode.address_len() + src_pan + self.source.mode.address_len()
    }

    /// Prepends the header in front of the payload already held by `writer`
    pub(crate) fn prepend_to(&self, writer: &mut FrameWriter<'_>) -> Result<(), FrameError> {
        let mut address = [0u8; 8];

        let len = self.source.write_address(&mut address)?;
        writer.prepend(&address[..len])?;
        if !self.pan_id_compression() {
            writer.prepend(&self.source.pan_id.to_le_bytes())?;
        }

        let len = self.destination.write_address(&mut address)?;
        writer.prepend(&address[..len])?;
        writer.prepend(&self.destination.pan_id.to_le_bytes())?;

        writer.prepend(&[self.sequence_number])?;
        writer.prepend(&self.frame_control().to_le_bytes())
    }

    /// Parses a MAC header from the start of `mpdu`
    ///
    /// # Returns
    /// The header and its length in octets
    pub fn parse(mpdu: &[u8]) -> Result<(Self, usize), FrameError> {
        if mpdu.len() < 3 {
            return Err(FrameError::TooShort);
        }
        let fcf = u16::from_le_bytes([mpdu[0], mpdu[1]]);
        if fcf & FCF_FRAMETYPE_MASK != FCF_FRAMETYPE_DATA {
            return Err(FrameError::UnsupportedFrameType);
        }
        let sequence_number = mpdu[2];
        let dst_mode = AddrMode::from_u8(((fcf >> FCF_DEST_ADDR_MODE_SHIFT) & FCF_ADDR_MODE_MASK) as u8)?;
        let src_mode = AddrMode::from_u8(((fcf >> FCF_SOURCE_ADDR_MODE_SHIFT) & FCF_ADDR_MODE_MASK) as u8)?;
        let compressed = fcf & FCF_PAN_ID_COMPRESSION != 0;

        let mut offset = 3;
        let mut destination = AddrSpec::NONE;
        if dst_mode != AddrMode::None {
            let pan_id = read_u16(mpdu, offset)?;
            offset += 2;
            let address = AddrSpec::read_address(dst_mode, &mpdu[offset..])?;
            offset += dst_mode.address_len();
            destination = AddrSpec {
                mode: dst_mode,
                pan_id,
                address,
            };
        }

        let mut source = AddrSpec::NONE;
        if src_mode != AddrMode::None {
            let pan_id = if compressed {
                destination.pan_id
            } else {
                let pan_id = read_u16(mpdu, offset)?;
                offset += 2;
                pan_id
            };
            let address = AddrSpec::read_address(src_mode, &mpdu[offset..])?;
            offset += src_mode.address_len();
            source = AddrSpec {
                mode: src_mode,
                pan_id,
                address,
            };
        }

        Ok((
            MacHeader {
                sequence_number,
                ack_request: fcf & FCF_ACK_REQUEST != 0,
                destination,
                source,
            },
            offset,
        ))
    }
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16, FrameError> {
    if data.len() < offset + 2 {
        return Err(FrameError::TooShort);
    }
    Ok(u16::from_le_bytes([data[offset], data[offset + 1]]))
}

/// Back-to-front writer over a [`RadioFrame`] buffer
///
/// Starts directly in front of the FCS slot and moves towards byte 1 with each
/// `prepend`. Byte 0 stays reserved for the PHY length.
pub(crate) struct FrameWriter<'a> {
    buffer: &'a mut [u8; RADIO_FRAME_BUFFER_SIZE],
    start: usize,
}

impl<'a> FrameWriter<'a> {
    const PAYLOAD_END: usize = RADIO_FRAME_BUFFER_SIZE - FCS_LEN;

    pub(crate) fn with(buffer: &'a mut [u8; RADIO_FRAME_BUFFER_SIZE]) -> Self {
        Self {
            buffer,
            start: Self::PAYLOAD_END,
        }
    }

    pub(crate) fn prepend(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        // byte 0 is the PHY length octet
        if bytes.len() > self.start - 1 {
            return Err(FrameError::BufferOverflow);
        }
        self.start -= bytes.len();
        self.buffer[self.start..self.start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Moves the MPDU behind the PHY length octet and fills in the length
    ///
    /// # Returns
    /// MPDU length including the FCS slot
    pub(crate) fn finish(self) -> usize {
        let body_len = Self::PAYLOAD_END - self.start;
        self.buffer.copy_within(self.start..Self::PAYLOAD_END, 1);
        let mpdu_len = body_len + FCS_LEN;
        self.buffer[1 + body_len..1 + mpdu_len].fill(0);
        self.buffer[0] = mpdu_len as u8;
        mpdu_len
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn header(dst: AddrSpec, src: AddrSpec) -> MacHeader {
        MacHeader {
            sequence_number: 0x5A,
            ack_request: true,
            destination: dst,
            source: src,
        }
    }

    fn encode(header: &MacHeader, payload: &[u8]) -> RadioFrame {
        let mut frame = RadioFrame::new();
        let mut writer = FrameWriter::with(&mut frame.data);
        writer.prepend(payload).unwrap();
        header.prepend_to(&mut writer).unwrap();
        frame.length = writer.finish();
        frame
    }

    #[test]
    fn compressed_short_header_layout() {
        let hdr = header(AddrSpec::short_with(0x1AAA, 0x0002), AddrSpec::short_with(0x1AAA, 0x0001));
        let frame = encode(&hdr, &[0xEE]);

        // FCF: data, ack request, PAN-ID compression, short/short
        assert_eq!(hdr.frame_control(), 0x8861);
        assert_eq!(frame.data[0] as usize, frame.length);
        assert_eq!(&frame.data[1..10], &[0x61, 0x88, 0x5A, 0xAA, 0x1A, 0x02, 0x00, 0x01, 0x00]);
        assert_eq!(frame.data[10], 0xEE);
        assert_eq!(frame.length, 9 + 1 + FCS_LEN);
    }

    #[test]
    fn different_pans_keep_source_pan() {
        let hdr = header(AddrSpec::long_with(0x0001, 0x1122_3344_5566_7788), AddrSpec::short_with(0x0002, 0xBEEF));
        assert!(!hdr.pan_id_compression());
        let frame = encode(&hdr, &[1, 2, 3]);

        let (parsed, payload) = frame.parse().unwrap();
        assert_eq!(parsed, hdr);
        assert_eq!(payload, &[1, 2, 3]);
        assert_eq!(hdr.encoded_len(), 2 + 1 + 2 + 8 + 2 + 2);
    }

    #[test]
    fn non_data_frame_is_rejected() {
        // beacon frame type
        let frame = RadioFrame::from_mpdu(&[0x00, 0x80, 0x01, 0x00, 0x00]).unwrap();
        assert_eq!(frame.parse().err(), Some(FrameError::UnsupportedFrameType));
    }

    #[test]
    fn oversized_payload_overflows() {
        let mut frame = RadioFrame::new();
        let mut writer = FrameWriter::with(&mut frame.data);
        let payload = [0u8; PHY_MAX_PACKET_SIZE];
        assert_eq!(writer.prepend(&payload), Err(FrameError::BufferOverflow));
    }
}
