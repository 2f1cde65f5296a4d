//! # Address Specifications
//!
//! IEEE 802.15.4 addressing as used by the ranging protocol: every party of a
//! transaction (Initiator, Reflector, Coordinator) is described by an address
//! mode, a PAN identifier and either a 16-bit short or a 64-bit extended address.

use super::FrameError;

/// Broadcast short address; never a usable own address
pub const BROADCAST_SHORT_ADDRESS: u16 = 0xFFFF;

/// Short address value meaning "associated, but no short address assigned"
pub const NO_SHORT_ADDRESS: u16 = 0xFFFE;

/// Addressing mode of one address field
///
/// The discriminants are the two-bit values used in the frame control field
/// and in the reflector address specification of remote ranging frames.
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum AddrMode {
    /// Field not present (0)
    None = 0,
    /// 16-bit short address (2)
    Short = 2,
    /// 64-bit extended address (3)
    Long = 3,
}

impl AddrMode {
    pub fn from_u8(value: u8) -> Result<Self, FrameError> {
        match value {
            0 => Ok(AddrMode::None),
            2 => Ok(AddrMode::Short),
            3 => Ok(AddrMode::Long),
            other => Err(FrameError::UnsupportedAddressMode(other)),
        }
    }

    /// Number of address octets this mode occupies on the wire
    pub fn address_len(self) -> usize {
        match self {
            AddrMode::None => 0,
            AddrMode::Short => 2,
            AddrMode::Long => 8,
        }
    }
}

/// Full address specification of a ranging party
///
/// `address` always holds the value widened to 64 bits. For short addresses
/// only the lower 16 bits are meaningful, which matches how the value is
/// copied in and out of frames.
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct AddrSpec {
    pub mode: AddrMode,
    pub pan_id: u16,
    pub address: u64,
}

impl AddrSpec {
    /// Address specification that is not set
    pub const NONE: AddrSpec = AddrSpec {
        mode: AddrMode::None,
        pan_id: 0,
        address: 0,
    };

    pub const fn short_with(pan_id: u16, short_address: u16) -> Self {
        Self {
            mode: AddrMode::Short,
            pan_id,
            address: short_address as u64,
        }
    }

    pub const fn long_with(pan_id: u16, ieee_address: u64) -> Self {
        Self {
            mode: AddrMode::Long,
            pan_id,
            address: ieee_address,
        }
    }

    pub fn is_none(&self) -> bool {
        self.mode == AddrMode::None
    }

    /// Returns the short address if this specification uses short addressing
    pub fn short_address(&self) -> Option<u16> {
        match self.mode {
            AddrMode::Short => Some(self.address as u16),
            _ => None,
        }
    }

    /// Writes the address octets (little-endian) into `buffer`
    ///
    /// # Returns
    /// Number of octets written (0, 2 or 8)
    pub(crate) fn write_address(&self, buffer: &mut [u8]) -> Result<usize, FrameError> {
        let len = self.mode.address_len();
        if buffer.len() < len {
            return Err(FrameError::BufferOverflow);
        }
        match self.mode {
            AddrMode::None => {}
            AddrMode::Short => buffer[..2].copy_from_slice(&(self.address as u16).to_le_bytes()),
            AddrMode::Long => buffer[..8].copy_from_slice(&self.address.to_le_bytes()),
        }
        Ok(len)
    }

    /// Reads `mode.address_len()` little-endian octets from `data`
    pub(crate) fn read_address(mode: AddrMode, data: &[u8]) -> Result<u64, FrameError> {
        match mode {
            AddrMode::None => Ok(0),
            AddrMode::Short => {
                if data.len() < 2 {
                    return Err(FrameError::TooShort);
                }
                Ok(u16::from_le_bytes([data[0], data[1]]) as u64)
            }
            AddrMode::Long => {
                if data.len() < 8 {
                    return Err(FrameError::TooShort);
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&data[..8]);
                Ok(u64::from_le_bytes(bytes))
            }
        }
    }

    /// Length of this specification in the embedded (mode, PAN, address) wire form
    pub(crate) fn embedded_len(&self) -> usize {
        3 + self.mode.address_len()
    }

    /// Encodes mode, PAN id and address as carried inside remote ranging frames
    pub(crate) fn write_embedded(&self, buffer: &mut [u8]) -> Result<usize, FrameError> {
        if self.mode == AddrMode::None {
            return Err(FrameError::UnsupportedAddressMode(0));
        }
        if buffer.len() < self.embedded_len() {
            return Err(FrameError::BufferOverflow);
        }
        buffer[0] = self.mode as u8;
        buffer[1..3].copy_from_slice(&self.pan_id.to_le_bytes());
        let written = self.write_address(&mut buffer[3..])?;
        Ok(3 + written)
    }

    /// Decodes an embedded address specification
    ///
    /// # Returns
    /// The specification and the number of octets consumed
    pub(crate) fn read_embedded(data: &[u8]) -> Result<(Self, usize), FrameError> {
        if data.len() < 3 {
            return Err(FrameError::TooShort);
        }
        let mode = AddrMode::from_u8(data[0])?;
        if mode == AddrMode::None {
            return Err(FrameError::UnsupportedAddressMode(0));
        }
        let pan_id = u16::from_le_bytes([data[1], data[2]]);
        let address = Self::read_address(mode, &data[3..])?;
        Ok((AddrSpec { mode, pan_id, address }, 3 + mode.address_len()))
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn embedded_short_spec_is_five_octets() {
        let spec = AddrSpec::short_with(0xCAFE, 0x1234);
        let mut buffer = [0u8; 16];
        let len = spec.write_embedded(&mut buffer).unwrap();
        assert_eq!(len, 5);
        assert_eq!(&buffer[..5], &[2, 0xFE, 0xCA, 0x34, 0x12]);

        let (decoded, consumed) = AddrSpec::read_embedded(&buffer[..len]).unwrap();
        assert_eq!(consumed, 5);
        assert_eq!(decoded, spec);
    }

    #[test]
    fn embedded_long_spec_is_eleven_octets() {
        let spec = AddrSpec::long_with(0x0001, 0x0011_2233_4455_6677);
        let mut buffer = [0u8; 16];
        assert_eq!(spec.write_embedded(&mut buffer).unwrap(), 11);
        assert_eq!(buffer[3], 0x77);
        assert_eq!(buffer[10], 0x00);
    }

    #[test]
    fn truncated_long_address_is_rejected() {
        let data = [3u8, 0x01, 0x00, 0xAA, 0xBB];
        assert_eq!(AddrSpec::read_embedded(&data), Err(FrameError::TooShort));
    }

    #[test]
    fn mode_none_is_not_embeddable() {
        let mut buffer = [0u8; 16];
        assert_eq!(AddrSpec::NONE.write_embedded(&mut buffer), Err(FrameError::UnsupportedAddressMode(0)));
        assert_eq!(AddrMode::from_u8(1), Err(FrameError::UnsupportedAddressMode(1)));
    }
}
