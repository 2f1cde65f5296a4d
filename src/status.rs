//! # Ranging Status Codes
//!
//! Single status enumeration shared by confirms, frames and attribute access.
//! Values are carried on the wire as one byte, so every variant has a fixed
//! discriminant. Link-layer statuses reuse the IEEE 802.15.4 MAC enumeration
//! values, ranging specific statuses live in the 0x81.. block.

/// Status of a ranging request, attribute access or received rejection
///
/// # Encoding
/// Each variant is encoded as a single byte. Unknown bytes decode to
/// [`RtbStatus::Reject`] so a peer speaking a newer dialect still produces a
/// failure instead of an accidental success.
///
/// # Examples
/// ```rust
/// use rtb_ranging_lib::RtbStatus;
///
/// assert_eq!(RtbStatus::from_u8(0x84), RtbStatus::Timeout);
/// assert_eq!(RtbStatus::NoAck as u8, 0xE9);
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum RtbStatus {
    /// Request completed (0x00)
    Success = 0x00,

    /// No frame or confirm buffer available (0x81)
    OutOfBuffers = 0x81,

    /// A ranging transaction is already active on this node (0x82)
    RangingInProgress = 0x82,

    /// Generic rejection by the peer (0x83)
    Reject = 0x83,

    /// A protocol phase ran out of time (0x84)
    Timeout = 0x84,

    /// Requested ranging method is not implemented by the peer (0x85)
    UnsupportedMethod = 0x85,

    /// Requested protocol version is not implemented by the peer (0x86)
    UnsupportedProtocol = 0x86,

    /// Ranging is administratively disabled (0x87)
    UnsupportedRanging = 0x87,

    /// CSMA-CA could not access the channel (0xE1)
    ChannelAccessFailure = 0xE1,

    /// A parameter is outside of its legal range (0xE8)
    InvalidParameter = 0xE8,

    /// No acknowledgment was received (0xE9)
    NoAck = 0xE9,

    /// The node has no usable short address (0xEC)
    NoShortAddress = 0xEC,

    /// Unknown attribute identifier (0xF4)
    UnsupportedAttribute = 0xF4,

    /// Attribute can not be written (0xFB)
    ReadOnly = 0xFB,
}

impl RtbStatus {
    /// Decodes a status byte received from a peer
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => RtbStatus::Success,
            0x81 => RtbStatus::OutOfBuffers,
            0x82 => RtbStatus::RangingInProgress,
            0x83 => RtbStatus::Reject,
            0x84 => RtbStatus::Timeout,
            0x85 => RtbStatus::UnsupportedMethod,
            0x86 => RtbStatus::UnsupportedProtocol,
            0x87 => RtbStatus::UnsupportedRanging,
            0xE1 => RtbStatus::ChannelAccessFailure,
            0xE8 => RtbStatus::InvalidParameter,
            0xE9 => RtbStatus::NoAck,
            0xEC => RtbStatus::NoShortAddress,
            0xF4 => RtbStatus::UnsupportedAttribute,
            0xFB => RtbStatus::ReadOnly,
            _ => RtbStatus::Reject,
        }
    }

    pub fn is_success(self) -> bool {
        self == RtbStatus::Success
    }
}

#[cfg(feature = "std")]
impl core::fmt::Display for RtbStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RtbStatus::Success => write!(f, "success"),
            RtbStatus::OutOfBuffers => write!(f, "out of buffers"),
            RtbStatus::RangingInProgress => write!(f, "ranging already in progress"),
            RtbStatus::Reject => write!(f, "rejected"),
            RtbStatus::Timeout => write!(f, "timeout"),
            RtbStatus::UnsupportedMethod => write!(f, "unsupported ranging method"),
            RtbStatus::UnsupportedProtocol => write!(f, "unsupported protocol version"),
            RtbStatus::UnsupportedRanging => write!(f, "ranging disabled"),
            RtbStatus::ChannelAccessFailure => write!(f, "channel access failure"),
            RtbStatus::InvalidParameter => write!(f, "invalid parameter"),
            RtbStatus::NoAck => write!(f, "no acknowledgment"),
            RtbStatus::NoShortAddress => write!(f, "no short address"),
            RtbStatus::UnsupportedAttribute => write!(f, "unsupported attribute"),
            RtbStatus::ReadOnly => write!(f, "read-only attribute"),
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn known_values_decode_to_their_variant() {
        for status in [
            RtbStatus::Success,
            RtbStatus::OutOfBuffers,
            RtbStatus::RangingInProgress,
            RtbStatus::Timeout,
            RtbStatus::UnsupportedRanging,
            RtbStatus::ChannelAccessFailure,
            RtbStatus::NoAck,
            RtbStatus::ReadOnly,
        ] {
            assert_eq!(RtbStatus::from_u8(status as u8), status);
        }
    }

    #[test]
    fn unknown_value_decodes_to_reject() {
        assert_eq!(RtbStatus::from_u8(0x42), RtbStatus::Reject);
        assert!(!RtbStatus::from_u8(0x42).is_success());
    }
}
