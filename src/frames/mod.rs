//! # Frames Module
//!
//! Wire format of the ranging protocol.
//!
//! ## Architecture
//!
//! The frames module is organized into three components:
//!
//! - **address**: Address specifications (mode, PAN id, short or extended address)
//! - **radio_frame**: PHY frame buffer and the IEEE 802.15.4 MAC header
//! - **rtb_frame**: The ranging command frames carried in the MAC payload
//!
//! ## Frame Layout
//!
//! ```text
//! | PHY len | FCF | DSN | dst PAN | dst addr | [src PAN] | src addr | "RTB" | cmd | payload | FCS |
//! ```
//!
//! Frames are encoded back-to-front: the command payload is placed at the end of
//! the buffer first and the MAC header is prepended in front of it, so short and
//! long addresses never require re-laying the payload.

pub mod address;
pub mod radio_frame;
pub mod rtb_frame;

pub use address::{AddrMode, AddrSpec};
pub use radio_frame::{MacHeader, RadioFrame};
pub use rtb_frame::{
    RangeAcceptPayload, RangeRequestPayload, RemoteRangeConfirmPayload, RemoteRangeRequestPayload, ResultConfirmPayload,
    ResultRequestPayload, RtbCommand, RtbFrame,
};

/// Error type for frame encoding and decoding
///
/// Every decoding failure means the frame is dropped without touching the
/// ranging session. `BadMagic` and `UnsupportedFrameType` additionally mean
/// the frame was not meant for the ranging engine at all.
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum FrameError {
    /// Frame ends before a mandatory field
    TooShort,

    /// MAC payload does not start with the "RTB" magic
    BadMagic,

    /// Command byte is not a known ranging command
    UnknownCommand(u8),

    /// MAC frame is not a data frame
    UnsupportedFrameType,

    /// Address mode value is reserved or not allowed here
    UnsupportedAddressMode(u8),

    /// Embedded length field disagrees with the frame content
    LengthMismatch,

    /// Encoded frame would not fit into a PHY frame
    BufferOverflow,
}

#[cfg(feature = "std")]
impl core::fmt::Display for FrameError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FrameError::TooShort => write!(f, "frame is too short"),
            FrameError::BadMagic => write!(f, "payload is not a ranging frame"),
            FrameError::UnknownCommand(cmd) => write!(f, "unknown ranging command 0x{:02X}", cmd),
            FrameError::UnsupportedFrameType => write!(f, "not a MAC data frame"),
            FrameError::UnsupportedAddressMode(mode) => write!(f, "unsupported address mode {}", mode),
            FrameError::LengthMismatch => write!(f, "length field does not match frame content"),
            FrameError::BufferOverflow => write!(f, "frame does not fit into the PHY buffer"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FrameError {}
