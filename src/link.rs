//! # Link Layer Boundary
//!
//! Interface between the ranging engine and the IEEE 802.15.4 MAC/PHY below it.
//!
//! ## Event Flow
//!
//! ```text
//!   radio ISR ──RtbEvent──► RtbEventQueue ──► RangingEngine::task()
//!                                                  │
//!   LinkLayer::transmit() ◄────────────────────────┘
//! ```
//!
//! The engine never touches the link layer from interrupt context. Receptions
//! and transmission completions are posted into the event queue by the link
//! layer implementation; the engine calls back into [`LinkLayer`] only from its
//! own task.

use crate::frames::{AddrMode, AddrSpec, RadioFrame};
use crate::status::RtbStatus;

/// Channel access procedure for one transmission
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum CsmaMode {
    /// Transmit immediately
    NoCsma,
    /// Unslotted CSMA-CA
    Unslotted,
}

/// Completion status of a transmission, reported through [`RtbEvent::TransmitDone`]
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum TxStatus {
    Success,
    NoAck,
    ChannelAccessFailure,
}

impl TxStatus {
    pub fn is_success(self) -> bool {
        self == TxStatus::Success
    }
}

impl From<TxStatus> for RtbStatus {
    fn from(status: TxStatus) -> Self {
        match status {
            TxStatus::Success => RtbStatus::Success,
            TxStatus::NoAck => RtbStatus::NoAck,
            TxStatus::ChannelAccessFailure => RtbStatus::ChannelAccessFailure,
        }
    }
}

/// Error type for a transmission the link layer refused to start
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum LinkError {
    /// The transceiver is busy with another transmission
    Busy,

    /// The transmission could not be started on the channel
    ChannelAccessFailure,

    /// No frame buffer available
    NoBuffer,
}

#[cfg(feature = "std")]
impl core::fmt::Display for LinkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LinkError::Busy => write!(f, "transceiver busy"),
            LinkError::ChannelAccessFailure => write!(f, "channel access failure"),
            LinkError::NoBuffer => write!(f, "no frame buffer available"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LinkError {}

impl From<LinkError> for RtbStatus {
    fn from(error: LinkError) -> Self {
        match error {
            LinkError::NoBuffer => RtbStatus::OutOfBuffers,
            LinkError::Busy | LinkError::ChannelAccessFailure => RtbStatus::ChannelAccessFailure,
        }
    }
}

/// Event posted from the radio interrupt context to the ranging engine
#[cfg_attr(feature = "std", derive(Debug))]
pub enum RtbEvent {
    /// A frame addressed to this node was received
    FrameReceived(RadioFrame),

    /// The frame handed to [`LinkLayer::transmit`] has been sent (or failed)
    TransmitDone(TxStatus),
}

/// MAC/PHY services used by the ranging engine
///
/// Implementations queue an [`RtbEvent::TransmitDone`] for every frame they
/// accepted with `Ok(())` from `transmit`.
pub trait LinkLayer {
    /// Starts transmission of a frame
    ///
    /// # Arguments
    /// * `frame` - Complete PHY frame; the FCS octets are filled in by the transceiver
    /// * `csma` - Channel access procedure
    /// * `ack_request` - Whether the frame requests an acknowledgment
    fn transmit(&mut self, frame: &RadioFrame, csma: CsmaMode, ack_request: bool) -> Result<(), LinkError>;

    fn pan_id(&self) -> u16;

    fn short_address(&self) -> u16;

    fn ieee_address(&self) -> u64;

    fn transmit_power(&self) -> u8;

    fn set_transmit_power(&mut self, power: u8);

    /// Clamps a requested transmit power to what the transceiver supports
    fn limit_transmit_power(&self, power: u8) -> u8 {
        power
    }

    /// Marks the MAC as busy so it does not start own activity during ranging
    fn set_busy(&mut self, busy: bool);

    /// Resets the link layer state
    fn reset(&mut self);

    /// Own address specification for the given addressing mode
    fn own_address(&self, mode: AddrMode) -> AddrSpec {
        match mode {
            AddrMode::Short => AddrSpec::short_with(self.pan_id(), self.short_address()),
            AddrMode::Long => AddrSpec::long_with(self.pan_id(), self.ieee_address()),
            AddrMode::None => AddrSpec::NONE,
        }
    }

    /// Checks whether an address specification names this node
    fn is_own_address(&self, spec: &AddrSpec) -> bool {
        if spec.pan_id != self.pan_id() {
            return false;
        }
        match spec.mode {
            AddrMode::Short => spec.address as u16 == self.short_address(),
            AddrMode::Long => spec.address == self.ieee_address(),
            AddrMode::None => false,
        }
    }
}
