//! # RTB Ranging Library
//!
//! Ranging Toolbox for IEEE 802.15.4 nodes: measures the distance between two
//! radios with a phase measurement exchange.
//!
//! ## Architecture
//!
//! - **RangingEngine**: Single ranging state machine of a node (Initiator, Reflector or Coordinator)
//! - **Frames**: MAC header and ranging command codec
//! - **TimingSupervisor**: Await timer per protocol phase and the Coordinator's remote watch
//! - **PmuAdapter**: Boundary to the phase measurement unit
//! - **Filters / ContinuousRanging**: Combination of antenna pairs and post-processing of measurement series
//!
//! ## Queues
//!
//! ```text
//!   radio ISR ──RtbEvent──► event queue ──► RangingEngine ──RtbConfirm──► confirm queue ──► application
//!   application ──RtbRequest──► request queue ──► RangingEngine::run()
//! ```
//!
//! Queues are `embassy-sync` channels. With the `embedded` feature they are
//! statics; with `std` they are leaked on the heap by [`RtbChannels::initialize`].

#![cfg_attr(not(feature = "std"), no_std)]

pub mod confirm;
pub mod continuous;
pub mod filters;
pub mod frames;
pub mod link;
pub mod pib;
pub mod pmu;
pub mod result_calc;
pub mod ring_buffer;
pub mod session;
pub mod status;
pub mod timing;

mod ranging_engine;
mod remote_relay;
mod rx_handler;
mod tx_scheduler;

#[cfg(feature = "std")]
pub mod link_devices;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

pub use confirm::{ConfirmKind, ConfirmSender, MeasurementPair, MeasurementResult, RangeConfirm, RtbConfirm};
pub use continuous::{ContinuousRanging, ContinuousRangingConfig, ContinuousSample, Direction, DistanceCheck};
pub use filters::FilterPolicy;
pub use frames::{AddrMode, AddrSpec, RadioFrame};
pub use link::{CsmaMode, LinkError, LinkLayer, RtbEvent, TxStatus};
pub use pib::{PibAttribute, PibValue, RangingPib};
pub use pmu::{PmuAdapter, PmuError};
pub use ranging_engine::{RangeRequest, RangingEngine, RtbRequest};
pub use session::{RangingRole, RangingState};
pub use status::RtbStatus;

//Hardware dependent constants, that affect compatibility of a node
/// Frequencies of the widest sweep (2324..=2527 MHz in 500 kHz steps)
pub const MAX_PMU_FREQUENCIES: usize = 407;
pub const MAX_ANTENNA_PAIRS: usize = 4;

//Hardware dependent constants, that only affect efficiency of a node, but does not result incompatibility
pub const RTB_EVENT_QUEUE_SIZE: usize = 4;
/// One validity indication per antenna pair plus the range confirm
pub const CONFIRM_QUEUE_SIZE: usize = MAX_ANTENNA_PAIRS + 1;
pub const REQUEST_QUEUE_SIZE: usize = 4;

/// macResponseWaitTime: 32 x aBaseSuperframeDuration (960 symbols) x 16 µs
pub const DEFAULT_AWAIT_FRAME_TIMEOUT_US: u64 = 32 * 960 * 16;
pub const DEFAULT_REMOTE_RANGING_TIMEOUT_US: u64 = 1_000_000;

pub type RtbEventQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, RtbEvent, RTB_EVENT_QUEUE_SIZE>;
pub type RtbEventSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, RtbEvent, RTB_EVENT_QUEUE_SIZE>;
pub type RtbEventReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, RtbEvent, RTB_EVENT_QUEUE_SIZE>;

#[cfg(all(feature = "embedded", not(feature = "std")))]
static RTB_EVENT_QUEUE: RtbEventQueue = Channel::new();

pub type ConfirmQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, RtbConfirm, CONFIRM_QUEUE_SIZE>;
pub type ConfirmReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, RtbConfirm, CONFIRM_QUEUE_SIZE>;

#[cfg(all(feature = "embedded", not(feature = "std")))]
static CONFIRM_QUEUE: ConfirmQueue = Channel::new();

pub type RtbRequestQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, RtbRequest, REQUEST_QUEUE_SIZE>;
pub type RtbRequestSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, RtbRequest, REQUEST_QUEUE_SIZE>;
pub type RtbRequestReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, RtbRequest, REQUEST_QUEUE_SIZE>;

#[cfg(all(feature = "embedded", not(feature = "std")))]
static REQUEST_QUEUE: RtbRequestQueue = Channel::new();

/// Configuration of the ranging engine
///
/// Timeouts apply to every protocol phase alike; there are no retries.
#[derive(Clone, Copy)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RangingConfiguration {
    /// Wait for the peer's next frame
    pub await_frame_timeout_us: u64,
    /// Wait of a Coordinator for the Remote-Range-Confirm
    pub remote_ranging_timeout_us: u64,
    /// Combination of the antenna pairs of one measurement
    pub combine_policy: FilterPolicy,
    /// Seed of the MAC data sequence number
    pub rng_seed: u64,
}

impl Default for RangingConfiguration {
    fn default() -> Self {
        Self {
            await_frame_timeout_us: DEFAULT_AWAIT_FRAME_TIMEOUT_US,
            remote_ranging_timeout_us: DEFAULT_REMOTE_RANGING_TIMEOUT_US,
            combine_policy: FilterPolicy::MinVariance,
            rng_seed: 0,
        }
    }
}

/// Queue endpoints connecting the engine with the radio driver and the application
pub struct RtbChannels {
    /// Radio driver side: receptions and transmission completions
    pub event_sender: RtbEventSender,
    pub event_receiver: RtbEventReceiver,
    /// Engine side of the confirm queue
    pub confirm_sender: ConfirmSender,
    pub confirm_receiver: ConfirmReceiver,
    /// Application side: requests for [`RangingEngine::run`]
    pub request_sender: RtbRequestSender,
    pub request_receiver: RtbRequestReceiver,
}

impl RtbChannels {
    /// Endpoints of the static queues
    ///
    /// There is one set of queues per firmware image, so every call returns
    /// endpoints of the same queues.
    #[cfg(all(feature = "embedded", not(feature = "std")))]
    pub fn initialize() -> Self {
        Self::initialize_common(&RTB_EVENT_QUEUE, &CONFIRM_QUEUE, &REQUEST_QUEUE)
    }

    /// Endpoints of freshly leaked queues, one set per call
    #[cfg(feature = "std")]
    pub fn initialize() -> Self {
        let event_queue_temp: RtbEventQueue = Channel::new();
        let event_queue_static: &'static RtbEventQueue = Box::leak(Box::new(event_queue_temp));

        let confirm_queue_temp: ConfirmQueue = Channel::new();
        let confirm_queue_static: &'static ConfirmQueue = Box::leak(Box::new(confirm_queue_temp));

        let request_queue_temp: RtbRequestQueue = Channel::new();
        let request_queue_static: &'static RtbRequestQueue = Box::leak(Box::new(request_queue_temp));

        Self::initialize_common(event_queue_static, confirm_queue_static, request_queue_static)
    }

    #[cfg_attr(not(any(feature = "std", feature = "embedded")), allow(dead_code))]
    fn initialize_common(
        event_queue: &'static RtbEventQueue,
        confirm_queue: &'static ConfirmQueue,
        request_queue: &'static RtbRequestQueue,
    ) -> Self {
        Self {
            event_sender: event_queue.sender(),
            event_receiver: event_queue.receiver(),
            confirm_sender: confirm_queue.sender(),
            confirm_receiver: confirm_queue.receiver(),
            request_sender: request_queue.sender(),
            request_receiver: request_queue.receiver(),
        }
    }
}
