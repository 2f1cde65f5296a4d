//! # Ranging Session
//!
//! Role, protocol state and per-transaction parameters of the one ranging
//! transaction a node can take part in at a time.
//!
//! ## State Flow
//!
//! ```text
//! Initiator:   InitRangeReq → RangeReqSent → AwaitRangeAccept → InitTimeSyncReq → TimeSyncReqSent
//!              → AwaitPmuStart → PrepareResultExchange → InitResultReq ⇄ ResultReqSent/AwaitResultConf
//!              → ResultCalc → [InitRemoteRangeConf → RemoteRangeConfSent] → Idle
//! Reflector:   InitRangeAccept → AcceptSent → AwaitTimeSyncReq → InitPmuStart → PmuStartSent
//!              → PrepareResultExchange → AwaitResultReq ⇄ InitResultConf/ResultConfSent → Idle
//! Coordinator: InitRemoteRangeReq → RemoteRangeReqSent → Idle
//! ```
//!
//! `Idle` takes the place of a separate "await Range-Request" state: a node
//! that is not ranging accepts Range-Requests directly.

use crate::confirm::{ConfirmSlot, MeasurementResult};
use crate::frames::AddrSpec;
use crate::pmu::{Capabilities, FrequencySweep, RangeParams, RemoteCapabilities, RemoteResults};
use crate::status::RtbStatus;

/// Part a node plays in the current transaction
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum RangingRole {
    None,
    Initiator,
    Reflector,
    Coordinator,
}

/// Protocol state of the ranging state machine
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum RangingState {
    Idle,

    // Initiator
    InitRangeReq,
    RangeReqSent,
    AwaitRangeAccept,
    InitTimeSyncReq,
    TimeSyncReqSent,
    AwaitPmuStart,
    InitResultReq,
    ResultReqSent,
    AwaitResultConf,
    ResultCalc,
    InitRemoteRangeConf,
    RemoteRangeConfSent,

    // Reflector
    InitRangeAccept,
    AcceptSent,
    AwaitTimeSyncReq,
    InitPmuStart,
    PmuStartSent,
    AwaitResultReq,
    InitResultConf,
    ResultConfSent,

    // Both
    PrepareResultExchange,

    // Coordinator
    InitRemoteRangeReq,
    RemoteRangeReqSent,
}

impl RangingRole {
    pub fn name(self) -> &'static str {
        match self {
            RangingRole::None => "None",
            RangingRole::Initiator => "Initiator",
            RangingRole::Reflector => "Reflector",
            RangingRole::Coordinator => "Coordinator",
        }
    }
}

impl RangingState {
    pub fn name(self) -> &'static str {
        match self {
            RangingState::Idle => "Idle",
            RangingState::InitRangeReq => "InitRangeReq",
            RangingState::RangeReqSent => "RangeReqSent",
            RangingState::AwaitRangeAccept => "AwaitRangeAccept",
            RangingState::InitTimeSyncReq => "InitTimeSyncReq",
            RangingState::TimeSyncReqSent => "TimeSyncReqSent",
            RangingState::AwaitPmuStart => "AwaitPmuStart",
            RangingState::InitResultReq => "InitResultReq",
            RangingState::ResultReqSent => "ResultReqSent",
            RangingState::AwaitResultConf => "AwaitResultConf",
            RangingState::ResultCalc => "ResultCalc",
            RangingState::InitRemoteRangeConf => "InitRemoteRangeConf",
            RangingState::RemoteRangeConfSent => "RemoteRangeConfSent",
            RangingState::InitRangeAccept => "InitRangeAccept",
            RangingState::AcceptSent => "AcceptSent",
            RangingState::AwaitTimeSyncReq => "AwaitTimeSyncReq",
            RangingState::InitPmuStart => "InitPmuStart",
            RangingState::PmuStartSent => "PmuStartSent",
            RangingState::AwaitResultReq => "AwaitResultReq",
            RangingState::InitResultConf => "InitResultConf",
            RangingState::ResultConfSent => "ResultConfSent",
            RangingState::PrepareResultExchange => "PrepareResultExchange",
            RangingState::InitRemoteRangeReq => "InitRemoteRangeReq",
            RangingState::RemoteRangeReqSent => "RemoteRangeReqSent",
        }
    }

    /// States that wait for a frame from the peer and therefore run a timer
    pub fn is_await(self) -> bool {
        matches!(
            self,
            RangingState::AwaitRangeAccept
                | RangingState::AwaitPmuStart
                | RangingState::AwaitResultConf
                | RangingState::AwaitTimeSyncReq
                | RangingState::InitPmuStart
                | RangingState::AwaitResultReq
        )
    }

    /// States that wait for a transmission to complete
    pub fn is_sent(self) -> bool {
        matches!(
            self,
            RangingState::RangeReqSent
                | RangingState::TimeSyncReqSent
                | RangingState::ResultReqSent
                | RangingState::RemoteRangeConfSent
                | RangingState::AcceptSent
                | RangingState::PmuStartSent
                | RangingState::ResultConfSent
                | RangingState::RemoteRangeReqSent
        )
    }
}

/// Progress of the result exchange (Initiator requests, Reflector answers)
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct ResultExchange {
    /// Antenna pair currently transferred
    pub pair_index: usize,
    /// Index of the next value to transfer within the pair
    pub offset: usize,
    /// Values of the current chunk (Reflector side)
    pub chunk_len: usize,
}

/// Everything the engine knows about the current transaction
pub struct RangingSession {
    pub role: RangingRole,
    pub state: RangingState,
    pub initiator: AddrSpec,
    pub reflector: AddrSpec,
    /// Non-`None` while this node is Initiator on behalf of a Coordinator,
    /// or holds its own address while it acts as Coordinator
    pub coordinator: AddrSpec,
    pub method: u8,
    pub caps: Capabilities,
    pub remote_caps: RemoteCapabilities,
    pub sweep: FrequencySweep,
    pub apply_min_dist_threshold: bool,
    pub requested_tx_power: Option<u8>,
    /// Reason carried in the next Range-Accept or Remote-Range-Confirm
    pub error: RtbStatus,
    /// PMU parameters, known once the antenna pairs are negotiated
    pub params: Option<RangeParams>,
    pub exchange: ResultExchange,
    pub remote_results: RemoteResults,
    /// Result of `ResultCalc`, kept for the Remote-Range-Confirm
    pub result: Option<MeasurementResult>,
    /// Transmit power before ranging switched it
    pub saved_tx_power: Option<u8>,
    pub tx_in_progress: bool,
    pub(crate) confirm_slot: Option<ConfirmSlot>,
}

impl RangingSession {
    pub fn new() -> Self {
        Self {
            role: RangingRole::None,
            state: RangingState::Idle,
            initiator: AddrSpec::NONE,
            reflector: AddrSpec::NONE,
            coordinator: AddrSpec::NONE,
            method: 0,
            caps: Capabilities(0),
            remote_caps: RemoteCapabilities(0),
            sweep: FrequencySweep::with(0, 0, 0),
            apply_min_dist_threshold: false,
            requested_tx_power: None,
            error: RtbStatus::Success,
            params: None,
            exchange: ResultExchange::default(),
            remote_results: RemoteResults::new(),
            result: None,
            saved_tx_power: None,
            tx_in_progress: false,
            confirm_slot: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.role == RangingRole::None
    }

    /// Initiator acting on behalf of a Coordinator
    pub fn is_remote(&self) -> bool {
        self.role == RangingRole::Initiator && !self.coordinator.is_none()
    }

    /// Moves into a new role and state together
    pub fn enter(&mut self, role: RangingRole, state: RangingState) {
        self.role = role;
        self.state = state;
        self.error = RtbStatus::Success;
    }

    /// Returns to idle; the confirm slot and saved transmit power are left
    /// for the exit path to consume
    pub fn clear(&mut self) {
        self.role = RangingRole::None;
        self.state = RangingState::Idle;
        self.coordinator = AddrSpec::NONE;
        self.tx_in_progress = false;
        self.params = None;
        self.exchange = ResultExchange::default();
        self.remote_results.reset();
        self.requested_tx_power = None;
        self.result = None;
    }
}

impl Default for RangingSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_idle() {
        let session = RangingSession::new();
        assert!(session.is_idle());
        assert_eq!(session.state, RangingState::Idle);
        assert!(!session.is_remote());
    }

    #[test]
    fn remote_mode_requires_coordinator_address() {
        let mut session = RangingSession::new();
        session.enter(RangingRole::Initiator, RangingState::InitRangeReq);
        assert!(!session.is_remote());
        session.coordinator = AddrSpec::short_with(1, 0x0010);
        assert!(session.is_remote());
        session.clear();
        assert!(!session.is_remote());
        assert!(session.is_idle());
    }

    #[test]
    fn await_and_sent_states_do_not_overlap() {
        let states = [
            RangingState::AwaitRangeAccept,
            RangingState::AwaitPmuStart,
            RangingState::AwaitResultConf,
            RangingState::AwaitTimeSyncReq,
            RangingState::AwaitResultReq,
            RangingState::RangeReqSent,
            RangingState::PmuStartSent,
        ];
        for state in states {
            assert!(!(state.is_await() && state.is_sent()));
        }
    }
}
