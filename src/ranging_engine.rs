//! # Ranging Engine
//!
//! Owns the ranging session of a node and drives it through the protocol.
//!
//! ## Architecture
//!
//! The engine is split over four files that all implement [`RangingEngine`]:
//!
//! - **ranging_engine**: Requests, the single exit path, timers and the cooperative task step
//! - **tx_scheduler**: Building and transmitting frames, transmission completions
//! - **rx_handler**: Received frames of local ranging and the result computation
//! - **remote_relay**: Coordinator side of remote ranging and the relayed confirm
//!
//! ## Scheduling
//!
//! [`RangingEngine::task_at`] is one cooperative step: it drains at most one
//! event from the queue, handles an expired timer and advances the state
//! machine by at most one step while no transmission is in flight. Waiting is
//! a state plus an armed timer; nothing blocks.
//!
//! [`RangingEngine::run`] is the async variant for an embassy executor. It sleeps
//! until the next event, request or deadline.

use embassy_futures::select::{Either3, select3};
use embassy_time::{Instant, Timer};
use log::log;
use rand_core::RngCore;
use rand_core::SeedableRng;
use rand_wyrand::WyRand;

use crate::confirm::{ConfirmKind, ConfirmSender, ConfirmSlot, MeasurementResult, RangeConfirm, RtbConfirm, send_confirm, send_unreserved};
use crate::frames::address::{BROADCAST_SHORT_ADDRESS, NO_SHORT_ADDRESS};
use crate::frames::{AddrMode, AddrSpec};
use crate::link::{LinkLayer, RtbEvent};
use crate::pib::{PibAttribute, PibValue, RangingPib};
use crate::pmu::{Capabilities, PmuAdapter, RANGING_METHOD_PMU};
use crate::session::{RangingRole, RangingSession, RangingState};
use crate::status::RtbStatus;
use crate::timing::TimingSupervisor;
use crate::{RangingConfiguration, RtbEventReceiver, RtbRequestReceiver};

/// Application request to measure the distance between two nodes
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RangeRequest {
    /// Node that runs the measurement and computes the distance
    pub initiator: AddrSpec,
    /// Node that cooperates in the measurement
    pub reflector: AddrSpec,
    /// `None` ranges locally with this node as Initiator; `Some(mode)` makes
    /// this node the Coordinator, addressed with the given mode
    pub coordinator_mode: Option<AddrMode>,
}

/// Request served by [`RangingEngine::run`]
#[derive(Clone, Copy)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum RtbRequest {
    Range(RangeRequest),
    Set { attribute: PibAttribute, value: PibValue },
    Reset { set_default_pib: bool },
}

/// Ranging state machine of one node
///
/// # Type Parameters
/// * `L` - Link layer below the engine
/// * `P` - Phase measurement unit
pub struct RangingEngine<L: LinkLayer, P: PmuAdapter> {
    pub(crate) config: RangingConfiguration,
    pub(crate) link: L,
    pub(crate) pmu: P,
    pub(crate) pib: RangingPib,
    pub(crate) session: RangingSession,
    pub(crate) timing: TimingSupervisor,
    pub(crate) event_receiver: RtbEventReceiver,
    pub(crate) confirm_sender: ConfirmSender,
    /// The link was marked busy by this engine
    pub(crate) mac_busy: bool,
    pub(crate) sequence_number: u8,
}

impl<L: LinkLayer, P: PmuAdapter> RangingEngine<L, P> {
    /// Creates an idle engine
    ///
    /// # Arguments
    /// * `config` - Timeouts, combine policy and sequence number seed
    /// * `link` - Link layer used for all transmissions
    /// * `pmu` - Phase measurement unit
    /// * `event_receiver` - Queue the link layer posts receptions and completions into
    /// * `confirm_sender` - Queue the confirms are delivered to
    pub fn with(config: RangingConfiguration, link: L, pmu: P, event_receiver: RtbEventReceiver, confirm_sender: ConfirmSender) -> Self {
        let mut rng = WyRand::seed_from_u64(config.rng_seed);
        let sequence_number = rng.next_u64() as u8;
        log!(
            log::Level::Debug,
            "Ranging engine created, await timeout: {} us, remote timeout: {} us",
            config.await_frame_timeout_us,
            config.remote_ranging_timeout_us
        );
        Self {
            config,
            link,
            pmu,
            pib: RangingPib::DEFAULT,
            session: RangingSession::new(),
            timing: TimingSupervisor::with(config.await_frame_timeout_us, config.remote_ranging_timeout_us),
            event_receiver,
            confirm_sender,
            mac_busy: false,
            sequence_number,
        }
    }

    pub fn role(&self) -> RangingRole {
        self.session.role
    }

    pub fn state(&self) -> RangingState {
        self.session.state
    }

    pub fn is_idle(&self) -> bool {
        self.session.is_idle()
    }

    pub fn pib(&self) -> &RangingPib {
        &self.pib
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn pmu(&self) -> &P {
        &self.pmu
    }

    pub fn pmu_mut(&mut self) -> &mut P {
        &mut self.pmu
    }

    // ====== Requests ======

    /// Starts a ranging transaction
    ///
    /// A local request makes this node the Initiator; a request with a
    /// coordinator mode makes it the Coordinator of a remote ranging.
    ///
    /// # Returns
    /// `Ok(())` when the request was accepted. A rejection is returned and
    /// also delivered as range confirm, unless that confirm would take the
    /// queue entry held for a running transaction.
    pub fn start_ranging(&mut self, request: RangeRequest) -> Result<(), RtbStatus> {
        let result = if !self.session.is_idle() {
            Err(RtbStatus::RangingInProgress)
        } else {
            match request.coordinator_mode {
                None => self.start_local(&request),
                Some(mode) => self.start_remote(&request, mode),
            }
        };

        if let Err(status) = result {
            log::warn!("Range request rejected: 0x{:02X}", status as u8);
            let kind = match request.coordinator_mode {
                None => ConfirmKind::Local,
                Some(_) => ConfirmKind::Remote {
                    initiator: request.initiator,
                    reflector: request.reflector,
                },
            };
            self.indicate(RtbConfirm::Range(RangeConfirm {
                kind,
                result: MeasurementResult::failure(status),
            }));
        }
        result
    }

    fn start_local(&mut self, request: &RangeRequest) -> Result<(), RtbStatus> {
        if !self.pib.ranging_enabled {
            return Err(RtbStatus::UnsupportedRanging);
        }
        if request.reflector.is_none() || !self.link.is_own_address(&request.initiator) {
            return Err(RtbStatus::InvalidParameter);
        }
        if request.initiator.mode == AddrMode::Short && !has_usable_short_address(self.link.short_address()) {
            return Err(RtbStatus::InvalidParameter);
        }

        self.session.confirm_slot = Some(ConfirmSlot::reserve());
        self.session.initiator = request.initiator;
        self.session.reflector = request.reflector;
        self.session.coordinator = AddrSpec::NONE;
        self.session.method = RANGING_METHOD_PMU;
        self.session.caps = Capabilities::proposed_by_initiator(self.pib.enable_antenna_div);
        self.session.sweep = self.pib.frequency_sweep();
        self.session.apply_min_dist_threshold = self.pib.apply_min_dist_threshold;
        self.session.requested_tx_power = self.pib.provide_ranging_transmit_power.then_some(self.pib.ranging_transmit_power);
        self.session.enter(RangingRole::Initiator, RangingState::InitRangeReq);
        self.configure_ranging(self.pib.ranging_transmit_power);

        log::info!("[Initiator] Local ranging started");
        Ok(())
    }

    /// Writes a ranging attribute and confirms the write
    ///
    /// The ranging transmit power is limited to what the link layer supports
    /// before it is stored.
    pub fn set_request(&mut self, attribute: PibAttribute, value: PibValue) -> RtbStatus {
        let value = match (attribute, value) {
            (PibAttribute::RangingTransmitPower, PibValue::U8(power)) => PibValue::U8(self.link.limit_transmit_power(power)),
            _ => value,
        };
        let status = match self.pib.set(attribute, value) {
            Ok(()) => RtbStatus::Success,
            Err(status) => status,
        };
        log!(log::Level::Debug, "Set attribute 0x{:02X}: 0x{:02X}", attribute as u8, status as u8);
        self.indicate(RtbConfirm::Set { attribute, status });
        status
    }

    pub fn get(&self, attribute: PibAttribute) -> PibValue {
        self.pib.get(attribute)
    }

    /// Aborts all ranging activity and resets the link layer
    ///
    /// # Arguments
    /// * `set_default_pib` - Also restore the default ranging attributes
    pub fn reset_request(&mut self, set_default_pib: bool) {
        log::info!("Ranging reset requested");
        self.exit();
        if let Some(watch) = self.timing.cancel_remote_watch() {
            self.send_remote_confirm(watch.initiator, watch.reflector, MeasurementResult::failure(RtbStatus::Reject));
        }
        self.link.reset();
        if set_default_pib {
            self.pib = RangingPib::DEFAULT;
        }
        send_confirm(&self.confirm_sender, RtbConfirm::Reset { status: RtbStatus::Success });
    }

    pub(crate) fn handle_request(&mut self, request: RtbRequest) {
        match request {
            RtbRequest::Range(range) => {
                self.start_ranging(range).ok();
            }
            RtbRequest::Set { attribute, value } => {
                self.set_request(attribute, value);
            }
            RtbRequest::Reset { set_default_pib } => self.reset_request(set_default_pib),
        }
    }

    // ====== Session Lifecycle ======

    /// Switches the link to ranging mode for the duration of the transaction
    pub(crate) fn configure_ranging(&mut self, tx_power: u8) {
        if self.session.saved_tx_power.is_none() {
            self.session.saved_tx_power = Some(self.link.transmit_power());
        }
        let limited = self.link.limit_transmit_power(tx_power);
        self.link.set_transmit_power(limited);
        self.link.set_busy(true);
        self.mac_busy = true;
    }

    /// Single exit path of every transaction
    ///
    /// Idempotent: a second call finds nothing left to release.
    pub(crate) fn exit(&mut self) {
        if let Some(slot) = self.session.confirm_slot.take() {
            slot.deliver(&self.confirm_sender, MeasurementResult::failure(RtbStatus::Reject));
        }
        if let Some(power) = self.session.saved_tx_power.take() {
            self.link.set_transmit_power(power);
        }
        if self.mac_busy {
            self.link.set_busy(false);
            self.mac_busy = false;
        }
        self.timing.cancel();
        self.pmu.reset();
        if !self.session.is_idle() {
            log::info!("[{}/{}] Ranging finished", self.session.role.name(), self.session.state.name());
        }
        self.session.clear();
    }

    /// Ends the transaction with an error
    ///
    /// An Initiator ranging for a Coordinator reports the error in its
    /// Remote-Range-Confirm instead of ending right away.
    pub(crate) fn fail_transaction(&mut self, status: RtbStatus) {
        log::warn!(
            "[{}/{}] Ranging failed: 0x{:02X}",
            self.session.role.name(),
            self.session.state.name(),
            status as u8
        );
        self.timing.cancel();
        if self.session.is_remote() {
            self.session.error = status;
            self.set_state(RangingState::InitRemoteRangeConf);
            return;
        }
        if let Some(slot) = self.session.confirm_slot.take() {
            slot.deliver(&self.confirm_sender, MeasurementResult::failure(status));
        }
        self.exit();
    }

    /// Ends the transaction after the link layer refused a transmission
    pub(crate) fn abort(&mut self, status: RtbStatus) {
        log::error!(
            "[{}/{}] Transmission refused: 0x{:02X}",
            self.session.role.name(),
            self.session.state.name(),
            status as u8
        );
        match self.session.role {
            RangingRole::Coordinator => {
                self.send_remote_confirm(self.session.initiator, self.session.reflector, MeasurementResult::failure(status));
                self.exit();
            }
            RangingRole::Initiator if self.session.is_remote() && self.session.state != RangingState::InitRemoteRangeConf => {
                self.fail_transaction(status);
            }
            _ => {
                if let Some(slot) = self.session.confirm_slot.take() {
                    slot.deliver(&self.confirm_sender, MeasurementResult::failure(status));
                }
                self.exit();
            }
        }
    }

    pub(crate) fn set_state(&mut self, state: RangingState) {
        log!(
            log::Level::Debug,
            "[{}/{}] -> {}",
            self.session.role.name(),
            self.session.state.name(),
            state.name()
        );
        self.session.state = state;
    }

    /// Moves into a waiting state and arms its timer
    pub(crate) fn await_frame(&mut self, state: RangingState, now: Instant) {
        self.set_state(state);
        self.timing.arm(state, now);
    }

    /// Delivers the result of a remote ranging to the application
    pub(crate) fn send_remote_confirm(&self, initiator: AddrSpec, reflector: AddrSpec, result: MeasurementResult) {
        log::info!(
            "Remote range confirm: status=0x{:02X} distance={} dqf={}",
            result.status() as u8,
            result.distance_cm(),
            result.dqf()
        );
        self.indicate(RtbConfirm::Range(RangeConfirm {
            kind: ConfirmKind::Remote { initiator, reflector },
            result,
        }));
    }

    /// Sends a confirm other than the pending local range confirm
    pub(crate) fn indicate(&self, confirm: RtbConfirm) {
        send_unreserved(&self.confirm_sender, confirm, self.session.confirm_slot.is_some());
    }

    // ====== Cooperative Task ======

    /// One cooperative step at the current time
    pub fn task(&mut self) {
        self.task_at(Instant::now());
    }

    /// One cooperative step at the given time
    ///
    /// Drains at most one event, handles timer expiry and advances the state
    /// machine by at most one step.
    pub fn task_at(&mut self, now: Instant) {
        if let Ok(event) = self.event_receiver.try_receive() {
            self.handle_event(event, now);
        }
        self.handle_timers(now);
        self.advance(now);
    }

    /// Async service loop
    ///
    /// Serves link events, application requests and timer deadlines until the
    /// executor drops the future.
    ///
    /// # Arguments
    /// * `requests` - Queue the application posts its requests into
    pub async fn run(&mut self, requests: RtbRequestReceiver) -> ! {
        log!(log::Level::Info, "Ranging engine task started");
        loop {
            let now = Instant::now();
            self.handle_timers(now);
            while self.advance(now) {}

            let deadline = self.timing.next_deadline();
            let expiry = async move {
                match deadline {
                    Some(at) => Timer::at(at).await,
                    None => core::future::pending::<()>().await,
                }
            };
            let events = self.event_receiver;
            match select3(events.receive(), requests.receive(), expiry).await {
                Either3::First(event) => self.handle_event(event, Instant::now()),
                Either3::Second(request) => self.handle_request(request),
                Either3::Third(()) => {}
            }
        }
    }

    pub(crate) fn handle_event(&mut self, event: RtbEvent, now: Instant) {
        match event {
            RtbEvent::FrameReceived(frame) => self.handle_frame(&frame, now),
            RtbEvent::TransmitDone(status) => self.handle_transmit_done(status, now),
        }
    }

    /// Routes expired timers
    ///
    /// Every await phase leaves its state on expiry: the Initiator fails with
    /// `Timeout`, the Reflector just ends the transaction.
    pub(crate) fn handle_timers(&mut self, now: Instant) {
        if let Some(phase) = self.timing.take_expired(now) {
            if !self.session.is_idle() {
                log::warn!("[{}/{}] Timeout waiting in {}", self.session.role.name(), self.session.state.name(), phase.name());
                match phase {
                    RangingState::AwaitRangeAccept | RangingState::AwaitPmuStart | RangingState::AwaitResultConf => {
                        self.fail_transaction(RtbStatus::Timeout)
                    }
                    _ => self.exit(),
                }
            }
        }

        if let Some(watch) = self.timing.take_expired_remote(now) {
            log::warn!("No Remote-Range-Confirm received");
            self.send_remote_confirm(watch.initiator, watch.reflector, MeasurementResult::failure(RtbStatus::Timeout));
        }
    }

    /// Performs the action of the current state
    ///
    /// # Returns
    /// `true` if a step was taken
    pub(crate) fn advance(&mut self, now: Instant) -> bool {
        if self.session.tx_in_progress {
            return false;
        }
        match self.session.state {
            RangingState::InitRangeReq => self.tx_range_request(),
            RangingState::InitRangeAccept => self.tx_range_accept(),
            RangingState::InitTimeSyncReq => self.tx_time_sync_request(),
            RangingState::InitPmuStart => self.tx_pmu_start(),
            RangingState::PrepareResultExchange => self.prepare_result_exchange(now),
            RangingState::InitResultReq => self.tx_result_request(),
            RangingState::InitResultConf => self.tx_result_confirm(),
            RangingState::ResultCalc => self.calculate_result(),
            RangingState::InitRemoteRangeConf => self.tx_remote_range_confirm(),
            RangingState::InitRemoteRangeReq => self.tx_remote_range_request(),
            _ => return false,
        }
        true
    }

    pub(crate) fn next_sequence_number(&mut self) -> u8 {
        let sequence_number = self.sequence_number;
        self.sequence_number = self.sequence_number.wrapping_add(1);
        sequence_number
    }
}

/// 0xFFFF and 0xFFFE mean the node has no short address to range with
pub(crate) fn has_usable_short_address(short_address: u16) -> bool {
    short_address != BROADCAST_SHORT_ADDRESS && short_address != NO_SHORT_ADDRESS
}
