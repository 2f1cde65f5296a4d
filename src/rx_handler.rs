//! # RX Handler
//!
//! Received ranging frames and the steps that follow from them.
//!
//! Every command is legal in exactly one (role, state) combination. The two
//! request commands open a session and are only taken by an idle node; all
//! other commands must come from the peer of the running transaction and are
//! dropped with a warning otherwise, without touching the session.

use embassy_time::Instant;
use log::log;

use crate::confirm::RtbConfirm;
use crate::frames::rtb_frame::{RESULT_TYPE_PMU_VALUES, RTB_PROTOCOL_VERSION};
use crate::frames::{
    AddrSpec, FrameError, MacHeader, RadioFrame, RangeAcceptPayload, RangeRequestPayload, ResultConfirmPayload, ResultRequestPayload,
    RtbCommand, RtbFrame,
};
use crate::link::LinkLayer;
use crate::pmu::{AntennaAssignment, MeasurementSide, PmuAdapter, RANGING_METHOD_PMU, RangeParams};
use crate::ranging_engine::RangingEngine;
use crate::result_calc;
use crate::session::{RangingRole, RangingState, ResultExchange};
use crate::status::RtbStatus;
use crate::tx_scheduler::result_chunk_len;

impl<L: LinkLayer, P: PmuAdapter> RangingEngine<L, P> {
    /// Decodes a received frame and dispatches it
    ///
    /// Frames that are not ranging frames or not addressed to this node are
    /// ignored.
    pub(crate) fn handle_frame(&mut self, radio_frame: &RadioFrame, now: Instant) {
        let (header, frame) = match RtbFrame::decode(radio_frame) {
            Ok(decoded) => decoded,
            Err(FrameError::BadMagic) | Err(FrameError::UnsupportedFrameType) => {
                log!(log::Level::Trace, "Received frame is not a ranging frame");
                return;
            }
            Err(_) => {
                log::warn!("Dropping malformed ranging frame ({} octets)", radio_frame.length);
                return;
            }
        };
        if !self.link.is_own_address(&header.destination) {
            log!(log::Level::Trace, "Ranging frame for another node, ignoring");
            return;
        }

        let command = frame.command();
        log!(
            log::Level::Debug,
            "[{}/{}] Received {} (dsn {})",
            self.session.role.name(),
            self.session.state.name(),
            command.name(),
            header.sequence_number
        );

        match frame {
            RtbFrame::RangeRequest(payload) => self.rx_range_request(&header, &payload),
            RtbFrame::RemoteRangeRequest(payload) => self.rx_remote_range_request(&header, &payload),
            RtbFrame::RemoteRangeConfirm(payload) => self.rx_remote_range_confirm(&header, &payload),
            _ if !self.is_from_peer(&header.source) => {
                log::warn!(
                    "[{}/{}] Ignoring {} from outside the transaction",
                    self.session.role.name(),
                    self.session.state.name(),
                    command.name()
                );
            }
            RtbFrame::RangeAccept(payload) => self.rx_range_accept(&payload),
            RtbFrame::TimeSyncRequest { .. } => self.rx_time_sync_request(now),
            RtbFrame::PmuStart => self.rx_pmu_start(),
            RtbFrame::ResultRequest(payload) => self.rx_result_request(&payload),
            RtbFrame::ResultConfirm(payload) => self.rx_result_confirm(&payload),
        }
    }

    fn is_from_peer(&self, source: &AddrSpec) -> bool {
        match self.session.role {
            RangingRole::Initiator => *source == self.session.reflector,
            RangingRole::Reflector => *source == self.session.initiator,
            _ => false,
        }
    }

    /// Checks that `command` is legal in the current role and state
    fn expects(&self, role: RangingRole, state: RangingState, command: RtbCommand) -> bool {
        if self.session.role == role && self.session.state == state {
            return true;
        }
        log::warn!(
            "[{}/{}] Unexpected {}, ignoring",
            self.session.role.name(),
            self.session.state.name(),
            command.name()
        );
        false
    }

    // ====== Reflector ======

    /// Opens a Reflector session
    ///
    /// A request that fails validation still opens the session, which then
    /// only sends the rejecting Range-Accept.
    fn rx_range_request(&mut self, header: &MacHeader, request: &RangeRequestPayload) {
        if !self.session.is_idle() {
            log::warn!("[{}/{}] Range-Request while ranging, ignoring", self.session.role.name(), self.session.state.name());
            return;
        }

        self.session.initiator = header.source;
        self.session.reflector = header.destination;
        self.session.coordinator = AddrSpec::NONE;
        self.session.method = request.method;
        self.session.sweep = request.sweep;
        self.session.enter(RangingRole::Reflector, RangingState::InitRangeAccept);
        log::info!("[Reflector] Ranging started");

        if let Err(status) = self.accept_range_request(request) {
            log::warn!("[Reflector/InitRangeAccept] Rejecting Range-Request: 0x{:02X}", status as u8);
            self.session.error = status;
        }
    }

    fn accept_range_request(&mut self, request: &RangeRequestPayload) -> Result<(), RtbStatus> {
        if !self.pib.ranging_enabled {
            return Err(RtbStatus::UnsupportedRanging);
        }
        if request.version != RTB_PROTOCOL_VERSION {
            return Err(RtbStatus::UnsupportedProtocol);
        }
        if request.method != RANGING_METHOD_PMU {
            return Err(RtbStatus::UnsupportedMethod);
        }
        request.sweep.validate()?;

        let caps = request.caps.accepted_by_reflector(self.pib.enable_antenna_div);
        self.session.caps = caps;
        let params = RangeParams {
            sweep: request.sweep,
            apply_min_dist_threshold: self.pib.apply_min_dist_threshold,
            antennas: AntennaAssignment::with(caps, MeasurementSide::Reflector, self.pib.default_antenna_index()),
        };
        self.pmu
            .configure(&params, MeasurementSide::Reflector)
            .map_err(|_| RtbStatus::InvalidParameter)?;
        self.session.params = Some(params);
        self.configure_ranging(request.tx_power.unwrap_or(self.pib.ranging_transmit_power));
        Ok(())
    }

    fn rx_time_sync_request(&mut self, now: Instant) {
        if !self.expects(RangingRole::Reflector, RangingState::AwaitTimeSyncReq, RtbCommand::TimeSyncRequest) {
            return;
        }
        self.timing.cancel();
        self.await_frame(RangingState::InitPmuStart, now);
    }

    /// Selects the chunk of values answered with the next Result-Confirm
    fn rx_result_request(&mut self, request: &ResultRequestPayload) {
        if !self.expects(RangingRole::Reflector, RangingState::AwaitResultReq, RtbCommand::ResultRequest) {
            return;
        }
        self.timing.cancel();

        let pair_index = request.pair_index as usize;
        let pair_count = self.session.params.map(|params| params.antennas.len()).unwrap_or(0);
        if request.result_type != RESULT_TYPE_PMU_VALUES || pair_index >= pair_count {
            log::warn!("[Reflector/AwaitResultReq] Result-Request for unknown results, ending transaction");
            self.exit();
            return;
        }

        let available = self.pmu.averages(pair_index).len();
        let offset = (request.offset as usize).min(available);
        self.session.exchange = ResultExchange {
            pair_index,
            offset,
            chunk_len: result_chunk_len(request.count as usize, offset, available),
        };
        self.set_state(RangingState::InitResultConf);
    }

    // ====== Initiator ======

    fn rx_range_accept(&mut self, accept: &RangeAcceptPayload) {
        if !self.expects(RangingRole::Initiator, RangingState::AwaitRangeAccept, RtbCommand::RangeAccept) {
            return;
        }
        self.timing.cancel();

        match *accept {
            RangeAcceptPayload::Accepted { method, caps } => {
                if method != self.session.method {
                    self.fail_transaction(RtbStatus::UnsupportedMethod);
                    return;
                }
                self.session.caps = caps;
                let params = RangeParams {
                    sweep: self.session.sweep,
                    apply_min_dist_threshold: self.session.apply_min_dist_threshold,
                    antennas: AntennaAssignment::with(caps, MeasurementSide::Initiator, self.pib.default_antenna_index()),
                };
                if self.pmu.configure(&params, MeasurementSide::Initiator).is_err() {
                    self.fail_transaction(RtbStatus::InvalidParameter);
                    return;
                }
                self.session.params = Some(params);
                self.set_state(RangingState::InitTimeSyncReq);
            }
            RangeAcceptPayload::Rejected { reason } => self.fail_transaction(reason),
        }
    }

    fn rx_pmu_start(&mut self) {
        if !self.expects(RangingRole::Initiator, RangingState::AwaitPmuStart, RtbCommand::PmuStart) {
            return;
        }
        self.timing.cancel();
        match self.pmu.run_measurement() {
            Ok(()) => self.set_state(RangingState::PrepareResultExchange),
            Err(_) => self.fail_transaction(RtbStatus::Timeout),
        }
    }

    /// Stores a chunk of the Reflector's values and picks the next request
    fn rx_result_confirm(&mut self, confirm: &ResultConfirmPayload) {
        if !self.expects(RangingRole::Initiator, RangingState::AwaitResultConf, RtbCommand::ResultConfirm) {
            return;
        }
        let exchange = self.session.exchange;
        if confirm.result_type != RESULT_TYPE_PMU_VALUES || confirm.pair_index as usize != exchange.pair_index {
            log::warn!("[Initiator/AwaitResultConf] Result-Confirm for another antenna pair, ignoring");
            return;
        }
        self.timing.cancel();

        let stored = self.session.remote_results.store(exchange.pair_index, exchange.offset, confirm.values());
        let offset = exchange.offset + stored;
        let expected = self.session.sweep.frequency_count();
        let pair_count = self.session.params.map(|params| params.antennas.len()).unwrap_or(0);

        if stored > 0 && offset < expected {
            self.session.exchange.offset = offset;
            self.set_state(RangingState::InitResultReq);
        } else if exchange.pair_index + 1 < pair_count {
            self.session.exchange = ResultExchange {
                pair_index: exchange.pair_index + 1,
                ..ResultExchange::default()
            };
            self.set_state(RangingState::InitResultReq);
        } else {
            self.set_state(RangingState::ResultCalc);
        }
    }

    // ====== Both ======

    /// Starts the result exchange after the measurement
    pub(crate) fn prepare_result_exchange(&mut self, now: Instant) {
        self.session.exchange = ResultExchange::default();
        self.session.remote_results.reset();

        if self.pib.pmu_verbose_level > 0 {
            let pair_count = self.session.params.map(|params| params.antennas.len()).unwrap_or(0);
            for pair in 0..pair_count {
                self.indicate(RtbConfirm::PmuValidity {
                    antenna_pair: pair as u8,
                    validity: self.pmu.validity(pair),
                });
            }
        }

        match self.session.role {
            RangingRole::Initiator => self.set_state(RangingState::InitResultReq),
            _ => self.await_frame(RangingState::AwaitResultReq, now),
        }
    }

    /// Computes the distance once all values of all antenna pairs arrived
    pub(crate) fn calculate_result(&mut self) {
        let Some(params) = self.session.params else {
            self.fail_transaction(RtbStatus::Reject);
            return;
        };
        let pairs = result_calc::pair_distances(&mut self.pmu, &params, &self.session.remote_results);
        let provide_pairs = if self.session.is_remote() {
            self.session.remote_caps.provide_antenna_div_results()
        } else {
            self.pib.provide_antenna_div_results
        };
        let result = result_calc::combine(self.config.combine_policy, &pairs, provide_pairs);

        if self.session.is_remote() {
            self.session.result = Some(result);
            self.session.error = RtbStatus::Success;
            self.set_state(RangingState::InitRemoteRangeConf);
            return;
        }
        if let Some(slot) = self.session.confirm_slot.take() {
            slot.deliver(&self.confirm_sender, result);
        }
        self.exit();
    }
}
