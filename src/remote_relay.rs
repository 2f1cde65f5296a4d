//! # Remote Ranging Relay
//!
//! Ranging between two other nodes on behalf of a Coordinator.
//!
//! ```text
//!   Coordinator ──Remote-Range-Request──► Initiator ◄──local ranging──► Reflector
//!   Coordinator ◄──Remote-Range-Confirm── Initiator
//! ```
//!
//! The Coordinator never measures. Once its request is acknowledged it
//! returns to idle and keeps only a remote watch in the timing supervisor; the
//! relayed confirm or the watch's expiry produces the remote range confirm.
//! The Initiator runs an ordinary local transaction but reports the result in
//! a Remote-Range-Confirm instead of a local confirm.

use embassy_time::Instant;
use log::log;

use crate::confirm::MeasurementResult;
use crate::frames::rtb_frame::RTB_PROTOCOL_VERSION;
use crate::frames::{AddrMode, MacHeader, RemoteRangeConfirmPayload, RemoteRangeRequestPayload, RtbFrame};
use crate::link::{LinkLayer, TxStatus};
use crate::pmu::{Capabilities, PmuAdapter, RANGING_METHOD_PMU, RemoteCapabilities};
use crate::ranging_engine::{RangeRequest, RangingEngine, has_usable_short_address};
use crate::session::{RangingRole, RangingState};
use crate::status::RtbStatus;

impl<L: LinkLayer, P: PmuAdapter> RangingEngine<L, P> {
    // ====== Coordinator ======

    /// Accepts a remote ranging request with this node as Coordinator
    ///
    /// # Arguments
    /// * `request` - Initiator and Reflector to range between
    /// * `mode` - Addressing mode of this node in the Remote-Range-Request
    pub(crate) fn start_remote(&mut self, request: &RangeRequest, mode: AddrMode) -> Result<(), RtbStatus> {
        if self.timing.remote_watch().is_some() {
            return Err(RtbStatus::RangingInProgress);
        }
        if !self.pib.ranging_enabled {
            return Err(RtbStatus::UnsupportedRanging);
        }
        if mode == AddrMode::None {
            return Err(RtbStatus::InvalidParameter);
        }
        if mode == AddrMode::Short && !has_usable_short_address(self.link.short_address()) {
            return Err(RtbStatus::NoShortAddress);
        }
        if request.initiator.is_none() || request.reflector.is_none() {
            return Err(RtbStatus::InvalidParameter);
        }

        self.session.initiator = request.initiator;
        self.session.reflector = request.reflector;
        self.session.coordinator = self.link.own_address(mode);
        self.session.method = RANGING_METHOD_PMU;
        self.session.sweep = self.pib.frequency_sweep();
        self.session.remote_caps = RemoteCapabilities::with(self.pib.provide_antenna_div_results, self.pib.apply_min_dist_threshold);
        self.session.requested_tx_power = self.pib.provide_ranging_transmit_power.then_some(self.pib.ranging_transmit_power);
        self.session.enter(RangingRole::Coordinator, RangingState::InitRemoteRangeReq);

        log::info!("[Coordinator] Remote ranging started");
        Ok(())
    }

    pub(crate) fn tx_remote_range_request(&mut self) {
        let frame = RtbFrame::RemoteRangeRequest(RemoteRangeRequestPayload {
            version: RTB_PROTOCOL_VERSION,
            reflector: self.session.reflector,
            method: self.session.method,
            sweep: self.session.sweep,
            remote_caps: self.session.remote_caps,
            tx_power: self.session.requested_tx_power,
        });
        self.transmit_frame(frame, self.session.coordinator, self.session.initiator, RangingState::RemoteRangeReqSent);
    }

    /// Hands the transaction over to the remote watch once the request is out
    pub(crate) fn remote_request_sent(&mut self, status: TxStatus, now: Instant) {
        if status.is_success() {
            log!(log::Level::Debug, "[Coordinator/RemoteRangeReqSent] Watching for Remote-Range-Confirm");
            self.timing.watch_remote(self.session.initiator, self.session.reflector, now);
        } else {
            self.send_remote_confirm(self.session.initiator, self.session.reflector, MeasurementResult::failure(status.into()));
        }
        self.exit();
    }

    /// Delivers the result relayed by the Initiator
    ///
    /// Only the Initiator the Coordinator is watching for may answer.
    pub(crate) fn rx_remote_range_confirm(&mut self, header: &MacHeader, confirm: &RemoteRangeConfirmPayload) {
        if !self.session.is_idle() {
            log::warn!(
                "[{}/{}] Remote-Range-Confirm while ranging, ignoring",
                self.session.role.name(),
                self.session.state.name()
            );
            return;
        }
        let expected = self.timing.remote_watch().is_some_and(|watch| watch.initiator == header.source);
        if !expected {
            log::warn!("Unexpected Remote-Range-Confirm, ignoring");
            return;
        }
        if let Some(watch) = self.timing.cancel_remote_watch() {
            self.send_remote_confirm(watch.initiator, watch.reflector, confirm.result);
        }
    }

    // ====== Initiator on behalf of a Coordinator ======

    /// Opens an Initiator session for a Coordinator
    ///
    /// A request that fails validation is answered right away with a
    /// Remote-Range-Confirm carrying the reason.
    pub(crate) fn rx_remote_range_request(&mut self, header: &MacHeader, request: &RemoteRangeRequestPayload) {
        if !self.session.is_idle() {
            log::warn!(
                "[{}/{}] Remote-Range-Request while ranging, ignoring",
                self.session.role.name(),
                self.session.state.name()
            );
            return;
        }
        if header.source.is_none() {
            log::warn!("Remote-Range-Request without Coordinator address, ignoring");
            return;
        }

        self.session.initiator = header.destination;
        self.session.coordinator = header.source;
        self.session.reflector = request.reflector;
        self.session.method = request.method;
        self.session.sweep = request.sweep;
        self.session.remote_caps = request.remote_caps;
        self.session.enter(RangingRole::Initiator, RangingState::InitRangeReq);
        log::info!("[Initiator] Remote ranging started for Coordinator");

        if let Err(status) = self.accept_remote_request(request) {
            log::warn!("[Initiator/InitRangeReq] Rejecting Remote-Range-Request: 0x{:02X}", status as u8);
            self.session.error = status;
            self.set_state(RangingState::InitRemoteRangeConf);
        }
    }

    fn accept_remote_request(&mut self, request: &RemoteRangeRequestPayload) -> Result<(), RtbStatus> {
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
        if request.reflector.is_none() {
            return Err(RtbStatus::InvalidParameter);
        }

        self.session.apply_min_dist_threshold = request.remote_caps.apply_min_dist_threshold();
        self.session.caps = Capabilities::proposed_by_initiator(self.pib.enable_antenna_div);
        self.session.requested_tx_power = request
            .tx_power
            .or(self.pib.provide_ranging_transmit_power.then_some(self.pib.ranging_transmit_power));
        self.configure_ranging(request.tx_power.unwrap_or(self.pib.ranging_transmit_power));
        Ok(())
    }

    /// Relays the result, or the reason the transaction failed, to the Coordinator
    pub(crate) fn tx_remote_range_confirm(&mut self) {
        let result = if self.session.error.is_success() {
            self.session.result.unwrap_or(MeasurementResult::failure(RtbStatus::Reject))
        } else {
            MeasurementResult::failure(self.session.error)
        };
        // a request that failed to decode its reflector is answered with the own address
        let reflector = if self.session.reflector.is_none() {
            self.session.initiator
        } else {
            self.session.reflector
        };
        let frame = RtbFrame::RemoteRangeConfirm(RemoteRangeConfirmPayload { reflector, result });
        self.transmit_frame(frame, self.session.initiator, self.session.coordinator, RangingState::RemoteRangeConfSent);
    }
}
