//! # TX Scheduler
//!
//! Builds the frames of the current state, hands them to the link layer and
//! continues the protocol when the transmission completed.
//!
//! At most one frame is in flight per transaction: a successful `transmit`
//! moves the session into the matching `*Sent` state and sets
//! `tx_in_progress`, which stops the task step from advancing until the
//! [`RtbEvent::TransmitDone`](crate::link::RtbEvent::TransmitDone) of that frame arrives.

use embassy_time::Instant;
use log::log;

use crate::frames::rtb_frame::{MAX_RESULT_VALUES_PER_FRAME, RESULT_TYPE_PMU_VALUES, RTB_PROTOCOL_VERSION};
use crate::frames::{AddrSpec, MacHeader, RangeAcceptPayload, RangeRequestPayload, ResultConfirmPayload, ResultRequestPayload, RtbFrame};
use crate::link::{CsmaMode, LinkLayer, TxStatus};
use crate::pmu::PmuAdapter;
use crate::ranging_engine::RangingEngine;
use crate::session::RangingState;
use crate::status::RtbStatus;

impl<L: LinkLayer, P: PmuAdapter> RangingEngine<L, P> {
    /// Encodes and transmits one ranging frame
    ///
    /// # Arguments
    /// * `frame` - Command to send
    /// * `source` - Own address used for this transaction
    /// * `destination` - Peer address
    /// * `sent_state` - State waiting for the transmission to complete
    pub(crate) fn transmit_frame(&mut self, frame: RtbFrame, source: AddrSpec, destination: AddrSpec, sent_state: RangingState) {
        let command = frame.command();
        let header = MacHeader {
            sequence_number: self.next_sequence_number(),
            ack_request: command.uses_csma_and_ack(),
            destination,
            source,
        };
        let csma = if command.uses_csma_and_ack() {
            CsmaMode::Unslotted
        } else {
            CsmaMode::NoCsma
        };

        let radio_frame = match frame.encode(&header) {
            Ok(radio_frame) => radio_frame,
            Err(_) => {
                log::warn!("[{}/{}] Failed to encode {}", self.session.role.name(), self.session.state.name(), command.name());
                self.abort(RtbStatus::OutOfBuffers);
                return;
            }
        };

        match self.link.transmit(&radio_frame, csma, header.ack_request) {
            Ok(()) => {
                log!(
                    log::Level::Debug,
                    "[{}/{}] Sending {} (dsn {}, {} octets)",
                    self.session.role.name(),
                    self.session.state.name(),
                    command.name(),
                    header.sequence_number,
                    radio_frame.length
                );
                self.session.tx_in_progress = true;
                self.set_state(sent_state);
            }
            Err(error) => self.abort(error.into()),
        }
    }

    // ====== Initiator Frames ======

    pub(crate) fn tx_range_request(&mut self) {
        let frame = RtbFrame::RangeRequest(RangeRequestPayload {
            version: RTB_PROTOCOL_VERSION,
            method: self.session.method,
            sweep: self.session.sweep,
            caps: self.session.caps,
            tx_power: self.session.requested_tx_power,
        });
        self.transmit_frame(frame, self.session.initiator, self.session.reflector, RangingState::RangeReqSent);
    }

    pub(crate) fn tx_time_sync_request(&mut self) {
        let frame = RtbFrame::TimeSyncRequest {
            version: RTB_PROTOCOL_VERSION,
        };
        self.transmit_frame(frame, self.session.initiator, self.session.reflector, RangingState::TimeSyncReqSent);
    }

    /// Requests the rest of the current antenna pair's values from the Reflector
    pub(crate) fn tx_result_request(&mut self) {
        let exchange = self.session.exchange;
        let expected = self.session.sweep.frequency_count();
        let frame = RtbFrame::ResultRequest(ResultRequestPayload {
            result_type: RESULT_TYPE_PMU_VALUES,
            pair_index: exchange.pair_index as u8,
            count: expected.saturating_sub(exchange.offset) as u16,
            offset: exchange.offset as u16,
        });
        self.transmit_frame(frame, self.session.initiator, self.session.reflector, RangingState::ResultReqSent);
    }

    // ====== Reflector Frames ======

    /// Accepts the Range-Request, or rejects it with the reason found during validation
    pub(crate) fn tx_range_accept(&mut self) {
        let payload = if self.session.error.is_success() {
            RangeAcceptPayload::Accepted {
                method: self.session.method,
                caps: self.session.caps,
            }
        } else {
            RangeAcceptPayload::Rejected {
                reason: self.session.error,
            }
        };
        self.transmit_frame(
            RtbFrame::RangeAccept(payload),
            self.session.reflector,
            self.session.initiator,
            RangingState::AcceptSent,
        );
    }

    pub(crate) fn tx_pmu_start(&mut self) {
        self.transmit_frame(RtbFrame::PmuStart, self.session.reflector, self.session.initiator, RangingState::PmuStartSent);
    }

    /// Sends the chunk selected by the last Result-Request
    pub(crate) fn tx_result_confirm(&mut self) {
        let exchange = self.session.exchange;
        let averages = self.pmu.averages(exchange.pair_index);
        let end = (exchange.offset + exchange.chunk_len).min(averages.len());
        let chunk = averages.get(exchange.offset..end).unwrap_or(&[]);
        let payload = ResultConfirmPayload::with(RESULT_TYPE_PMU_VALUES, exchange.pair_index as u8, chunk);
        self.transmit_frame(
            RtbFrame::ResultConfirm(payload),
            self.session.reflector,
            self.session.initiator,
            RangingState::ResultConfSent,
        );
    }

    // ====== Transmission Completion ======

    /// Continues the protocol after the link layer finished a transmission
    ///
    /// # Arguments
    /// * `status` - Outcome reported by the link layer
    /// * `now` - Time base for timers armed by the next state
    pub(crate) fn handle_transmit_done(&mut self, status: TxStatus, now: Instant) {
        if !self.session.tx_in_progress {
            log!(log::Level::Trace, "Transmit done without transmission in flight, ignoring");
            return;
        }
        self.session.tx_in_progress = false;

        if !status.is_success() {
            log::warn!(
                "[{}/{}] Transmission failed: 0x{:02X}",
                self.session.role.name(),
                self.session.state.name(),
                RtbStatus::from(status) as u8
            );
        }

        match self.session.state {
            RangingState::RangeReqSent => match status {
                TxStatus::Success => self.await_frame(RangingState::AwaitRangeAccept, now),
                _ => self.fail_transaction(status.into()),
            },
            RangingState::AcceptSent => {
                if status.is_success() && self.session.error.is_success() {
                    self.await_frame(RangingState::AwaitTimeSyncReq, now);
                } else {
                    self.exit();
                }
            }
            RangingState::TimeSyncReqSent => match status {
                TxStatus::Success => self.await_frame(RangingState::AwaitPmuStart, now),
                _ => self.fail_transaction(status.into()),
            },
            RangingState::PmuStartSent => {
                if !status.is_success() {
                    self.exit();
                    return;
                }
                self.timing.cancel();
                match self.pmu.run_measurement() {
                    Ok(()) => self.set_state(RangingState::PrepareResultExchange),
                    Err(_) => {
                        log::warn!("[Reflector/PmuStartSent] PMU measurement failed");
                        self.exit();
                    }
                }
            }
            RangingState::ResultReqSent => match status {
                TxStatus::Success => self.await_frame(RangingState::AwaitResultConf, now),
                _ => self.fail_transaction(status.into()),
            },
            RangingState::ResultConfSent => {
                if !status.is_success() || self.result_exchange_finished() {
                    self.exit();
                } else {
                    self.await_frame(RangingState::AwaitResultReq, now);
                }
            }
            RangingState::RemoteRangeReqSent => self.remote_request_sent(status, now),
            RangingState::RemoteRangeConfSent => self.exit(),
            other => {
                log::warn!("[{}/{}] Unexpected transmit done", self.session.role.name(), other.name());
            }
        }
    }

    /// Reflector sent the last chunk of the last antenna pair
    fn result_exchange_finished(&self) -> bool {
        let exchange = self.session.exchange;
        let pair_count = self.session.params.map(|params| params.antennas.len()).unwrap_or(0);
        let available = self.pmu.averages(exchange.pair_index).len();
        exchange.offset + exchange.chunk_len >= available && exchange.pair_index + 1 >= pair_count
    }
}

/// Values answered for one Result-Request
///
/// # Arguments
/// * `requested` - Count asked for by the Initiator
/// * `offset` - Start index, already limited to `available`
/// * `available` - Values measured for the antenna pair
pub(crate) fn result_chunk_len(requested: usize, offset: usize, available: usize) -> usize {
    requested.min(MAX_RESULT_VALUES_PER_FRAME).min(available.saturating_sub(offset))
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn chunk_is_limited_by_frame_size() {
        assert_eq!(result_chunk_len(407, 0, 407), MAX_RESULT_VALUES_PER_FRAME);
        assert_eq!(result_chunk_len(407 - 376, 376, 407), 31);
    }

    #[test]
    fn chunk_is_limited_by_request_and_availability() {
        assert_eq!(result_chunk_len(10, 0, 21), 10);
        assert_eq!(result_chunk_len(50, 15, 21), 6);
        assert_eq!(result_chunk_len(50, 21, 21), 0);
    }
}
