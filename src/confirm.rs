//! # Confirms
//!
//! Results delivered from the ranging engine to the application.
//!
//! Every accepted ranging request produces exactly one [`RtbConfirm::Range`].
//! For local requests this is enforced by a [`ConfirmSlot`] that is taken when
//! the request is accepted and consumed by value when the confirm is sent.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Sender;

use crate::frames::AddrSpec;
use crate::pib::PibAttribute;
use crate::pmu::ValidityBitmap;
use crate::status::RtbStatus;
use crate::{CONFIRM_QUEUE_SIZE, MAX_ANTENNA_PAIRS};

/// Distance value reported for every failed measurement
pub const INVALID_DISTANCE: u32 = 0xFFFF_FFFF;

/// Highest distance quality factor (percent)
pub const DQF_MAX: u8 = 100;

/// Distance and quality of one antenna pair
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct MeasurementPair {
    pub distance_cm: u32,
    pub dqf: u8,
}

impl MeasurementPair {
    pub const INVALID: MeasurementPair = MeasurementPair {
        distance_cm: INVALID_DISTANCE,
        dqf: 0,
    };

    pub fn is_valid(&self) -> bool {
        self.distance_cm != INVALID_DISTANCE
    }
}

impl Default for MeasurementPair {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Up to four per-antenna-pair results attached to a measurement
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct AntennaPairResults {
    pairs: [MeasurementPair; MAX_ANTENNA_PAIRS],
    count: usize,
}

impl AntennaPairResults {
    pub const fn new() -> Self {
        Self {
            pairs: [MeasurementPair::INVALID; MAX_ANTENNA_PAIRS],
            count: 0,
        }
    }

    /// Appends a pair result; results beyond four pairs are dropped
    pub fn push(&mut self, pair: MeasurementPair) {
        if self.count < MAX_ANTENNA_PAIRS {
            self.pairs[self.count] = pair;
            self.count += 1;
        }
    }

    pub fn as_slice(&self) -> &[MeasurementPair] {
        &self.pairs[..self.count]
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Outcome of one ranging transaction
///
/// # Invariants
/// `distance_cm() == INVALID_DISTANCE` exactly when `status()` is not
/// `Success`; failed results always carry DQF 0. The constructors enforce
/// this, so the fields are private.
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct MeasurementResult {
    status: RtbStatus,
    distance_cm: u32,
    dqf: u8,
    pairs: AntennaPairResults,
}

impl MeasurementResult {
    /// Successful measurement
    ///
    /// An invalid distance can not be a success and is reported as `Reject`.
    pub fn success(distance_cm: u32, dqf: u8) -> Self {
        if distance_cm == INVALID_DISTANCE {
            return Self::failure(RtbStatus::Reject);
        }
        Self {
            status: RtbStatus::Success,
            distance_cm,
            dqf: dqf.min(DQF_MAX),
            pairs: AntennaPairResults::new(),
        }
    }

    /// Failed measurement with the given reason
    pub fn failure(status: RtbStatus) -> Self {
        let status = if status.is_success() { RtbStatus::Reject } else { status };
        Self {
            status,
            distance_cm: INVALID_DISTANCE,
            dqf: 0,
            pairs: AntennaPairResults::new(),
        }
    }

    /// Attaches per-antenna-pair results to a successful measurement
    pub fn with_pairs(mut self, pairs: AntennaPairResults) -> Self {
        if self.status.is_success() {
            self.pairs = pairs;
        }
        self
    }

    pub fn status(&self) -> RtbStatus {
        self.status
    }

    pub fn distance_cm(&self) -> u32 {
        self.distance_cm
    }

    pub fn dqf(&self) -> u8 {
        self.dqf
    }

    pub fn pairs(&self) -> &[MeasurementPair] {
        self.pairs.as_slice()
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Who requested the measurement a confirm belongs to
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum ConfirmKind {
    /// Requested by the local application with this node as Initiator
    Local,
    /// Requested by this node as Coordinator between two other nodes
    Remote { initiator: AddrSpec, reflector: AddrSpec },
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RangeConfirm {
    pub kind: ConfirmKind,
    pub result: MeasurementResult,
}

/// Message from the engine to the application
#[derive(Clone, Copy)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum RtbConfirm {
    /// Terminal result of a ranging request
    Range(RangeConfirm),

    /// Result of an attribute write
    Set { attribute: PibAttribute, status: RtbStatus },

    /// Result of a reset request
    Reset { status: RtbStatus },

    /// Diagnostic: frequencies of one antenna pair that produced usable samples
    PmuValidity { antenna_pair: u8, validity: ValidityBitmap },
}

pub type ConfirmSender = Sender<'static, CriticalSectionRawMutex, RtbConfirm, CONFIRM_QUEUE_SIZE>;

/// Pushes a confirm to the application queue
///
/// A full queue drops the confirm with a warning; the engine never blocks on
/// the application.
pub(crate) fn send_confirm(sender: &ConfirmSender, confirm: RtbConfirm) {
    if sender.try_send(confirm).is_err() {
        log::warn!("Confirm queue full, dropping confirm");
    }
}

/// Pushes a confirm that is not the range confirm of the running transaction
///
/// While `reserved` is set the last free queue entry belongs to the pending
/// [`ConfirmSlot`]; a confirm that would take it is dropped with a warning.
pub(crate) fn send_unreserved(sender: &ConfirmSender, confirm: RtbConfirm, reserved: bool) {
    if reserved && sender.free_capacity() <= 1 {
        log::warn!("Confirm queue entry reserved for range confirm, dropping confirm");
        return;
    }
    send_confirm(sender, confirm);
}

/// Pending local range confirm of an accepted request
///
/// The engine is the only producer on the confirm queue. While a slot is
/// pending every other confirm goes through [`send_unreserved`], which keeps
/// one queue entry free, so [`ConfirmSlot::deliver`] finds room unless the
/// application left that entry occupied from before the request. Not `Clone`;
/// `deliver` consumes the slot, so at most one confirm is produced.
#[cfg_attr(feature = "std", derive(Debug))]
pub struct ConfirmSlot {
    _reserved: (),
}

impl ConfirmSlot {
    pub(crate) fn reserve() -> Self {
        Self { _reserved: () }
    }

    pub(crate) fn deliver(self, sender: &ConfirmSender, result: MeasurementResult) {
        log::info!(
            "Range confirm: status=0x{:02X} distance={} dqf={}",
            result.status() as u8,
            result.distance_cm(),
            result.dqf()
        );
        send_confirm(
            sender,
            RtbConfirm::Range(RangeConfirm {
                kind: ConfirmKind::Local,
                result,
            }),
        );
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use embassy_sync::channel::Channel;

    #[test]
    fn failure_carries_invalid_distance() {
        let result = MeasurementResult::failure(RtbStatus::Timeout);
        assert_eq!(result.distance_cm(), INVALID_DISTANCE);
        assert_eq!(result.dqf(), 0);
        assert_eq!(result.status(), RtbStatus::Timeout);
    }

    #[test]
    fn invalid_distance_is_never_a_success() {
        let result = MeasurementResult::success(INVALID_DISTANCE, 80);
        assert!(!result.is_success());
        assert_eq!(MeasurementResult::failure(RtbStatus::Success).status(), RtbStatus::Reject);
    }

    #[test]
    fn pairs_only_attach_to_success() {
        let mut pairs = AntennaPairResults::new();
        pairs.push(MeasurementPair { distance_cm: 120, dqf: 90 });
        pairs.push(MeasurementPair { distance_cm: 124, dqf: 70 });

        let ok = MeasurementResult::success(122, 150).with_pairs(pairs);
        assert_eq!(ok.pairs().len(), 2);
        assert_eq!(ok.dqf(), DQF_MAX);

        let failed = MeasurementResult::failure(RtbStatus::NoAck).with_pairs(pairs);
        assert!(failed.pairs().is_empty());
    }

    #[test]
    fn slot_delivers_one_local_confirm() {
        let channel: &'static Channel<CriticalSectionRawMutex, RtbConfirm, CONFIRM_QUEUE_SIZE> = Box::leak(Box::new(Channel::new()));
        let slot = ConfirmSlot::reserve();
        slot.deliver(&channel.sender(), MeasurementResult::success(250, 88));

        match channel.try_receive() {
            Ok(RtbConfirm::Range(confirm)) => {
                assert_eq!(confirm.kind, ConfirmKind::Local);
                assert_eq!(confirm.result.distance_cm(), 250);
            }
            other => panic!("Expected Range confirm, got: {:?}", other.map(|c| core::mem::discriminant(&c))),
        }
        assert!(channel.try_receive().is_err());
    }

    #[test]
    fn pending_slot_keeps_one_entry_free() {
        let channel: &'static Channel<CriticalSectionRawMutex, RtbConfirm, CONFIRM_QUEUE_SIZE> = Box::leak(Box::new(Channel::new()));
        let sender = channel.sender();
        let slot = ConfirmSlot::reserve();
        for _ in 0..CONFIRM_QUEUE_SIZE + 2 {
            send_unreserved(
                &sender,
                RtbConfirm::Set {
                    attribute: PibAttribute::PmuVerboseLevel,
                    status: RtbStatus::Success,
                },
                true,
            );
        }
        assert_eq!(channel.len(), CONFIRM_QUEUE_SIZE - 1);

        slot.deliver(&sender, MeasurementResult::failure(RtbStatus::Timeout));
        let mut last = None;
        while let Ok(confirm) = channel.try_receive() {
            last = Some(confirm);
        }
        match last {
            Some(RtbConfirm::Range(confirm)) => assert_eq!(confirm.result.status(), RtbStatus::Timeout),
            other => panic!("Expected Range confirm last, got: {:?}", other.map(|c| core::mem::discriminant(&c))),
        }
    }
}
