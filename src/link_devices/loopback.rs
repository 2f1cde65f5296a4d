//! # Loopback Link - In-Process Medium for Testing
//!
//! Connects several ranging engines of one process without a transceiver.
//!
//! ## Architecture
//!
//! - **LoopbackMedium**: Shared list of attached stations; cloning shares the medium
//! - **LoopbackLink**: [`LinkLayer`] of one station, handed to its engine
//!
//! A transmitted frame is delivered to every other station whose address
//! matches the destination of the MAC header, as an
//! [`RtbEvent::FrameReceived`] in that station's event queue. The sender then
//! gets its [`RtbEvent::TransmitDone`]: `Success`, or `NoAck` when an
//! acknowledgment was requested and no listening station matched.
//!
//! Delivery happens inside `transmit`, so every frame is queued at the
//! receiver before the sender sees its completion.
//!
//! ## Fault Injection
//!
//! - [`StationMode::Off`]: frames to the station are lost and never acknowledged
//! - [`StationMode::Deaf`]: frames are acknowledged but never reach the engine
//! - [`LoopbackLink::refuse_transmit`]: `transmit` fails synchronously

use std::cell::RefCell;
use std::sync::Arc;
use std::vec::Vec;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::TrySendError;
use log::{Level, log};

use crate::RtbEventSender;
use crate::frames::{AddrMode, AddrSpec, RadioFrame, RtbCommand, RtbFrame};
use crate::link::{CsmaMode, LinkError, LinkLayer, RtbEvent, TxStatus};

/// Reception behaviour of an attached station
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StationMode {
    Listening,
    /// Acknowledges frames but drops them
    Deaf,
    /// Neither receives nor acknowledges
    Off,
}

struct Station {
    pan_id: u16,
    short_address: u16,
    ieee_address: u64,
    mode: StationMode,
    event_sender: RtbEventSender,
}

impl Station {
    fn is_addressed_by(&self, spec: &AddrSpec) -> bool {
        if spec.pan_id != self.pan_id {
            return false;
        }
        match spec.mode {
            AddrMode::Short => spec.address as u16 == self.short_address,
            AddrMode::Long => spec.address == self.ieee_address,
            AddrMode::None => false,
        }
    }
}

/// Shared in-process radio medium
#[derive(Clone)]
pub struct LoopbackMedium {
    stations: Arc<Mutex<CriticalSectionRawMutex, RefCell<Vec<Station>>>>,
}

impl Default for LoopbackMedium {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackMedium {
    pub fn new() -> Self {
        Self {
            stations: Arc::new(Mutex::new(RefCell::new(Vec::new()))),
        }
    }

    /// Attaches a station to the medium
    ///
    /// # Arguments
    /// * `pan_id` - PAN of the station
    /// * `short_address` - 16-bit address (0xFFFE for "no short address")
    /// * `ieee_address` - 64-bit extended address, identifies the station on the medium
    /// * `event_sender` - Event queue of the station's engine
    ///
    /// # Returns
    /// The link layer to hand to the station's engine
    pub fn attach(&self, pan_id: u16, short_address: u16, ieee_address: u64, event_sender: RtbEventSender) -> LoopbackLink {
        self.stations.lock(|stations| {
            stations.borrow_mut().push(Station {
                pan_id,
                short_address,
                ieee_address,
                mode: StationMode::Listening,
                event_sender,
            })
        });
        LoopbackLink {
            medium: self.clone(),
            pan_id,
            short_address,
            ieee_address,
            event_sender,
            transmit_power: DEFAULT_TRANSMIT_POWER,
            max_transmit_power: u8::MAX,
            busy: false,
            refuse_transmit: None,
            reset_count: 0,
            sent_commands: Vec::new(),
        }
    }

    /// Changes how the station with the given extended address receives
    pub fn set_mode(&self, ieee_address: u64, mode: StationMode) {
        self.stations.lock(|stations| {
            for station in stations.borrow_mut().iter_mut().filter(|s| s.ieee_address == ieee_address) {
                station.mode = mode;
            }
        });
    }

    /// Delivers a frame to all matching stations except the sender
    ///
    /// # Returns
    /// Whether a station acknowledged the frame
    fn deliver(&self, frame: &RadioFrame, destination: &AddrSpec, sender_ieee: u64) -> bool {
        self.stations.lock(|stations| {
            let stations = stations.borrow();
            let mut acknowledged = false;
            for station in stations.iter() {
                if station.ieee_address == sender_ieee || !station.is_addressed_by(destination) {
                    continue;
                }
                match station.mode {
                    StationMode::Off => continue,
                    StationMode::Deaf => {
                        acknowledged = true;
                    }
                    StationMode::Listening => {
                        acknowledged = true;
                        if let Err(TrySendError::Full(_)) = station.event_sender.try_send(RtbEvent::FrameReceived(frame.clone())) {
                            log!(Level::Warn, "[{:016X}] Event queue full, dropping frame", station.ieee_address);
                        }
                    }
                }
            }
            acknowledged
        })
    }
}

/// Transmit power a station starts with
pub const DEFAULT_TRANSMIT_POWER: u8 = 0x40;

/// Link layer of one station on a [`LoopbackMedium`]
pub struct LoopbackLink {
    medium: LoopbackMedium,
    pan_id: u16,
    short_address: u16,
    ieee_address: u64,
    event_sender: RtbEventSender,
    transmit_power: u8,
    max_transmit_power: u8,
    busy: bool,
    refuse_transmit: Option<LinkError>,
    reset_count: usize,
    sent_commands: Vec<RtbCommand>,
}

impl LoopbackLink {
    /// Makes every following `transmit` fail with `error`; `None` restores transmission
    pub fn refuse_transmit(&mut self, error: Option<LinkError>) {
        self.refuse_transmit = error;
    }

    /// Highest transmit power the simulated transceiver supports
    pub fn set_max_transmit_power(&mut self, power: u8) {
        self.max_transmit_power = power;
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn reset_count(&self) -> usize {
        self.reset_count
    }

    /// Ranging commands handed to the medium, in order
    pub fn sent_commands(&self) -> &[RtbCommand] {
        &self.sent_commands
    }
}

impl LinkLayer for LoopbackLink {
    fn transmit(&mut self, frame: &RadioFrame, _csma: CsmaMode, ack_request: bool) -> Result<(), LinkError> {
        if let Some(error) = self.refuse_transmit {
            return Err(error);
        }
        let (header, rtb_frame) = RtbFrame::decode(frame).map_err(|_| LinkError::NoBuffer)?;
        self.sent_commands.push(rtb_frame.command());

        let acknowledged = self.medium.deliver(frame, &header.destination, self.ieee_address);
        let status = if ack_request && !acknowledged {
            TxStatus::NoAck
        } else {
            TxStatus::Success
        };
        log::trace!("[{:016X}] {} transmitted: {:?}", self.ieee_address, rtb_frame.command().name(), status);
        if self.event_sender.try_send(RtbEvent::TransmitDone(status)).is_err() {
            log!(Level::Warn, "[{:016X}] Event queue full, dropping transmit done", self.ieee_address);
        }
        Ok(())
    }

    fn pan_id(&self) -> u16 {
        self.pan_id
    }

    fn short_address(&self) -> u16 {
        self.short_address
    }

    fn ieee_address(&self) -> u64 {
        self.ieee_address
    }

    fn transmit_power(&self) -> u8 {
        self.transmit_power
    }

    fn set_transmit_power(&mut self, power: u8) {
        self.transmit_power = power;
    }

    fn limit_transmit_power(&self, power: u8) -> u8 {
        power.min(self.max_transmit_power)
    }

    fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    fn reset(&mut self) {
        self.reset_count += 1;
        self.busy = false;
        self.transmit_power = DEFAULT_TRANSMIT_POWER;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::MacHeader;
    use crate::{RtbEventQueue, RtbEventReceiver};
    use embassy_sync::channel::Channel;

    const PAN: u16 = 0x1234;

    fn queue() -> (RtbEventSender, RtbEventReceiver) {
        let queue: &'static RtbEventQueue = Box::leak(Box::new(Channel::new()));
        (queue.sender(), queue.receiver())
    }

    fn pmu_start(src: AddrSpec, dst: AddrSpec, ack_request: bool) -> RadioFrame {
        let header = MacHeader {
            sequence_number: 1,
            ack_request,
            destination: dst,
            source: src,
        };
        RtbFrame::PmuStart.encode(&header).unwrap()
    }

    #[test]
    fn frame_reaches_only_the_addressed_station() {
        let medium = LoopbackMedium::new();
        let (tx_a, rx_a) = queue();
        let (tx_b, rx_b) = queue();
        let (tx_c, rx_c) = queue();
        let mut a = medium.attach(PAN, 1, 0xA, tx_a);
        let _b = medium.attach(PAN, 2, 0xB, tx_b);
        let _c = medium.attach(PAN, 3, 0xC, tx_c);

        let frame = pmu_start(AddrSpec::short_with(PAN, 1), AddrSpec::long_with(PAN, 0xB), true);
        a.transmit(&frame, CsmaMode::NoCsma, true).unwrap();

        match rx_b.try_receive() {
            Ok(RtbEvent::FrameReceived(received)) => assert_eq!(received.mpdu(), frame.mpdu()),
            other => panic!("Expected FrameReceived, got: {:?}", other.map(|e| core::mem::discriminant(&e))),
        }
        assert!(rx_c.try_receive().is_err());
        match rx_a.try_receive() {
            Ok(RtbEvent::TransmitDone(TxStatus::Success)) => {}
            other => panic!("Expected TransmitDone, got: {:?}", other.map(|e| core::mem::discriminant(&e))),
        }
        assert_eq!(a.sent_commands(), &[RtbCommand::PmuStart]);
    }

    #[test]
    fn station_off_is_not_acknowledged() {
        let medium = LoopbackMedium::new();
        let (tx_a, rx_a) = queue();
        let (tx_b, rx_b) = queue();
        let mut a = medium.attach(PAN, 1, 0xA, tx_a);
        let _b = medium.attach(PAN, 2, 0xB, tx_b);
        medium.set_mode(0xB, StationMode::Off);

        let frame = pmu_start(AddrSpec::short_with(PAN, 1), AddrSpec::short_with(PAN, 2), true);
        a.transmit(&frame, CsmaMode::Unslotted, true).unwrap();
        assert!(rx_b.try_receive().is_err());
        assert!(matches!(rx_a.try_receive(), Ok(RtbEvent::TransmitDone(TxStatus::NoAck))));

        // without ack request the loss goes unnoticed
        a.transmit(&frame, CsmaMode::NoCsma, false).unwrap();
        assert!(matches!(rx_a.try_receive(), Ok(RtbEvent::TransmitDone(TxStatus::Success))));
    }

    #[test]
    fn deaf_station_acknowledges_but_drops() {
        let medium = LoopbackMedium::new();
        let (tx_a, rx_a) = queue();
        let (tx_b, rx_b) = queue();
        let mut a = medium.attach(PAN, 1, 0xA, tx_a);
        let _b = medium.attach(PAN, 2, 0xB, tx_b);
        medium.set_mode(0xB, StationMode::Deaf);

        let frame = pmu_start(AddrSpec::short_with(PAN, 1), AddrSpec::short_with(PAN, 2), true);
        a.transmit(&frame, CsmaMode::Unslotted, true).unwrap();
        assert!(rx_b.try_receive().is_err());
        assert!(matches!(rx_a.try_receive(), Ok(RtbEvent::TransmitDone(TxStatus::Success))));
    }

    #[test]
    fn refused_transmission_posts_nothing() {
        let medium = LoopbackMedium::new();
        let (tx_a, rx_a) = queue();
        let mut a = medium.attach(PAN, 1, 0xA, tx_a);
        a.refuse_transmit(Some(LinkError::Busy));

        let frame = pmu_start(AddrSpec::short_with(PAN, 1), AddrSpec::short_with(PAN, 2), true);
        assert_eq!(a.transmit(&frame, CsmaMode::Unslotted, true), Err(LinkError::Busy));
        assert!(rx_a.try_receive().is_err());
        assert!(a.sent_commands().is_empty());
    }

    #[test]
    fn power_is_limited_and_reset() {
        let medium = LoopbackMedium::new();
        let (tx_a, _rx_a) = queue();
        let mut a = medium.attach(PAN, 1, 0xA, tx_a);
        a.set_max_transmit_power(0x80);
        assert_eq!(a.limit_transmit_power(0xAF), 0x80);
        a.set_transmit_power(0x80);
        a.set_busy(true);
        a.reset();
        assert_eq!(a.transmit_power(), DEFAULT_TRANSMIT_POWER);
        assert!(!a.is_busy());
        assert_eq!(a.reset_count(), 1);
    }
}
