//! # Timing Supervisor
//!
//! One await timer per protocol phase plus the Coordinator's remote watch.
//!
//! Deadlines are plain [`Instant`]s checked by the engine's task step, so no
//! timer callback ever runs concurrently with the state machine. Arming always
//! replaces the previous deadline and records the phase it belongs to; expiry
//! hands back that phase exactly once.

use embassy_time::{Duration, Instant};

use crate::frames::AddrSpec;
use crate::session::RangingState;

/// Remote ranging the Coordinator is still waiting for
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RemoteWatch {
    pub initiator: AddrSpec,
    pub reflector: AddrSpec,
    deadline: Instant,
}

pub struct TimingSupervisor {
    await_timeout: Duration,
    remote_timeout: Duration,
    armed: Option<(RangingState, Instant)>,
    remote_watch: Option<RemoteWatch>,
}

impl TimingSupervisor {
    pub fn with(await_timeout_us: u64, remote_timeout_us: u64) -> Self {
        Self {
            await_timeout: Duration::from_micros(await_timeout_us),
            remote_timeout: Duration::from_micros(remote_timeout_us),
            armed: None,
            remote_watch: None,
        }
    }

    /// Arms the phase timer for `phase`, replacing any armed timer
    pub fn arm(&mut self, phase: RangingState, now: Instant) {
        log::trace!("Await timer armed for {}", phase.name());
        self.armed = Some((phase, now + self.await_timeout));
    }

    /// Stops the phase timer; stopping a stopped timer is a no-op
    pub fn cancel(&mut self) {
        self.armed = None;
    }

    /// Phase the timer is currently armed for
    pub fn armed_phase(&self) -> Option<RangingState> {
        self.armed.map(|(phase, _)| phase)
    }

    /// Takes an expired phase timer
    ///
    /// # Returns
    /// The phase the timer was armed for, once, if its deadline passed
    pub fn take_expired(&mut self, now: Instant) -> Option<RangingState> {
        match self.armed {
            Some((phase, deadline)) if now >= deadline => {
                self.armed = None;
                Some(phase)
            }
            _ => None,
        }
    }

    /// Starts watching for the Remote-Range-Confirm of a remote ranging
    pub fn watch_remote(&mut self, initiator: AddrSpec, reflector: AddrSpec, now: Instant) {
        self.remote_watch = Some(RemoteWatch {
            initiator,
            reflector,
            deadline: now + self.remote_timeout,
        });
    }

    pub fn remote_watch(&self) -> Option<&RemoteWatch> {
        self.remote_watch.as_ref()
    }

    pub fn cancel_remote_watch(&mut self) -> Option<RemoteWatch> {
        self.remote_watch.take()
    }

    /// Takes the remote watch if it ran out
    pub fn take_expired_remote(&mut self, now: Instant) -> Option<RemoteWatch> {
        match self.remote_watch {
            Some(watch) if now >= watch.deadline => self.remote_watch.take(),
            _ => None,
        }
    }

    /// Earliest pending deadline, used to sleep in the async service loop
    pub fn next_deadline(&self) -> Option<Instant> {
        let phase = self.armed.map(|(_, deadline)| deadline);
        let remote = self.remote_watch.map(|watch| watch.deadline);
        match (phase, remote) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn timer_expires_once_for_armed_phase() {
        let mut timing = TimingSupervisor::with(1_000, 5_000);
        let start = Instant::from_millis(10);
        timing.arm(RangingState::AwaitRangeAccept, start);

        assert_eq!(timing.take_expired(start + Duration::from_micros(999)), None);
        assert_eq!(timing.take_expired(start + Duration::from_millis(1)), Some(RangingState::AwaitRangeAccept));
        assert_eq!(timing.take_expired(start + Duration::from_millis(2)), None);
    }

    #[test]
    fn rearming_replaces_previous_phase() {
        let mut timing = TimingSupervisor::with(1_000, 5_000);
        let start = Instant::from_millis(0);
        timing.arm(RangingState::AwaitTimeSyncReq, start);
        timing.arm(RangingState::InitPmuStart, start + Duration::from_micros(500));

        assert_eq!(timing.armed_phase(), Some(RangingState::InitPmuStart));
        assert_eq!(timing.take_expired(start + Duration::from_millis(1)), None);
        assert_eq!(timing.take_expired(start + Duration::from_micros(1_500)), Some(RangingState::InitPmuStart));
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut timing = TimingSupervisor::with(1_000, 5_000);
        timing.arm(RangingState::AwaitResultReq, Instant::from_millis(0));
        timing.cancel();
        timing.cancel();
        assert_eq!(timing.armed_phase(), None);
        assert_eq!(timing.take_expired(Instant::from_millis(100)), None);
    }

    #[test]
    fn remote_watch_and_phase_timer_are_independent() {
        let mut timing = TimingSupervisor::with(1_000, 5_000);
        let start = Instant::from_millis(0);
        let initiator = AddrSpec::short_with(1, 2);
        let reflector = AddrSpec::short_with(1, 3);
        timing.watch_remote(initiator, reflector, start);
        timing.arm(RangingState::AwaitRangeAccept, start);

        assert_eq!(timing.next_deadline(), Some(start + Duration::from_millis(1)));
        timing.cancel();
        assert_eq!(timing.next_deadline(), Some(start + Duration::from_millis(5)));
        assert!(timing.take_expired_remote(start + Duration::from_millis(4)).is_none());

        let watch = timing.take_expired_remote(start + Duration::from_millis(5)).unwrap();
        assert_eq!(watch.reflector, reflector);
        assert!(timing.remote_watch().is_none());
    }
}
