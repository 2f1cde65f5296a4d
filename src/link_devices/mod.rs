//! Host-side link and PMU implementations
//!
//! Available with the `std` feature only:
//!
//! - `loopback`: In-process medium connecting several engines, with fault injection
//! - `simulated_pmu`: Deterministic phase measurement unit reporting a configured distance

pub mod loopback;
pub mod simulated_pmu;

pub use loopback::{LoopbackLink, LoopbackMedium, StationMode};
pub use simulated_pmu::SimulatedPmu;
