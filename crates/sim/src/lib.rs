//! b2kit-sim: In-memory transport for b2kit
//!
//! Implements `Transport` against process-local state so the listing and
//! upload engines can be exercised end to end without a network.

mod simulator;

pub use simulator::{RawSimulator, SimCounters};
