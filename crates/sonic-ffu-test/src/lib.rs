//! Integration test infrastructure for the FFU slice engine
//!
//! Provides:
//! - A register backend that records calls and injects faults
//! - A lookup model evaluating the register file as the TCAM would
//! - Test fixtures for switches, slice chains and rules
//! - Test log capture

pub mod fixtures;
pub mod logging;
pub mod model;
pub mod recording;

pub use fixtures::*;
pub use logging::init_test_logging;
pub use model::{lookup, Hit, TcamRow};
pub use recording::{RegisterCall, RecordingRegisters};
