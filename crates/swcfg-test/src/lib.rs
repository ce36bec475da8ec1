//! Integration test infrastructure for the switch configuration datastore
//!
//! Provides:
//! - A recording dataplane with fault injection
//! - An engine fixture wired to it
//! - Command script fixtures for the managed kinds
//! - Reply and dataplane call verification helpers

mod dataplane;
pub mod fixtures;
mod verification;

pub use dataplane::RecordingDataplane;
pub use fixtures::*;
pub use verification::*;
