//! Mesh call over the party's presence topic

pub mod coordinator;

pub use coordinator::{CallCoordinator, CallParticipant};
