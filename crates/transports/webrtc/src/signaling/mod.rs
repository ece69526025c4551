//! Offer/answer/candidate relay over the call's presence topic

pub mod protocol;

pub use protocol::{IceCandidate, SignalEnvelope, SignalKind, SIGNAL_EVENT};
