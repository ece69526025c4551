//! Call test harness
//!
//! Runs several call participants in one process:
//! - one shared in-memory presence hub per test
//! - a [`FakeCapture`] per participant (permission denial, speaking)
//! - a [`FakePeerFactory`] per participant recording every connection
//!
//! Basic usage pattern:
//!
//! 1. Create a `CallHarness`
//! 2. Add participants with `harness.participant("alice")`
//! 3. Drive `join_call` / `toggle_*` / `leave_call`
//! 4. Use `wait_until` for the asynchronous mesh to settle

#![allow(dead_code)]

pub mod capture;
pub mod peers;

use std::sync::Arc;
use std::time::Duration;
use watchparty_core::{InMemoryPresenceHub, PartyId, UserId};
use watchparty_webrtc::{CallConfig, CallCoordinator};

pub use capture::FakeCapture;
pub use peers::{FakePeer, FakePeerFactory};

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `condition` until it holds; panics with `what` after a timeout
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Let in-flight signaling drain
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// One in-process participant
pub struct TestParticipant {
    pub id: String,
    pub call: CallCoordinator,
    pub capture: Arc<FakeCapture>,
    pub peers: Arc<FakePeerFactory>,
}

pub struct CallHarness {
    pub hub: Arc<InMemoryPresenceHub>,
    pub party_id: PartyId,
    pub config: CallConfig,
}

impl CallHarness {
    pub fn new() -> Self {
        Self {
            hub: Arc::new(InMemoryPresenceHub::new()),
            party_id: PartyId::new("party-1"),
            config: CallConfig::default(),
        }
    }

    pub fn topic(&self) -> String {
        self.config.topic_for(self.party_id.as_str())
    }

    /// Ids currently subscribed to the call topic
    pub fn members(&self) -> Vec<String> {
        self.hub.members(&self.topic())
    }

    pub fn participant(&self, id: &str) -> TestParticipant {
        let capture = FakeCapture::new();
        let peers = FakePeerFactory::new(id);
        let call = CallCoordinator::new(
            self.party_id.clone(),
            UserId::new(id),
            id.to_uppercase(),
            self.config.clone(),
            self.hub.clone(),
            capture.clone(),
            peers.clone(),
        )
        .expect("valid call config");
        TestParticipant {
            id: id.to_string(),
            call,
            capture,
            peers,
        }
    }

    /// Participants that have joined (voice only) and fully meshed
    pub async fn meshed(&self, ids: &[&str]) -> Vec<TestParticipant> {
        let mut joined: Vec<TestParticipant> = Vec::new();
        for id in ids {
            let participant = self.participant(id);
            participant.call.join_call(false).await.expect("join");
            joined.push(participant);

            let expected = joined.len() - 1;
            for p in &joined {
                let call = p.call.clone();
                wait_until(&format!("{} to see {} streams", p.id, expected), || {
                    call.remote_streams().len() == expected
                })
                .await;
            }
        }
        joined
    }
}
