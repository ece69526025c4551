//! Inbound media, keyed by participant

use super::TrackKind;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

/// One track received from a remote participant
#[derive(Clone)]
pub struct RemoteTrack {
    pub track_id: String,
    pub stream_id: String,
    pub kind: TrackKind,
    handle: Option<Arc<TrackRemote>>,
}

impl std::fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("track_id", &self.track_id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl RemoteTrack {
    /// Track without a transport handle (synthetic or already detached)
    pub fn new(track_id: impl Into<String>, stream_id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            track_id: track_id.into(),
            stream_id: stream_id.into(),
            kind,
            handle: None,
        }
    }

    /// Wrap a track from `on_track`; `None` for codec types we do not render
    pub fn from_webrtc(track: Arc<TrackRemote>) -> Option<Self> {
        let kind = match track.kind() {
            RTPCodecType::Audio => TrackKind::Audio,
            RTPCodecType::Video => TrackKind::Video,
            _ => return None,
        };
        Some(Self {
            track_id: track.id(),
            stream_id: track.stream_id(),
            kind,
            handle: Some(track),
        })
    }

    /// RTP source for the renderer to read from
    pub fn handle(&self) -> Option<&Arc<TrackRemote>> {
        self.handle.as_ref()
    }
}

/// Everything received from one participant
#[derive(Debug, Clone)]
pub struct RemoteStream {
    pub participant_id: String,
    pub tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    pub fn track(&self, kind: TrackKind) -> Option<&RemoteTrack> {
        self.tracks.iter().find(|t| t.kind == kind)
    }

    pub fn has(&self, kind: TrackKind) -> bool {
        self.track(kind).is_some()
    }
}

/// Owned registry of remote streams
///
/// Entries live exactly as long as the participant's peer connection: the
/// peer manager inserts on `on_track` and removes on disconnect.
#[derive(Debug, Clone, Default)]
pub struct MediaSinkRegistry {
    streams: Arc<RwLock<HashMap<String, RemoteStream>>>,
}

impl MediaSinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `track` for `participant_id`, replacing a track with the same id
    pub fn attach(&self, participant_id: &str, track: RemoteTrack) {
        debug!(participant = %participant_id, track = %track.track_id, kind = %track.kind, "Remote track available");
        let mut streams = self.streams.write();
        let stream = streams
            .entry(participant_id.to_string())
            .or_insert_with(|| RemoteStream {
                participant_id: participant_id.to_string(),
                tracks: Vec::new(),
            });
        match stream.tracks.iter_mut().find(|t| t.track_id == track.track_id) {
            Some(existing) => *existing = track,
            None => stream.tracks.push(track),
        }
    }

    pub fn remove(&self, participant_id: &str) -> Option<RemoteStream> {
        self.streams.write().remove(participant_id)
    }

    pub fn get(&self, participant_id: &str) -> Option<RemoteStream> {
        self.streams.read().get(participant_id).cloned()
    }

    /// All streams, ordered by participant id
    pub fn snapshot(&self) -> Vec<RemoteStream> {
        let mut streams: Vec<_> = self.streams.read().values().cloned().collect();
        streams.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        streams
    }

    pub fn len(&self) -> usize {
        self.streams.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.read().is_empty()
    }

    pub fn clear(&self) {
        self.streams.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_groups_by_participant() {
        let sinks = MediaSinkRegistry::new();
        sinks.attach("bob", RemoteTrack::new("a1", "s", TrackKind::Audio));
        sinks.attach("bob", RemoteTrack::new("v1", "s", TrackKind::Video));
        sinks.attach("carol", RemoteTrack::new("a2", "s", TrackKind::Audio));

        let bob = sinks.get("bob").unwrap();
        assert!(bob.has(TrackKind::Audio));
        assert!(bob.has(TrackKind::Video));
        assert_eq!(sinks.len(), 2);

        let ids: Vec<_> = sinks.snapshot().into_iter().map(|s| s.participant_id).collect();
        assert_eq!(ids, vec!["bob", "carol"]);
    }

    #[test]
    fn test_reattach_same_track_replaces() {
        let sinks = MediaSinkRegistry::new();
        sinks.attach("bob", RemoteTrack::new("a1", "s1", TrackKind::Audio));
        sinks.attach("bob", RemoteTrack::new("a1", "s2", TrackKind::Audio));

        let bob = sinks.get("bob").unwrap();
        assert_eq!(bob.tracks.len(), 1);
        assert_eq!(bob.tracks[0].stream_id, "s2");
    }

    #[test]
    fn test_remove_drops_stream() {
        let sinks = MediaSinkRegistry::new();
        sinks.attach("bob", RemoteTrack::new("a1", "s", TrackKind::Audio));
        assert!(sinks.remove("bob").is_some());
        assert!(sinks.remove("bob").is_none());
        assert!(sinks.is_empty());
    }
}
