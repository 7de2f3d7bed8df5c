use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

struct TrackInner {
    id: String,
    kind: TrackKind,
    label: String,
    enabled: AtomicBool,
    live: AtomicBool,
}

/// One local capture track. Clones share state.
///
/// A disabled track keeps flowing (as silence or black frames), so toggling
/// never requires renegotiation. A stopped track is dead for good.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                kind,
                label: label.into(),
                enabled: AtomicBool::new(true),
                live: AtomicBool::new(true),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::Acquire)
    }

    /// Returns `true` only for the call that actually stopped the track.
    pub fn stop(&self) -> bool {
        self.inner.live.swap(false, Ordering::AcqRel)
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}

/// Local camera + microphone stream.
#[derive(Clone)]
pub struct MediaStream {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                id: id.into(),
                tracks,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.inner.tracks
    }

    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.track_of(TrackKind::Video)
    }

    pub fn audio_track(&self) -> Option<&MediaTrack> {
        self.track_of(TrackKind::Audio)
    }

    fn track_of(&self, kind: TrackKind) -> Option<&MediaTrack> {
        self.inner.tracks.iter().find(|t| t.kind() == kind)
    }

    pub fn is_live(&self) -> bool {
        self.inner.tracks.iter().any(|t| t.is_live())
    }

    pub fn same_stream(&self, other: &MediaStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id())
            .field("tracks", &self.inner.tracks)
            .finish()
    }
}

impl PartialEq for MediaStream {
    fn eq(&self, other: &Self) -> bool {
        self.same_stream(other)
    }
}

/// Track announced by a remote peer.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct RemoteTrack {
    pub stream_id: String,
    pub track_id: String,
    pub kind: TrackKind,
}

/// Media received from one remote peer, grouped by the remote stream id.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RemoteStream {
    pub stream_id: String,
    pub tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    pub fn from_track(track: RemoteTrack) -> Self {
        Self {
            stream_id: track.stream_id.clone(),
            tracks: vec![track],
        }
    }

    /// Adds `track` if it belongs to this stream and is not known yet.
    pub fn merge(&mut self, track: RemoteTrack) -> bool {
        if track.stream_id != self.stream_id || self.tracks.contains(&track) {
            return false;
        }
        self.tracks.push(track);
        true
    }
}
