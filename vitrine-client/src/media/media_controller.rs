use crate::config::VideoConstraints;
use crate::error::MediaAccessError;
use crate::media::{MediaConstraints, MediaDevices, MediaStream, TrackKind};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Local enablement flags, independent of any connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediaState {
    pub video_enabled: bool,
    pub audio_enabled: bool,
}

#[derive(Clone)]
pub struct MediaController {
    devices: Arc<dyn MediaDevices>,
    video: VideoConstraints,
}

impl MediaController {
    pub fn new(devices: Arc<dyn MediaDevices>, video: VideoConstraints) -> Self {
        Self { devices, video }
    }

    /// Requests camera and microphone. Failures are returned as-is; there is
    /// no silent retry.
    pub async fn acquire_local_stream(&self) -> Result<MediaStream, MediaAccessError> {
        let constraints = MediaConstraints::camera_and_microphone(self.video.clone());
        match self.devices.get_user_media(&constraints).await {
            Ok(stream) => {
                info!(
                    "Acquired local stream {} with {} track(s)",
                    stream.id(),
                    stream.tracks().len()
                );
                Ok(stream)
            }
            Err(e) => {
                warn!("Local media acquisition failed: {}", e);
                Err(e)
            }
        }
    }

    /// Returns the resulting state, `false` if the stream has no video track.
    pub fn set_video_enabled(&self, stream: &MediaStream, enabled: bool) -> bool {
        set_enabled(stream, TrackKind::Video, enabled)
    }

    pub fn set_audio_enabled(&self, stream: &MediaStream, enabled: bool) -> bool {
        set_enabled(stream, TrackKind::Audio, enabled)
    }

    /// Stops every track. Safe to call repeatedly.
    pub fn release_stream(&self, stream: &MediaStream) {
        let stopped = stream.tracks().iter().filter(|t| t.stop()).count();
        if stopped > 0 {
            info!("Released local stream {} ({} track(s))", stream.id(), stopped);
        }
    }

    pub fn media_state(&self, stream: &MediaStream) -> MediaState {
        MediaState {
            video_enabled: stream.video_track().is_some_and(|t| t.is_enabled()),
            audio_enabled: stream.audio_track().is_some_and(|t| t.is_enabled()),
        }
    }
}

fn set_enabled(stream: &MediaStream, kind: TrackKind, enabled: bool) -> bool {
    let Some(track) = stream.tracks().iter().find(|t| t.kind() == kind) else {
        debug!("Stream {} has no {} track", stream.id(), kind);
        return false;
    };
    track.set_enabled(enabled);
    track.is_enabled()
}
