use crate::config::VideoConstraints;
use crate::error::MediaAccessError;
use crate::media::{MediaStream, MediaTrack, TrackKind};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;
use uuid::Uuid;

/// What to request from the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: Option<VideoConstraints>,
    pub audio: bool,
}

impl MediaConstraints {
    pub fn camera_and_microphone(video: VideoConstraints) -> Self {
        Self {
            video: Some(video),
            audio: true,
        }
    }
}

/// Platform capture API.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStream, MediaAccessError>;
}

/// Software capture devices for headless hosts and tests.
#[derive(Debug)]
pub struct VirtualDevices {
    camera: AtomicBool,
    microphone: AtomicBool,
    permission_granted: AtomicBool,
    acquisitions: AtomicUsize,
}

impl Default for VirtualDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualDevices {
    pub fn new() -> Self {
        Self {
            camera: AtomicBool::new(true),
            microphone: AtomicBool::new(true),
            permission_granted: AtomicBool::new(true),
            acquisitions: AtomicUsize::new(0),
        }
    }

    pub fn with_camera(self, present: bool) -> Self {
        self.camera.store(present, Ordering::Release);
        self
    }

    pub fn with_microphone(self, present: bool) -> Self {
        self.microphone.store(present, Ordering::Release);
        self
    }

    pub fn set_permission(&self, granted: bool) {
        self.permission_granted.store(granted, Ordering::Release);
    }

    /// Number of streams handed out so far.
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::Acquire)
    }
}

#[async_trait]
impl MediaDevices for VirtualDevices {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStream, MediaAccessError> {
        if !self.permission_granted.load(Ordering::Acquire) {
            return Err(MediaAccessError::PermissionDenied);
        }

        let mut tracks = Vec::new();
        if let Some(video) = &constraints.video
            && self.camera.load(Ordering::Acquire)
        {
            tracks.push(MediaTrack::new(
                Uuid::new_v4().to_string(),
                TrackKind::Video,
                format!("virtual camera {}x{}", video.ideal_width, video.ideal_height),
            ));
        }
        if constraints.audio && self.microphone.load(Ordering::Acquire) {
            tracks.push(MediaTrack::new(
                Uuid::new_v4().to_string(),
                TrackKind::Audio,
                "virtual microphone",
            ));
        }

        if tracks.is_empty() {
            return Err(MediaAccessError::NoDevice);
        }

        self.acquisitions.fetch_add(1, Ordering::AcqRel);
        let stream = MediaStream::new(Uuid::new_v4().to_string(), tracks);
        debug!("Virtual devices produced stream {}", stream.id());
        Ok(stream)
    }
}
