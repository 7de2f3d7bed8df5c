use crate::media::{MediaStream, MediaTrack, RemoteTrack, TrackKind};
use crate::peer::{
    NativeConnectionState, NativeEvent, NativeEventSink, NativePeerConnection,
    PeerConnectionFactory, SdpKind, SessionDescription,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vitrine_core::{IceCandidate, IceServerConfig};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

/// Creates [`WebRtcConnection`]s backed by webrtc-rs.
#[derive(Debug, Default, Clone)]
pub struct WebRtcPeerFactory {
    loopback_candidates: bool,
}

impl WebRtcPeerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also gathers host candidates on loopback interfaces, so peers on one
    /// machine without any other network can still connect.
    pub fn with_loopback_candidates(mut self, enabled: bool) -> Self {
        self.loopback_candidates = enabled;
        self
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        ice_servers: &[IceServerConfig],
        events: NativeEventSink,
    ) -> Result<Box<dyn NativePeerConnection>> {
        let mut settings = SettingEngine::default();
        settings.set_include_loopback_candidate(self.loopback_candidates);
        Ok(Box::new(WebRtcConnection::new(ice_servers, settings, events).await?))
    }
}

fn to_rtc_ice_servers(servers: &[IceServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|s| RTCIceServer {
            urls: s.urls.clone(),
            username: s.username.clone().unwrap_or_default(),
            credential: s.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn map_state(state: RTCPeerConnectionState) -> Option<NativeConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(NativeConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(NativeConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(NativeConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(NativeConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(NativeConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(NativeConnectionState::Closed),
        _ => None,
    }
}

fn remote_track(track: &TrackRemote) -> Option<RemoteTrack> {
    let kind = match track.kind() {
        RTPCodecType::Audio => TrackKind::Audio,
        RTPCodecType::Video => TrackKind::Video,
        _ => return None,
    };
    Some(RemoteTrack {
        stream_id: track.stream_id(),
        track_id: track.id(),
        kind,
    })
}

/// Opus TOC byte for a 20ms CELT frame followed by an empty payload.
const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];
/// VP8 key frame header for a 2x2 picture.
const VP8_FILLER: [u8; 10] = [0x10, 0x02, 0x00, 0x9d, 0x01, 0x2a, 0x02, 0x00, 0x02, 0x00];

/// Payload and pacing of the synthetic frames written for a local track.
fn filler(kind: TrackKind) -> (Bytes, Duration) {
    match kind {
        TrackKind::Audio => (
            Bytes::from_static(&OPUS_SILENCE),
            Duration::from_millis(20),
        ),
        TrackKind::Video => (
            Bytes::from_static(&VP8_FILLER),
            Duration::from_millis(100),
        ),
    }
}

/// Feeds `local` with filler frames until the capture track is stopped.
fn spawn_sample_pump(track: MediaTrack, local: Arc<TrackLocalStaticSample>) -> JoinHandle<()> {
    let (data, duration) = filler(track.kind());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(duration);
        while track.is_live() {
            ticker.tick().await;
            let sample = Sample {
                data: data.clone(),
                duration,
                ..Default::default()
            };
            if let Err(e) = local.write_sample(&sample).await {
                warn!("Failed to write {} sample: {}", track.kind(), e);
                break;
            }
        }
        debug!("Sample pump for track {} ended", track.id());
    })
}

pub struct WebRtcConnection {
    peer_connection: Arc<RTCPeerConnection>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl WebRtcConnection {
    pub async fn new(
        ice_servers: &[IceServerConfig],
        settings: SettingEngine,
        events: NativeEventSink,
    ) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_setting_engine(settings)
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: to_rtc_ice_servers(ice_servers),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await?);
        let tag = events.tag().clone();

        let state_events = events.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let events = state_events.clone();
                Box::pin(async move {
                    info!(
                        "Peer Connection State changed for {} ({}): {}",
                        events.tag().peer_id,
                        events.tag().role,
                        s
                    );
                    if let Some(state) = map_state(s) {
                        events.emit(NativeEvent::StateChange(state));
                    }
                })
            },
        ));

        let ice_events = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let events = ice_events.clone();
            Box::pin(async move {
                let Some(candidate) = c else { return };
                let Ok(init) = candidate.to_json() else {
                    return;
                };
                events.emit(NativeEvent::IceCandidate(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_m_line_index: init.sdp_mline_index,
                    username_fragment: init.username_fragment,
                }));
            })
        }));

        let track_events = events;
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = track_events.clone();
            Box::pin(async move {
                let Some(remote) = remote_track(&track) else {
                    return;
                };
                debug!(
                    "Remote {} track {} from {}",
                    remote.kind,
                    remote.track_id,
                    events.tag().peer_id
                );
                events.emit(NativeEvent::Track(remote));
            })
        }));

        debug!("Created webrtc connection for {} ({})", tag.peer_id, tag.role);

        Ok(Self {
            peer_connection,
            pumps: Mutex::new(Vec::new()),
        })
    }

    fn pumps(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        match self.pumps.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn stop_pumps(&self) {
        for pump in self.pumps().drain(..) {
            pump.abort();
        }
    }
}

impl Drop for WebRtcConnection {
    fn drop(&mut self) {
        self.stop_pumps();
    }
}

#[async_trait]
impl NativePeerConnection for WebRtcConnection {
    async fn add_local_stream(&self, stream: &MediaStream) -> Result<()> {
        for track in stream.tracks() {
            let mime_type = match track.kind() {
                TrackKind::Video => MIME_TYPE_VP8,
                TrackKind::Audio => MIME_TYPE_OPUS,
            };
            let local = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: mime_type.to_owned(),
                    ..Default::default()
                },
                track.id().to_owned(),
                stream.id().to_owned(),
            ));
            self.peer_connection
                .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .with_context(|| format!("Failed to add {} track", track.kind()))?;
            let pump = spawn_sample_pump(track.clone(), local);
            self.pumps().push(pump);
        }
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<String> {
        let options = ice_restart.then(|| RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        });
        let offer = self.peer_connection.create_offer(options).await?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await?;
        Ok(offer.sdp)
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self.peer_connection.create_answer(None).await?;
        self.peer_connection
            .set_local_description(answer.clone())
            .await?;
        Ok(answer.sdp)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let desc = match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp)?,
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp)?,
        };
        self.peer_connection.set_remote_description(desc).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .context("Failed to add ICE candidate")?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.stop_pumps();
        if let Err(e) = self.peer_connection.close().await {
            warn!("Closing webrtc connection failed: {}", e);
            return Err(e.into());
        }
        Ok(())
    }
}
