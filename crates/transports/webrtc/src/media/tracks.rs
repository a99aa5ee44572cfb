//! Sample-fed local tracks

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use peerlink_core::media::{
    LocalMediaSource, LocalTrack, MediaConstraints, MediaDevices, MediaKind,
};
use peerlink_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Codec each track kind is sent with
pub fn codec_for(kind: MediaKind) -> RTCRtpCodecCapability {
    match kind {
        MediaKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_string(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
            rtcp_feedback: vec![],
        },
        MediaKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_string(),
            clock_rate: 90000, // Standard 90kHz clock for video
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
    }
}

/// Engine tracks by local track id
///
/// Shared between the capture backend that creates tracks and the transport
/// factory that adds them to peer connections, so every session sends the
/// same samples.
#[derive(Default)]
pub struct TrackStore {
    tracks: RwLock<HashMap<String, Arc<TrackLocalStaticSample>>>,
}

impl TrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine track for `track`, created on first use
    pub fn get_or_create(&self, track: &LocalTrack) -> Arc<TrackLocalStaticSample> {
        if let Some(existing) = self.tracks.read().get(&track.id) {
            return existing.clone();
        }
        self.tracks
            .write()
            .entry(track.id.clone())
            .or_insert_with(|| {
                debug!(track_id = %track.id, kind = %track.kind, "Creating sample track");
                Arc::new(TrackLocalStaticSample::new(
                    codec_for(track.kind),
                    track.id.clone(),
                    track.stream_id.clone(),
                ))
            })
            .clone()
    }

    pub fn get(&self, track_id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        self.tracks.read().get(track_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tracks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.read().is_empty()
    }
}

/// Pushes encoded frames into one local track
#[derive(Clone)]
pub struct SampleWriter {
    track: LocalTrack,
    rtc_track: Arc<TrackLocalStaticSample>,
}

impl SampleWriter {
    pub fn track(&self) -> &LocalTrack {
        &self.track
    }

    /// Write one encoded frame lasting `duration`
    ///
    /// Returns `Ok(false)` without sending while the track is disabled.
    pub async fn write(&self, data: Bytes, duration: Duration) -> Result<bool> {
        if !self.track.is_enabled() {
            return Ok(false);
        }
        self.rtc_track
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to write sample: {}", e)))?;
        Ok(true)
    }
}

/// Capture backend producing sample-fed tracks
#[derive(Clone, Default)]
pub struct SampleMediaDevices {
    store: Arc<TrackStore>,
}

impl SampleMediaDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store to hand to [`crate::WebRtcTransportFactory`]
    pub fn tracks(&self) -> Arc<TrackStore> {
        self.store.clone()
    }

    /// Writer for a track returned by a previous `open`
    pub fn writer(&self, track: &LocalTrack) -> Option<SampleWriter> {
        self.store.get(&track.id).map(|rtc_track| SampleWriter {
            track: track.clone(),
            rtc_track,
        })
    }
}

#[async_trait]
impl MediaDevices for SampleMediaDevices {
    async fn open(&self, constraints: &MediaConstraints) -> Result<LocalMediaSource> {
        if !constraints.video && !constraints.audio {
            return Err(Error::MediaUnavailable(
                "constraints request neither audio nor video".to_string(),
            ));
        }

        let stream_id = format!("peerlink-{}", uuid::Uuid::new_v4());
        let mut tracks = Vec::new();
        if constraints.video {
            tracks.push(LocalTrack::new(
                format!("video-{}", uuid::Uuid::new_v4()),
                MediaKind::Video,
                stream_id.clone(),
            ));
        }
        if constraints.audio {
            tracks.push(LocalTrack::new(
                format!("audio-{}", uuid::Uuid::new_v4()),
                MediaKind::Audio,
                stream_id.clone(),
            ));
        }
        for track in &tracks {
            self.store.get_or_create(track);
        }

        info!(
            %stream_id,
            width = constraints.video_width,
            height = constraints.video_height,
            tracks = tracks.len(),
            "Opened sample media source"
        );
        Ok(LocalMediaSource { stream_id, tracks })
    }
}
