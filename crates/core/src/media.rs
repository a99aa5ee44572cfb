//! Local media controller
//!
//! Owns the single local capture source and its per-kind enabled flags.
//! Capture itself is delegated to a [`MediaDevices`] backend; the transport
//! engine reads the shared `enabled` flag of each [`LocalTrack`] when it
//! forwards samples.

use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Capture constraints (video ideal 640x360, audio enabled)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    /// Capture video
    pub video: bool,
    /// Ideal video width in pixels
    pub video_width: u32,
    /// Ideal video height in pixels
    pub video_height: u32,
    /// Capture audio
    pub audio: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: true,
            video_width: 640,
            video_height: 360,
            audio: true,
        }
    }
}

/// One local outbound track
///
/// Clones share the enabled flag, so a toggle is visible to every transport
/// the track was attached to.
#[derive(Debug, Clone)]
pub struct LocalTrack {
    pub id: String,
    pub kind: MediaKind,
    pub stream_id: String,
    enabled: Arc<AtomicBool>,
}

impl LocalTrack {
    pub fn new(id: impl Into<String>, kind: MediaKind, stream_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            stream_id: stream_id.into(),
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}

/// An active local capture source
#[derive(Debug, Clone)]
pub struct LocalMediaSource {
    pub stream_id: String,
    pub tracks: Vec<LocalTrack>,
}

impl LocalMediaSource {
    /// Tracks of one kind
    pub fn tracks_of(&self, kind: MediaKind) -> impl Iterator<Item = &LocalTrack> {
        self.tracks.iter().filter(move |t| t.kind == kind)
    }
}

/// Read-only view of local media for the snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalMediaState {
    pub active: bool,
    pub stream_id: Option<String>,
    pub video_enabled: bool,
    pub audio_enabled: bool,
}

/// Capture backend
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open a capture source honoring the constraints
    ///
    /// Fails with [`Error::MediaUnavailable`] when permission is denied or no
    /// device exists.
    async fn open(&self, constraints: &MediaConstraints) -> Result<LocalMediaSource>;
}

/// Backend for hosts without capture devices
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMediaDevices;

#[async_trait]
impl MediaDevices for NoMediaDevices {
    async fn open(&self, _constraints: &MediaConstraints) -> Result<LocalMediaSource> {
        Err(Error::MediaUnavailable("no capture device".to_string()))
    }
}

/// Owner of the process-wide local media source
pub struct LocalMediaController {
    devices: Arc<dyn MediaDevices>,
    constraints: MediaConstraints,
    source: RwLock<Option<LocalMediaSource>>,
}

impl LocalMediaController {
    pub fn new(devices: Arc<dyn MediaDevices>, constraints: MediaConstraints) -> Self {
        Self {
            devices,
            constraints,
            source: RwLock::new(None),
        }
    }

    /// Open local capture, or return the source that is already active
    pub async fn activate(&self) -> Result<LocalMediaSource> {
        if let Some(source) = self.source.read().clone() {
            return Ok(source);
        }

        let opened = match self.devices.open(&self.constraints).await {
            Ok(source) => source,
            Err(e) => {
                warn!("Local media unavailable: {}", e);
                return Err(match e {
                    Error::MediaUnavailable(_) => e,
                    other => Error::MediaUnavailable(other.to_string()),
                });
            }
        };

        // A concurrent activate may have won the race while we were opening
        let mut slot = self.source.write();
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.clone());
        }
        info!(
            stream_id = %opened.stream_id,
            tracks = opened.tracks.len(),
            "Local media activated"
        );
        *slot = Some(opened.clone());
        Ok(opened)
    }

    /// Current source, if any
    pub fn source(&self) -> Option<LocalMediaSource> {
        self.source.read().clone()
    }

    pub fn is_active(&self) -> bool {
        self.source.read().is_some()
    }

    /// Flip video tracks; returns the new flag (false with no source)
    pub fn toggle_video(&self) -> bool {
        self.toggle(MediaKind::Video)
    }

    /// Flip audio tracks; returns the new flag (false with no source)
    pub fn toggle_audio(&self) -> bool {
        self.toggle(MediaKind::Audio)
    }

    fn toggle(&self, kind: MediaKind) -> bool {
        let guard = self.source.read();
        let Some(source) = guard.as_ref() else {
            debug!(%kind, "Toggle ignored, no local media");
            return false;
        };

        let mut tracks = source.tracks_of(kind).peekable();
        let Some(first) = tracks.peek() else {
            return false;
        };
        let enabled = !first.is_enabled();
        for track in tracks {
            track.set_enabled(enabled);
        }
        debug!(%kind, enabled, "Toggled local tracks");
        enabled
    }

    fn kind_enabled(source: &LocalMediaSource, kind: MediaKind) -> bool {
        source.tracks_of(kind).any(|t| t.is_enabled())
    }

    pub fn state(&self) -> LocalMediaState {
        match self.source.read().as_ref() {
            Some(source) => LocalMediaState {
                active: true,
                stream_id: Some(source.stream_id.clone()),
                video_enabled: Self::kind_enabled(source, MediaKind::Video),
                audio_enabled: Self::kind_enabled(source, MediaKind::Audio),
            },
            None => LocalMediaState::default(),
        }
    }

    /// Drop the source (shutdown)
    pub fn deactivate(&self) {
        if self.source.write().take().is_some() {
            info!("Local media deactivated");
        }
    }
}
