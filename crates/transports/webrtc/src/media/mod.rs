//! Local media for the webrtc engine
//!
//! There is no camera or microphone capture here. [`SampleMediaDevices`]
//! hands out sample-fed tracks (Opus audio, VP8 video) and applications push
//! already-encoded frames into them through a [`SampleWriter`].

mod tracks;

pub use tracks::{codec_for, SampleMediaDevices, SampleWriter, TrackStore};
