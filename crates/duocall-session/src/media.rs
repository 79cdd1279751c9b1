//! Local media capability boundary.
//!
//! The session never touches capture devices directly: it asks a
//! [`MediaDevices`] implementation for a handle and attaches the handle's
//! tracks to the peer adapter. Acquisition can fail (permission denied,
//! device unavailable) and that failure is user-facing.

use duocall_common::MediaError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// What a track carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// A single capture track within a media handle.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    pub id: Uuid,
    pub kind: TrackKind,
    pub label: String,
}

impl MediaTrack {
    pub fn audio(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: TrackKind::Audio,
            label: label.into(),
        }
    }

    pub fn video(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: TrackKind::Video,
            label: label.into(),
        }
    }
}

/// Which capture kinds to request.
#[derive(Debug, Clone, Copy)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// An opaque handle over zero or more capture tracks.
///
/// Clones share the underlying stop flag, so releasing any clone releases
/// them all — and release happens exactly once no matter how many clones
/// call [`stop`](Self::stop).
#[derive(Debug, Clone)]
pub struct MediaHandle {
    id: Uuid,
    tracks: Vec<MediaTrack>,
    stopped: Arc<AtomicBool>,
}

impl MediaHandle {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tracks,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    /// Release the underlying capture. Returns `true` if this call
    /// performed the release, `false` if it had already happened.
    pub fn stop(&self) -> bool {
        !self.stopped.swap(true, Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// The device-acquisition capability.
pub trait MediaDevices {
    fn acquire(
        &mut self,
        constraints: MediaConstraints,
    ) -> impl Future<Output = Result<MediaHandle, MediaError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_releases_exactly_once_across_clones() {
        let handle = MediaHandle::new(vec![MediaTrack::audio("mic")]);
        let clone = handle.clone();

        assert!(handle.stop());
        assert!(!clone.stop());
        assert!(clone.is_stopped());
    }
}
