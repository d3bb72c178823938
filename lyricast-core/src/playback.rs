use std::time::Duration;

/// Authoritative playback state for one session.
///
/// One instance lives on the authority peer; follower peers hold advisory
/// replicas reconciled opportunistically from inbound sync messages.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    /// Whether audio is currently playing.
    pub is_playing: bool,
    /// Current playback position.
    pub position: Duration,
    /// Volume in `[0.0, 1.0]`.
    pub volume: f64,
    /// Opaque identifier of the loaded audio source (e.g. filename).
    pub source_id: Option<String>,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_playing: false,
            position: Duration::ZERO,
            volume: 1.0,
            source_id: None,
        }
    }
}

impl PlaybackState {
    /// Whether any audio source is loaded.
    #[must_use]
    pub const fn has_audio(&self) -> bool {
        self.source_id.is_some()
    }
}

/// Lifecycle phase of a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No audio loaded.
    #[default]
    Idle,
    /// Audio loaded, not playing.
    Paused,
    /// Audio loaded and playing; the sampling loop is running.
    Playing,
}

impl SessionPhase {
    /// Whether audio is loaded (paused or playing).
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    #[must_use]
    pub const fn is_playing(&self) -> bool {
        matches!(self, Self::Playing)
    }
}

/// Clamp a wire or user-supplied volume into `[0.0, 1.0]`.
///
/// Non-finite input clamps to full volume rather than propagating NaN into
/// the transport.
#[must_use]
pub fn clamp_volume(volume: f64) -> f64 {
    if volume.is_nan() {
        return 1.0;
    }
    volume.clamp(0.0, 1.0)
}
