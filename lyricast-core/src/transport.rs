//! Audio transport seam.

use crate::error::Result;
use std::time::Duration;

/// The host environment's audio playback device.
///
/// The session core never decodes or renders audio; it issues transport
/// commands and reads transport state through this trait. Implementations
/// should:
///
/// - Return from [`AudioTransport::load`] only once metadata is ready and
///   [`AudioTransport::duration`] is known
/// - Release the decoded handle synchronously in [`AudioTransport::release`]
///   (leaked handles cause audible overlap when content is replaced)
/// - Report live position in [`AudioTransport::position`]; the sampling loop
///   re-reads it every tick instead of predicting
pub trait AudioTransport: Send + Sync {
    /// Load an audio source, replacing any current one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransportFault`](crate::CoreError::TransportFault)
    /// if the device cannot decode the payload.
    fn load(&mut self, bytes: &[u8], mime_type: &str) -> Result<()>;

    /// Start or resume playback.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransportFault`](crate::CoreError::TransportFault)
    /// if the device fails to start.
    fn play(&mut self) -> Result<()>;

    /// Pause playback, keeping the current position.
    fn pause(&mut self);

    /// Jump to a position. Callers clamp to `[0, duration]` first.
    fn seek(&mut self, position: Duration);

    /// Set the device volume. Callers clamp to `[0, 1]` first.
    fn set_volume(&mut self, volume: f64);

    /// Current playback position.
    fn position(&self) -> Duration;

    /// Duration of the loaded source, or zero if none.
    fn duration(&self) -> Duration;

    /// Whether the device is currently paused (or has nothing loaded).
    fn is_paused(&self) -> bool;

    /// Stop playback and free the loaded source synchronously.
    fn release(&mut self);
}
