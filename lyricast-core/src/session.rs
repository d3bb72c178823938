//! A playback session: the authoritative state machine on the host peer,
//! the reconciling replica on everyone else.

use crate::channel::{AuthorityCheck, BroadcastChannel, Broadcaster};
use crate::config::SessionConfig;
use crate::error::{CoreError, Result};
use crate::lrc::LyricsDocument;
use crate::playback::{clamp_volume, PlaybackState, SessionPhase};
use crate::protocol::SyncMessage;
use crate::settings::{SettingsStore, SETTING_LAST_AUDIO, SETTING_LAST_LYRICS, SETTING_VOLUME};
use crate::time::{abs_diff, duration_from_secs_lossy, DurationExt};
use crate::tracker::CueTracker;
use crate::transport::AudioTransport;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "ogg", "wav", "flac", "m4a", "webm", "opus"];
const LYRICS_EXTENSIONS: &[&str] = &["lrc", "txt"];

/// What kind of content a [`SessionEvent::ContentLoaded`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Audio,
    Lyrics,
}

/// Events emitted by a session for a consuming UI.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The active cue changed. `None` means before the first cue or no cues.
    ///
    /// Edge-triggered: emitted only when the index differs from the last
    /// report, never once per sampling tick.
    CueChanged { index: Option<usize> },
    /// Externally-visible playback state changed.
    StateChanged { state: PlaybackState },
    /// Audio or lyrics content was replaced.
    ContentLoaded {
        kind: ContentKind,
        source_name: String,
    },
    /// The transport reached the end of the loaded source.
    PlaybackEnded,
}

struct SessionInner {
    transport: Box<dyn AudioTransport>,
    phase: SessionPhase,
    state: PlaybackState,
    document: LyricsDocument,
    tracker: CueTracker,
    sampler: Option<CancellationToken>,
    /// Bumped whenever the sampling loop is (re)started or stopped; a tick
    /// from a superseded loop sees a mismatch and exits without mutating.
    generation: u64,
}

/// One synchronized lyrics/audio playback session.
///
/// Owns the playback state machine, the loaded content, and the sampling
/// loop. All shared state lives behind a single lock; the sampling loop and
/// inbound message handlers interleave but never preempt each other mid-step.
pub struct Session {
    inner: RwLock<SessionInner>,
    event_tx: broadcast::Sender<SessionEvent>,
    broadcaster: Broadcaster,
    settings: Arc<dyn SettingsStore>,
    config: SessionConfig,
    /// Self-handle for spawning the sampling loop from `&self` methods.
    weak: Weak<Session>,
}

impl Session {
    /// Create a session wired to the host environment's collaborators.
    ///
    /// The persisted volume (if any) is restored immediately.
    #[must_use]
    pub fn new(
        transport: Box<dyn AudioTransport>,
        channel: Arc<dyn BroadcastChannel>,
        authority: Arc<dyn AuthorityCheck>,
        settings: Arc<dyn SettingsStore>,
        config: SessionConfig,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(64);
        let volume = settings
            .get(SETTING_VOLUME)
            .and_then(|v| v.parse::<f64>().ok())
            .map_or(config.default_volume, clamp_volume);

        Arc::new_cyclic(|weak| Self {
            inner: RwLock::new(SessionInner {
                transport,
                phase: SessionPhase::Idle,
                state: PlaybackState {
                    volume,
                    ..PlaybackState::default()
                },
                document: LyricsDocument::default(),
                tracker: CueTracker::new(),
                sampler: None,
                generation: 0,
            }),
            event_tx,
            broadcaster: Broadcaster::new(channel, authority),
            settings,
            config,
            weak: Weak::clone(weak),
        })
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Current playback state snapshot.
    pub async fn state(&self) -> PlaybackState {
        self.inner.read().await.state.clone()
    }

    /// Current session phase.
    pub async fn phase(&self) -> SessionPhase {
        self.inner.read().await.phase
    }

    /// Currently loaded lyrics.
    pub async fn document(&self) -> LyricsDocument {
        self.inner.read().await.document.clone()
    }

    /// The active cue index last reported by the tracker.
    pub async fn active_cue(&self) -> Option<usize> {
        self.inner.read().await.tracker.current()
    }

    /// Load a new audio source, replacing any current one.
    ///
    /// The previous transport handle is released synchronously first; the
    /// session lands in the paused phase with position zero. Broadcasts the
    /// payload by value to peers.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidFileKind`] if the filename fails the audio
    /// extension check (no state change), or
    /// [`CoreError::TransportFault`] if the device rejects the payload.
    pub async fn load_audio(&self, bytes: Vec<u8>, source_name: &str, mime_type: &str) -> Result<()> {
        if !has_extension(source_name, AUDIO_EXTENSIONS) {
            return Err(CoreError::InvalidFileKind {
                name: source_name.to_string(),
            });
        }

        {
            let mut guard = self.inner.write().await;
            let inner = &mut *guard;
            Self::stop_sampler(inner);
            inner.transport.release();
            if let Err(e) = inner.transport.load(&bytes, mime_type) {
                inner.phase = SessionPhase::Idle;
                inner.state = PlaybackState {
                    volume: inner.state.volume,
                    ..PlaybackState::default()
                };
                return Err(e);
            }
            inner.phase = SessionPhase::Paused;
            inner.state.is_playing = false;
            inner.state.position = Duration::ZERO;
            inner.state.source_id = Some(source_name.to_string());
            let volume = inner.state.volume;
            inner.transport.set_volume(volume);
            inner.tracker.reset();
        }

        info!("loaded audio source {source_name}");
        self.settings.set(SETTING_LAST_AUDIO, source_name);
        let _ = self.event_tx.send(SessionEvent::ContentLoaded {
            kind: ContentKind::Audio,
            source_name: source_name.to_string(),
        });
        self.broadcaster
            .publish(&SyncMessage::LoadAudio {
                payload: bytes,
                source_name: source_name.to_string(),
                mime_type: mime_type.to_string(),
            })
            .await;
        Ok(())
    }

    /// Load lyrics text, replacing any current document wholesale.
    ///
    /// Parsing is total; a file of garbage simply yields an empty cue list.
    /// The tracker re-evaluates against the current position immediately so
    /// the display updates even while paused.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidFileKind`] if the filename fails the lyrics
    /// extension check (no state change).
    pub async fn load_lyrics(&self, text: &str, source_name: &str) -> Result<()> {
        if !has_extension(source_name, LYRICS_EXTENSIONS) {
            return Err(CoreError::InvalidFileKind {
                name: source_name.to_string(),
            });
        }

        let document = LyricsDocument::parse(text);
        info!(
            "loaded {} cues from {source_name}",
            document.cues.len()
        );

        let (cue_changed, index) = {
            let mut guard = self.inner.write().await;
            let inner = &mut *guard;
            inner.document = document;
            inner.tracker.reset();
            let position = inner.transport.position();
            let changed = inner.tracker.update(&inner.document.cues, position);
            (changed, inner.tracker.current())
        };

        self.settings.set(SETTING_LAST_LYRICS, source_name);
        if cue_changed {
            let _ = self.event_tx.send(SessionEvent::CueChanged { index });
        }
        let _ = self.event_tx.send(SessionEvent::ContentLoaded {
            kind: ContentKind::Lyrics,
            source_name: source_name.to_string(),
        });
        self.broadcaster
            .publish(&SyncMessage::LoadLrc {
                text: text.to_string(),
                source_name: source_name.to_string(),
            })
            .await;
        Ok(())
    }

    /// Start playback and the sampling loop.
    ///
    /// No-op when already playing.
    ///
    /// # Errors
    ///
    /// [`CoreError::NoContentLoaded`] with no audio loaded, or
    /// [`CoreError::TransportFault`] if the device fails to start - the
    /// session then stays paused, consistent with reality.
    pub async fn play(&self) -> Result<()> {
        let snapshot = {
            let mut guard = self.inner.write().await;
            let inner = &mut *guard;
            match inner.phase {
                SessionPhase::Idle => {
                    return Err(CoreError::NoContentLoaded { action: "play" });
                }
                SessionPhase::Playing => {
                    debug!("play requested while already playing");
                    return Ok(());
                }
                SessionPhase::Paused => {}
            }
            inner.transport.play()?;
            inner.phase = SessionPhase::Playing;
            inner.state.is_playing = true;
            self.start_sampler(inner);
            inner.state.clone()
        };

        let _ = self.event_tx.send(SessionEvent::StateChanged {
            state: snapshot.clone(),
        });
        self.publish_state(&snapshot).await;
        Ok(())
    }

    /// Pause playback, stopping the sampling loop synchronously.
    ///
    /// No-op when already paused.
    ///
    /// # Errors
    ///
    /// [`CoreError::NoContentLoaded`] with no audio loaded.
    pub async fn pause(&self) -> Result<()> {
        let snapshot = {
            let mut guard = self.inner.write().await;
            let inner = &mut *guard;
            match inner.phase {
                SessionPhase::Idle => {
                    return Err(CoreError::NoContentLoaded { action: "pause" });
                }
                SessionPhase::Paused => return Ok(()),
                SessionPhase::Playing => {}
            }
            Self::stop_sampler(inner);
            inner.transport.pause();
            inner.phase = SessionPhase::Paused;
            inner.state.is_playing = false;
            inner.state.position = inner.transport.position();
            inner.state.clone()
        };

        let _ = self.event_tx.send(SessionEvent::StateChanged {
            state: snapshot.clone(),
        });
        self.publish_state(&snapshot).await;
        Ok(())
    }

    /// Seek to a position, clamped to `[0, duration]`.
    ///
    /// Does not change the play/pause state. The cue tracker re-evaluates
    /// immediately rather than waiting for the next sampling tick.
    ///
    /// # Errors
    ///
    /// [`CoreError::NoContentLoaded`] with no audio loaded.
    pub async fn seek(&self, position: Duration) -> Result<()> {
        let (snapshot, cue_changed, index) = {
            let mut guard = self.inner.write().await;
            let inner = &mut *guard;
            if !inner.phase.is_loaded() {
                return Err(CoreError::NoContentLoaded { action: "seek" });
            }
            let clamped = position.min(inner.transport.duration());
            inner.transport.seek(clamped);
            inner.state.position = clamped;
            let changed = inner.tracker.update(&inner.document.cues, clamped);
            (inner.state.clone(), changed, inner.tracker.current())
        };

        if cue_changed {
            let _ = self.event_tx.send(SessionEvent::CueChanged { index });
        }
        let _ = self.event_tx.send(SessionEvent::StateChanged {
            state: snapshot.clone(),
        });
        self.publish_state(&snapshot).await;
        Ok(())
    }

    /// Set the volume, clamped to `[0, 1]`, and persist it for the next
    /// session. Valid whether playing or paused.
    ///
    /// # Errors
    ///
    /// [`CoreError::NoContentLoaded`] with no audio loaded.
    pub async fn set_volume(&self, volume: f64) -> Result<()> {
        let snapshot = {
            let mut guard = self.inner.write().await;
            let inner = &mut *guard;
            if !inner.phase.is_loaded() {
                return Err(CoreError::NoContentLoaded {
                    action: "set volume",
                });
            }
            let volume = clamp_volume(volume);
            inner.transport.set_volume(volume);
            inner.state.volume = volume;
            inner.state.clone()
        };

        self.settings
            .set(SETTING_VOLUME, &snapshot.volume.to_string());
        let _ = self.event_tx.send(SessionEvent::StateChanged {
            state: snapshot.clone(),
        });
        self.publish_state(&snapshot).await;
        Ok(())
    }

    /// React to the transport's end-of-playback notification: the natural
    /// transition back to paused.
    pub async fn handle_ended(&self) {
        let snapshot = {
            let mut guard = self.inner.write().await;
            let inner = &mut *guard;
            if !inner.phase.is_playing() {
                return;
            }
            Self::stop_sampler(inner);
            inner.phase = SessionPhase::Paused;
            inner.state.is_playing = false;
            inner.state.position = inner.transport.position();
            inner.state.clone()
        };

        let _ = self.event_tx.send(SessionEvent::PlaybackEnded);
        let _ = self.event_tx.send(SessionEvent::StateChanged {
            state: snapshot.clone(),
        });
        self.publish_state(&snapshot).await;
    }

    /// End the session: stop sampling, release the audio handle, return to
    /// idle. Lyrics and volume survive; the source does not.
    pub async fn close(&self) {
        let snapshot = {
            let mut guard = self.inner.write().await;
            let inner = &mut *guard;
            Self::stop_sampler(inner);
            inner.transport.release();
            inner.phase = SessionPhase::Idle;
            inner.state = PlaybackState {
                volume: inner.state.volume,
                ..PlaybackState::default()
            };
            inner.tracker.reset();
            inner.state.clone()
        };
        let _ = self.event_tx.send(SessionEvent::StateChanged { state: snapshot });
    }

    /// Decode and apply a raw peer message.
    ///
    /// Undecodable messages are logged and dropped; a malformed peer can
    /// never crash this one.
    pub async fn apply_raw(&self, raw: &str) {
        match SyncMessage::decode(raw) {
            Ok(message) => self.apply_message(message).await,
            Err(e) => warn!("ignoring undecodable peer message: {e}"),
        }
    }

    /// Apply an inbound sync message from the authority peer.
    ///
    /// Never re-broadcasts: only the authority emits, so applying here
    /// cannot feed back into the channel.
    pub async fn apply_message(&self, message: SyncMessage) {
        match message {
            SyncMessage::LoadAudio {
                payload,
                source_name,
                mime_type,
            } => self.apply_load_audio(&payload, &source_name, &mime_type).await,
            SyncMessage::LoadLrc { text, source_name } => {
                self.apply_load_lrc(&text, &source_name).await;
            }
            SyncMessage::PlayerState {
                is_playing,
                position_seconds,
                volume,
            } => {
                self.apply_player_state(is_playing, position_seconds, volume)
                    .await;
            }
        }
    }

    async fn apply_load_audio(&self, payload: &[u8], source_name: &str, mime_type: &str) {
        {
            let mut guard = self.inner.write().await;
            let inner = &mut *guard;
            Self::stop_sampler(inner);
            inner.transport.release();
            if let Err(e) = inner.transport.load(payload, mime_type) {
                warn!("failed to load broadcast audio {source_name}: {e}");
                inner.phase = SessionPhase::Idle;
                inner.state = PlaybackState {
                    volume: inner.state.volume,
                    ..PlaybackState::default()
                };
                return;
            }
            inner.phase = SessionPhase::Paused;
            inner.state.is_playing = false;
            inner.state.position = Duration::ZERO;
            inner.state.source_id = Some(source_name.to_string());
            let volume = inner.state.volume;
            inner.transport.set_volume(volume);
            inner.tracker.reset();
        }

        info!("peer replaced audio source with {source_name}");
        let _ = self.event_tx.send(SessionEvent::ContentLoaded {
            kind: ContentKind::Audio,
            source_name: source_name.to_string(),
        });
    }

    async fn apply_load_lrc(&self, text: &str, source_name: &str) {
        let document = LyricsDocument::parse(text);
        info!(
            "peer replaced lyrics with {source_name} ({} cues)",
            document.cues.len()
        );

        let (cue_changed, index) = {
            let mut guard = self.inner.write().await;
            let inner = &mut *guard;
            inner.document = document;
            inner.tracker.reset();
            let position = inner.transport.position();
            let changed = inner.tracker.update(&inner.document.cues, position);
            (changed, inner.tracker.current())
        };

        if cue_changed {
            let _ = self.event_tx.send(SessionEvent::CueChanged { index });
        }
        let _ = self.event_tx.send(SessionEvent::ContentLoaded {
            kind: ContentKind::Lyrics,
            source_name: source_name.to_string(),
        });
    }

    /// Reconcile local transport against an authority state target.
    ///
    /// Volume is overwritten unconditionally. Position is corrected only
    /// past the soft-sync tolerance, avoiding constant micro-seeks from
    /// network jitter and clock skew. Play/pause converges by edge: start
    /// iff the authority plays and we are paused, pause iff the reverse.
    /// State-target semantics make re-delivery idempotent.
    async fn apply_player_state(&self, is_playing: bool, position_seconds: f64, volume: f64) {
        let (snapshot, cue_changed, index) = {
            let mut guard = self.inner.write().await;
            let inner = &mut *guard;
            if !inner.phase.is_loaded() {
                debug!("dropping state sync: no audio loaded");
                return;
            }

            let volume = clamp_volume(volume);
            inner.transport.set_volume(volume);
            inner.state.volume = volume;

            let target = duration_from_secs_lossy(position_seconds);
            let local = inner.transport.position();
            let mut cue_changed = false;
            if abs_diff(local, target) > self.config.sync_tolerance() {
                let clamped = target.min(inner.transport.duration());
                debug!("position diverged ({local:?} vs {target:?}), seeking to {clamped:?}");
                inner.transport.seek(clamped);
                inner.state.position = clamped;
                cue_changed = inner.tracker.update(&inner.document.cues, clamped);
            } else {
                inner.state.position = local;
            }

            if is_playing && inner.transport.is_paused() {
                match inner.transport.play() {
                    Ok(()) => {
                        inner.phase = SessionPhase::Playing;
                        inner.state.is_playing = true;
                        self.start_sampler(inner);
                    }
                    Err(e) => warn!("transport failed to start during sync: {e}"),
                }
            } else if !is_playing && !inner.transport.is_paused() {
                Self::stop_sampler(inner);
                inner.transport.pause();
                inner.phase = SessionPhase::Paused;
                inner.state.is_playing = false;
            }

            (inner.state.clone(), cue_changed, inner.tracker.current())
        };

        if cue_changed {
            let _ = self.event_tx.send(SessionEvent::CueChanged { index });
        }
        let _ = self.event_tx.send(SessionEvent::StateChanged { state: snapshot });
    }

    async fn publish_state(&self, state: &PlaybackState) {
        self.broadcaster
            .publish(&SyncMessage::PlayerState {
                is_playing: state.is_playing,
                position_seconds: state.position.as_secs_lossy(),
                volume: state.volume,
            })
            .await;
    }

    /// Spawn a fresh sampling loop, invalidating any previous one.
    ///
    /// The loop re-reads live transport position every tick (no predicted
    /// position, so no drift across pause/resume cycles) and feeds the cue
    /// tracker. Cancellation is synchronous via the stored token; the
    /// generation check catches a tick already in flight at cancel time.
    fn start_sampler(&self, inner: &mut SessionInner) {
        Self::stop_sampler(inner);
        let Some(session) = self.weak.upgrade() else {
            return;
        };
        let token = CancellationToken::new();
        inner.sampler = Some(token.clone());
        let generation = inner.generation;
        let period = self.config.tick_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !session.sample_tick(generation).await {
                            break;
                        }
                    }
                }
            }
            debug!("sampling loop stopped");
        });
    }

    fn stop_sampler(inner: &mut SessionInner) {
        if let Some(token) = inner.sampler.take() {
            token.cancel();
        }
        inner.generation = inner.generation.wrapping_add(1);
    }

    /// One sampling tick. Returns false when this loop is superseded.
    async fn sample_tick(&self, generation: u64) -> bool {
        let (cue_changed, index) = {
            let mut guard = self.inner.write().await;
            let inner = &mut *guard;
            if inner.generation != generation || !inner.phase.is_playing() {
                return false;
            }
            let position = inner.transport.position();
            inner.state.position = position;
            let changed = inner.tracker.update(&inner.document.cues, position);
            (changed, inner.tracker.current())
        };

        if cue_changed {
            let _ = self.event_tx.send(SessionEvent::CueChanged { index });
        }
        true
    }
}

fn has_extension(name: &str, allowed: &[&str]) -> bool {
    Path::new(name)
        .extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase)
        .is_some_and(|ext| allowed.contains(&ext.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::NullSettings;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug)]
    struct FakeTransportState {
        loaded: bool,
        playing: bool,
        position: Duration,
        duration: Duration,
        volume: f64,
        fail_play: bool,
        play_calls: usize,
        pause_calls: usize,
        seek_calls: usize,
        release_calls: usize,
        position_reads: usize,
    }

    impl Default for FakeTransportState {
        fn default() -> Self {
            Self {
                loaded: false,
                playing: false,
                position: Duration::ZERO,
                duration: Duration::from_secs(180),
                volume: 1.0,
                fail_play: false,
                play_calls: 0,
                pause_calls: 0,
                seek_calls: 0,
                release_calls: 0,
                position_reads: 0,
            }
        }
    }

    struct FakeTransport(Arc<StdMutex<FakeTransportState>>);

    impl AudioTransport for FakeTransport {
        fn load(&mut self, _bytes: &[u8], _mime_type: &str) -> Result<()> {
            let mut s = self.0.lock().unwrap();
            s.loaded = true;
            s.playing = false;
            s.position = Duration::ZERO;
            Ok(())
        }

        fn play(&mut self) -> Result<()> {
            let mut s = self.0.lock().unwrap();
            if s.fail_play {
                return Err(CoreError::TransportFault {
                    reason: "device busy".to_string(),
                });
            }
            s.playing = true;
            s.play_calls += 1;
            Ok(())
        }

        fn pause(&mut self) {
            let mut s = self.0.lock().unwrap();
            s.playing = false;
            s.pause_calls += 1;
        }

        fn seek(&mut self, position: Duration) {
            let mut s = self.0.lock().unwrap();
            s.position = position;
            s.seek_calls += 1;
        }

        fn set_volume(&mut self, volume: f64) {
            self.0.lock().unwrap().volume = volume;
        }

        fn position(&self) -> Duration {
            let mut s = self.0.lock().unwrap();
            s.position_reads += 1;
            s.position
        }

        fn duration(&self) -> Duration {
            self.0.lock().unwrap().duration
        }

        fn is_paused(&self) -> bool {
            !self.0.lock().unwrap().playing
        }

        fn release(&mut self) {
            let mut s = self.0.lock().unwrap();
            s.loaded = false;
            s.playing = false;
            s.position = Duration::ZERO;
            s.release_calls += 1;
        }
    }

    #[derive(Default)]
    struct FakeChannel {
        sent: StdMutex<Vec<SyncMessage>>,
    }

    #[async_trait]
    impl BroadcastChannel for FakeChannel {
        async fn send(&self, message: &SyncMessage) -> Result<()> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    struct FakeAuthority(bool);

    impl AuthorityCheck for FakeAuthority {
        fn is_authority(&self) -> bool {
            self.0
        }
    }

    #[derive(Default)]
    struct FakeSettings {
        values: StdMutex<HashMap<String, String>>,
    }

    impl SettingsStore for FakeSettings {
        fn get(&self, key: &str) -> Option<String> {
            self.values.lock().unwrap().get(key).cloned()
        }

        fn set(&self, key: &str, value: &str) {
            self.values
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
        }
    }

    type Harness = (
        Arc<Session>,
        Arc<StdMutex<FakeTransportState>>,
        Arc<FakeChannel>,
    );

    fn build_with(authority: bool, settings: Arc<dyn SettingsStore>) -> Harness {
        let transport_state = Arc::new(StdMutex::new(FakeTransportState::default()));
        let channel = Arc::new(FakeChannel::default());
        let session = Session::new(
            Box::new(FakeTransport(Arc::clone(&transport_state))),
            Arc::<FakeChannel>::clone(&channel),
            Arc::new(FakeAuthority(authority)),
            settings,
            SessionConfig::default(),
        );
        (session, transport_state, channel)
    }

    fn build_session(authority: bool) -> Harness {
        build_with(authority, Arc::new(NullSettings))
    }

    fn sent_kinds(channel: &FakeChannel) -> Vec<&'static str> {
        channel.sent.lock().unwrap().iter().map(SyncMessage::kind).collect()
    }

    fn drain_cue_events(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<Option<usize>> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::CueChanged { index } = event {
                out.push(index);
            }
        }
        out
    }

    async fn run_ticks(n: u32) {
        for _ in 0..n {
            tokio::time::advance(Duration::from_millis(100)).await;
            for _ in 0..4 {
                tokio::task::yield_now().await;
            }
        }
    }

    const LYRICS: &str = "[00:00.00]A\n[00:05.00]B\n[00:10.00]C";

    #[tokio::test]
    async fn test_control_actions_require_audio() {
        let (session, _, _) = build_session(true);
        assert!(matches!(
            session.play().await,
            Err(CoreError::NoContentLoaded { .. })
        ));
        assert!(matches!(
            session.pause().await,
            Err(CoreError::NoContentLoaded { .. })
        ));
        assert!(matches!(
            session.seek(Duration::from_secs(5)).await,
            Err(CoreError::NoContentLoaded { .. })
        ));
        assert!(matches!(
            session.set_volume(0.5).await,
            Err(CoreError::NoContentLoaded { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_file_kind_rejected() {
        let (session, transport, channel) = build_session(true);
        assert!(matches!(
            session.load_audio(vec![1], "notes.pdf", "application/pdf").await,
            Err(CoreError::InvalidFileKind { .. })
        ));
        assert!(matches!(
            session.load_lyrics("[00:01.00]x", "song.mp3").await,
            Err(CoreError::InvalidFileKind { .. })
        ));
        assert!(!transport.lock().unwrap().loaded);
        assert!(channel.sent.lock().unwrap().is_empty());
        assert_eq!(session.phase().await, SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_load_audio_releases_previous_source() {
        let (session, transport, _) = build_session(true);
        session.load_audio(vec![1], "a.mp3", "audio/mpeg").await.unwrap();
        session.play().await.unwrap();
        session.load_audio(vec![2], "b.ogg", "audio/ogg").await.unwrap();

        let s = transport.lock().unwrap();
        assert_eq!(s.release_calls, 2);
        assert!(s.loaded);
        assert!(!s.playing);
        assert_eq!(s.position, Duration::ZERO);
        drop(s);
        assert_eq!(session.phase().await, SessionPhase::Paused);
        assert_eq!(
            session.state().await.source_id.as_deref(),
            Some("b.ogg")
        );
    }

    #[tokio::test]
    async fn test_authority_broadcasts_lifecycle() {
        let (session, _, channel) = build_session(true);
        session.load_audio(vec![1], "a.mp3", "audio/mpeg").await.unwrap();
        session.load_lyrics(LYRICS, "a.lrc").await.unwrap();
        session.play().await.unwrap();
        session.pause().await.unwrap();

        assert_eq!(
            sent_kinds(&channel),
            vec!["loadAudio", "loadLrc", "playerState", "playerState"]
        );
        let sent = channel.sent.lock().unwrap();
        assert!(matches!(
            sent[2],
            SyncMessage::PlayerState { is_playing: true, .. }
        ));
        assert!(matches!(
            sent[3],
            SyncMessage::PlayerState { is_playing: false, .. }
        ));
    }

    #[tokio::test]
    async fn test_follower_never_broadcasts() {
        let (session, _, channel) = build_session(false);
        session.load_audio(vec![1], "a.mp3", "audio/mpeg").await.unwrap();
        session.load_lyrics(LYRICS, "a.lrc").await.unwrap();
        session.play().await.unwrap();
        session.pause().await.unwrap();
        assert!(channel.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_play_twice_is_noop() {
        let (session, transport, _) = build_session(true);
        session.load_audio(vec![1], "a.mp3", "audio/mpeg").await.unwrap();
        session.play().await.unwrap();
        session.play().await.unwrap();
        assert_eq!(transport.lock().unwrap().play_calls, 1);
    }

    #[tokio::test]
    async fn test_transport_fault_reverts_to_paused() {
        let (session, transport, channel) = build_session(true);
        session.load_audio(vec![1], "a.mp3", "audio/mpeg").await.unwrap();
        transport.lock().unwrap().fail_play = true;

        assert!(matches!(
            session.play().await,
            Err(CoreError::TransportFault { .. })
        ));
        assert_eq!(session.phase().await, SessionPhase::Paused);
        assert!(!session.state().await.is_playing);
        // The failed transition never hits the wire.
        assert_eq!(sent_kinds(&channel), vec!["loadAudio"]);
    }

    #[tokio::test]
    async fn test_seek_clamps_and_reports_cue_immediately() {
        let (session, transport, _) = build_session(true);
        session.load_audio(vec![1], "a.mp3", "audio/mpeg").await.unwrap();
        session.load_lyrics(LYRICS, "a.lrc").await.unwrap();
        let mut rx = session.subscribe();

        // Paused, so no sampling tick will run; the seek itself re-evaluates.
        session.seek(Duration::from_secs(7)).await.unwrap();
        assert_eq!(drain_cue_events(&mut rx), vec![Some(1)]);
        assert_eq!(transport.lock().unwrap().position, Duration::from_secs(7));

        session.seek(Duration::from_secs(10_000)).await.unwrap();
        assert_eq!(transport.lock().unwrap().position, Duration::from_secs(180));
        assert_eq!(drain_cue_events(&mut rx), vec![Some(2)]);
        assert_eq!(session.phase().await, SessionPhase::Paused);
    }

    #[tokio::test]
    async fn test_volume_clamped_persisted_restored() {
        let settings: Arc<FakeSettings> = Arc::new(FakeSettings::default());
        let (session, transport, _) =
            build_with(true, Arc::<FakeSettings>::clone(&settings) as Arc<dyn SettingsStore>);
        session.load_audio(vec![1], "a.mp3", "audio/mpeg").await.unwrap();

        session.set_volume(0.3).await.unwrap();
        assert!((transport.lock().unwrap().volume - 0.3).abs() < f64::EPSILON);
        assert_eq!(settings.get(SETTING_VOLUME).as_deref(), Some("0.3"));

        session.set_volume(7.5).await.unwrap();
        assert!((session.state().await.volume - 1.0).abs() < f64::EPSILON);

        // A fresh session restores the persisted volume.
        settings.set(SETTING_VOLUME, "0.3");
        let (next, _, _) =
            build_with(true, Arc::<FakeSettings>::clone(&settings) as Arc<dyn SettingsStore>);
        assert!((next.state().await.volume - 0.3).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_reconciliation_position_tolerance() {
        let (session, transport, _) = build_session(false);
        session
            .apply_message(SyncMessage::LoadAudio {
                payload: vec![1],
                source_name: "a.mp3".to_string(),
                mime_type: "audio/mpeg".to_string(),
            })
            .await;
        transport.lock().unwrap().position = Duration::from_secs(10);

        // Within tolerance: no seek.
        session
            .apply_message(SyncMessage::PlayerState {
                is_playing: false,
                position_seconds: 10.8,
                volume: 1.0,
            })
            .await;
        assert_eq!(transport.lock().unwrap().seek_calls, 0);
        assert_eq!(transport.lock().unwrap().position, Duration::from_secs(10));

        // Past tolerance: corrected to the incoming target.
        session
            .apply_message(SyncMessage::PlayerState {
                is_playing: false,
                position_seconds: 11.2,
                volume: 1.0,
            })
            .await;
        assert_eq!(transport.lock().unwrap().seek_calls, 1);
        assert_eq!(
            transport.lock().unwrap().position,
            Duration::from_millis(11_200)
        );
    }

    #[tokio::test]
    async fn test_reconciliation_volume_unconditional() {
        let (session, transport, _) = build_session(false);
        session
            .apply_message(SyncMessage::LoadAudio {
                payload: vec![1],
                source_name: "a.mp3".to_string(),
                mime_type: "audio/mpeg".to_string(),
            })
            .await;
        session
            .apply_message(SyncMessage::PlayerState {
                is_playing: false,
                position_seconds: 0.0,
                volume: 0.25,
            })
            .await;
        assert!((transport.lock().unwrap().volume - 0.25).abs() < f64::EPSILON);
        assert!((session.state().await.volume - 0.25).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_reconciliation_idempotent_under_redelivery() {
        let (session, transport, channel) = build_session(false);
        session
            .apply_message(SyncMessage::LoadAudio {
                payload: vec![1],
                source_name: "a.mp3".to_string(),
                mime_type: "audio/mpeg".to_string(),
            })
            .await;

        let play_target = SyncMessage::PlayerState {
            is_playing: true,
            position_seconds: 0.0,
            volume: 0.8,
        };
        session.apply_message(play_target.clone()).await;
        let first = session.state().await;
        session.apply_message(play_target).await;
        let second = session.state().await;

        assert_eq!(first, second);
        assert_eq!(transport.lock().unwrap().play_calls, 1);
        assert!(transport.lock().unwrap().playing);

        let pause_target = SyncMessage::PlayerState {
            is_playing: false,
            position_seconds: 0.0,
            volume: 0.8,
        };
        session.apply_message(pause_target.clone()).await;
        session.apply_message(pause_target).await;
        assert_eq!(transport.lock().unwrap().pause_calls, 1);
        assert!(!transport.lock().unwrap().playing);

        // Applying never re-broadcasts, even though this peer mutated state.
        assert!(channel.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_state_sync_dropped_without_audio() {
        let (session, transport, _) = build_session(false);
        session
            .apply_message(SyncMessage::PlayerState {
                is_playing: true,
                position_seconds: 42.0,
                volume: 0.1,
            })
            .await;
        let s = transport.lock().unwrap();
        assert_eq!(s.play_calls, 0);
        assert_eq!(s.seek_calls, 0);
        drop(s);
        assert_eq!(session.phase().await, SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_apply_raw_drops_garbage() {
        let (session, transport, _) = build_session(false);
        session.apply_raw("{not json").await;
        session.apply_raw(r#"{"type":"unknownKind","x":1}"#).await;
        assert!(!transport.lock().unwrap().loaded);

        session
            .apply_raw(r#"{"type":"loadLrc","text":"[00:01.00]Hi","sourceName":"a.lrc"}"#)
            .await;
        assert_eq!(session.document().await.cues.len(), 1);
    }

    #[tokio::test]
    async fn test_peer_lyrics_replaced_wholesale() {
        let (session, _, _) = build_session(false);
        session
            .apply_message(SyncMessage::LoadLrc {
                text: LYRICS.to_string(),
                source_name: "a.lrc".to_string(),
            })
            .await;
        assert_eq!(session.document().await.cues.len(), 3);

        session
            .apply_message(SyncMessage::LoadLrc {
                text: "[00:01.00]only".to_string(),
                source_name: "b.lrc".to_string(),
            })
            .await;
        let doc = session.document().await;
        assert_eq!(doc.cues.len(), 1);
        assert_eq!(doc.cues[0].text, "only");
    }

    #[tokio::test]
    async fn test_handle_ended_transitions_to_paused() {
        let (session, transport, _) = build_session(true);
        session.load_audio(vec![1], "a.mp3", "audio/mpeg").await.unwrap();
        session.play().await.unwrap();
        transport.lock().unwrap().playing = false;
        transport.lock().unwrap().position = Duration::from_secs(180);

        let mut rx = session.subscribe();
        session.handle_ended().await;
        assert_eq!(session.phase().await, SessionPhase::Paused);
        assert!(!session.state().await.is_playing);
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::PlaybackEnded)));
    }

    #[tokio::test]
    async fn test_close_releases_audio() {
        let (session, transport, _) = build_session(true);
        session.load_audio(vec![1], "a.mp3", "audio/mpeg").await.unwrap();
        session.play().await.unwrap();
        session.close().await;

        assert_eq!(session.phase().await, SessionPhase::Idle);
        assert!(!transport.lock().unwrap().loaded);
        assert!(session.state().await.source_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampling_loop_reports_only_on_change() {
        let (session, transport, _) = build_session(true);
        session.load_audio(vec![1], "a.mp3", "audio/mpeg").await.unwrap();
        session.load_lyrics(LYRICS, "a.lrc").await.unwrap();
        let mut rx = session.subscribe();
        session.play().await.unwrap();

        // Ten ticks inside the first cue: zero re-render reports.
        run_ticks(10).await;
        assert!(drain_cue_events(&mut rx).is_empty());

        // Position crosses into the second cue: exactly one report.
        transport.lock().unwrap().position = Duration::from_secs(6);
        run_ticks(5).await;
        assert_eq!(drain_cue_events(&mut rx), vec![Some(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_sampler_performs_no_evaluations() {
        let (session, transport, _) = build_session(true);
        session.load_audio(vec![1], "a.mp3", "audio/mpeg").await.unwrap();
        session.load_lyrics(LYRICS, "a.lrc").await.unwrap();
        session.play().await.unwrap();
        run_ticks(3).await;

        session.pause().await.unwrap();
        let mut rx = session.subscribe();
        let reads = transport.lock().unwrap().position_reads;
        transport.lock().unwrap().position = Duration::from_secs(11);

        // Ticks keep elapsing; the stopped loop must not sample once.
        run_ticks(20).await;
        assert_eq!(transport.lock().unwrap().position_reads, reads);
        assert!(drain_cue_events(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_restarts_loop_from_live_position() {
        let (session, transport, _) = build_session(true);
        session.load_audio(vec![1], "a.mp3", "audio/mpeg").await.unwrap();
        session.load_lyrics(LYRICS, "a.lrc").await.unwrap();
        session.play().await.unwrap();
        run_ticks(2).await;
        session.pause().await.unwrap();

        // While paused the position moved (e.g. an external seek).
        transport.lock().unwrap().position = Duration::from_secs(11);
        let mut rx = session.subscribe();
        session.play().await.unwrap();
        run_ticks(2).await;

        // The restarted loop reads live position, no stale predicted state.
        assert_eq!(drain_cue_events(&mut rx), vec![Some(2)]);
    }
}
