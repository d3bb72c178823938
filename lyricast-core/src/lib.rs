pub mod channel;
pub mod config;
pub mod error;
pub mod lrc;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod settings;
pub mod time;
pub mod tracker;
pub mod transport;

pub use channel::{AuthorityCheck, BroadcastChannel, Broadcaster};
pub use config::{SessionConfig, CONFIG_DIR_NAME, CONFIG_FILE_NAME};
pub use error::{CoreError, Result};
pub use lrc::{Cue, LyricsDocument};
pub use playback::{clamp_volume, PlaybackState, SessionPhase};
pub use protocol::SyncMessage;
pub use session::{ContentKind, Session, SessionEvent};
pub use settings::{
    NullSettings, SettingsStore, SETTING_LAST_AUDIO, SETTING_LAST_LYRICS, SETTING_VOLUME,
};
pub use time::DurationExt;
pub use tracker::{active_index, CueTracker};
pub use transport::AudioTransport;
