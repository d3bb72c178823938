//! Persisted key-value settings seam.

/// Key under which the last volume is remembered across sessions.
pub const SETTING_VOLUME: &str = "lyricast.volume";

/// Key under which the last-loaded audio filename is remembered.
pub const SETTING_LAST_AUDIO: &str = "lyricast.last-audio";

/// Key under which the last-loaded lyrics filename is remembered.
pub const SETTING_LAST_LYRICS: &str = "lyricast.last-lyrics";

/// The host environment's settings store.
///
/// Used only to remember volume and last-loaded filenames across sessions;
/// never part of the sync protocol.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// A settings store that remembers nothing. Useful for tests and for hosts
/// without persistence.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSettings;

impl SettingsStore for NullSettings {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn set(&self, _key: &str, _value: &str) {}
}
