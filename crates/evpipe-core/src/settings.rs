// Evpipe Settings Module
// Optional TOML configuration for the sender and the remote profile

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::input::GrabPolicy;
use crate::translate::{RemapEntry, RemapTable, RemoteProfile};

/// Errors that can occur when loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("Invalid setting value: {0}")]
    InvalidValue(String),
}

/// Settings loaded from `config.toml`.
///
/// ```toml
/// [sender]
/// output_command = "ssh media-pc evpipe-recv"
///
/// [remote]
/// wake_hold_ms = 1500
///
/// [[remote.remap]]
/// from = 412
/// to = 14
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub sender: SenderSettings,
    pub remote: RemoteSettings,

    /// Path the settings were read from
    #[serde(skip)]
    source_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SenderSettings {
    /// Shell command receiving the stream instead of stdout
    pub output_command: Option<String>,
    pub grab_retries: u32,
    pub grab_retry_delay_ms: u64,
    pub poll_timeout_ms: i32,
}

impl Default for SenderSettings {
    fn default() -> Self {
        let grab = GrabPolicy::default();
        Self {
            output_command: None,
            grab_retries: grab.attempts,
            grab_retry_delay_ms: grab.delay.as_millis() as u64,
            poll_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteSettings {
    pub sleep_key: u16,
    pub wake_keys: Vec<u16>,
    pub wake_hold_ms: u64,
    pub touch_down_code: u16,
    pub touch_up_code: u16,
    pub width: i32,
    pub height: i32,
    /// Added to (or replacing entries of) the built-in table
    pub remap: Vec<RemapSetting>,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        let profile = RemoteProfile::default();
        Self {
            sleep_key: profile.sleep_key.unwrap_or(241),
            wake_keys: profile.wake_keys,
            wake_hold_ms: profile.wake_hold.as_millis() as u64,
            touch_down_code: profile.touch_down_code,
            touch_up_code: profile.touch_up_code,
            width: profile.screen_width,
            height: profile.screen_height,
            remap: Vec::new(),
        }
    }
}

/// One `[[remote.remap]]` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemapSetting {
    pub from: u16,
    pub to: u16,
    #[serde(default)]
    pub modifier: Option<u16>,
    #[serde(default)]
    pub buggy_mouse: bool,
}

impl RemapSetting {
    fn entry(&self) -> RemapEntry {
        RemapEntry {
            code: self.to,
            modifier: self.modifier,
            buggy_mouse: self.buggy_mouse,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(&path)?;
        let mut settings = Self::from_toml(&content)?;
        settings.source_path = Some(path.as_ref().to_path_buf());
        Ok(settings)
    }

    /// Load settings from TOML string
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings =
            toml::from_str(content).map_err(|e| SettingsError::TomlParse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Get the default settings path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("evpipe").join("config.toml"))
    }

    /// Load an explicit file, or the default location when it exists.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, SettingsError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(path),
            _ => Ok(Self::new()),
        }
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.sender.grab_retries == 0 {
            return Err(SettingsError::InvalidValue(
                "sender.grab_retries must be at least 1".to_string(),
            ));
        }
        if self.sender.poll_timeout_ms <= 0 {
            return Err(SettingsError::InvalidValue(
                "sender.poll_timeout_ms must be positive".to_string(),
            ));
        }
        if self.remote.width <= 0 || self.remote.height <= 0 {
            return Err(SettingsError::InvalidValue(format!(
                "remote screen size {}x{} must be positive",
                self.remote.width, self.remote.height
            )));
        }
        if self.remote.touch_down_code == self.remote.touch_up_code {
            return Err(SettingsError::InvalidValue(
                "remote.touch_down_code and remote.touch_up_code must differ".to_string(),
            ));
        }
        Ok(())
    }

    pub fn grab_policy(&self) -> GrabPolicy {
        GrabPolicy {
            attempts: self.sender.grab_retries,
            delay: Duration::from_millis(self.sender.grab_retry_delay_ms),
        }
    }

    /// Build the translator profile, layering `[[remote.remap]]` over the
    /// built-in table.
    pub fn remote_profile(&self) -> RemoteProfile {
        let remote = &self.remote;
        RemoteProfile {
            remap: RemapTable::with_overrides(remote.remap.iter().map(|r| (r.from, r.entry()))),
            sleep_key: Some(remote.sleep_key),
            wake_keys: remote.wake_keys.clone(),
            wake_hold: Duration::from_millis(remote.wake_hold_ms),
            touch_down_code: remote.touch_down_code,
            touch_up_code: remote.touch_up_code,
            screen_width: remote.width,
            screen_height: remote.height,
        }
    }
}
