//! Bridge configuration schema and loader
//!
//! Configuration is stored as YAML in the user's config directory.
//! Default location: ~/.config/faderlink/config.yaml
//!
//! Everything here is read once at startup. Each physical controller is a
//! [`DeviceProfile`] value rather than a separate code path.

use crate::curve::VolumeCurve;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Controller capabilities and wire layout
    pub device: DeviceProfile,
    /// Fader positions bound to audio sinks
    pub channels: Vec<ChannelConfig>,
    /// Channel that is muted automatically when master reaches zero
    pub mic_channel: Option<usize>,
    /// Moving a single fader clears that channel's mute
    pub fader_move_unmutes: bool,
    /// Mute/unmute animation timing
    pub fade: FadeConfig,
    /// Fader-to-gain curve parameters
    pub curve: VolumeCurve,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device: DeviceProfile::default(),
            channels: vec![
                ChannelConfig::new(0, "general-output", 0x31),
                ChannelConfig::new(1, "discord-output", 0x38),
                ChannelConfig::new(2, "tidal-output", 0x15),
                ChannelConfig {
                    ignore_master: true,
                    ..ChannelConfig::new(7, "mic", 0x14)
                },
            ],
            mic_channel: Some(7),
            fader_move_unmutes: true,
            fade: FadeConfig::default(),
            curve: VolumeCurve::default(),
        }
    }
}

/// Capabilities of one physical control surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    /// Human-readable device name
    pub name: String,

    /// Port name substring to match (case-insensitive)
    pub port_match: String,

    /// SysEx sent once after connecting (selects device mode, requests fader positions)
    pub init_sysex: Vec<u8>,

    /// Leading bytes of the SysEx reply carrying all fader positions
    /// The fader bytes follow immediately, master byte last.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bulk_frame_prefix: Option<Vec<u8>>,

    /// Number of channel faders (master excluded)
    pub channel_count: usize,

    /// CC number of the first channel fader
    pub fader_cc_offset: u8,

    /// Note numbers that toggle mute, first key = channel 0
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mute_keys: Option<KeyRange>,

    /// Note numbers that toggle boost, first key = channel 0
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boost_keys: Option<KeyRange>,

    /// Note number that toggles master between zero and its last level
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_mute_key: Option<u8>,

    /// LED grid layout; `None` for controllers without LED feedback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub led: Option<LedLayout>,
}

impl Default for DeviceProfile {
    /// Akai APC mini mk2 in its default mode
    fn default() -> Self {
        Self {
            name: "APC mini mk2".to_string(),
            port_match: "APC mini mk2".to_string(),
            init_sysex: vec![
                0xF0, 0x47, 0x7F, 0x4F, 0x60, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0xF7,
            ],
            bulk_frame_prefix: Some(vec![0xF0, 0x47, 0x7F, 0x4F, 0x61, 0x00, 0x09]),
            channel_count: 8,
            fader_cc_offset: 48,
            mute_keys: Some(KeyRange { start: 0, end: 8 }),
            boost_keys: Some(KeyRange { start: 100, end: 109 }),
            master_mute_key: None,
            led: Some(LedLayout::default()),
        }
    }
}

/// Half-open range of note numbers `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    pub start: u8,
    pub end: u8,
}

impl KeyRange {
    pub fn contains(&self, key: u8) -> bool {
        key >= self.start && key < self.end
    }

    /// Position of `key` inside the range
    pub fn offset_of(&self, key: u8) -> Option<usize> {
        self.contains(key).then(|| (key - self.start) as usize)
    }

    /// Note number for position `offset`, if it falls inside the range
    pub fn key_at(&self, offset: usize) -> Option<u8> {
        let key = self.start as usize + offset;
        (key < self.end as usize).then_some(key as u8)
    }
}

/// LED grid layout and the brightness/color codes it is driven with
///
/// On the APC mini mk2 the MIDI channel of a Note On selects brightness and
/// the velocity selects a palette color.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedLayout {
    /// LED slots per channel column (bar graph resolution)
    pub rows: u8,
    /// LEDs per grid row; LED index = slot * columns + channel
    pub columns: u8,
    pub on_brightness: u8,
    pub off_brightness: u8,
    /// Brightness/color of the slot just above the current level
    pub marker_brightness: u8,
    pub marker_color: u8,
    /// Replaces the on-color of lit slots while a channel is muted
    pub muted_color: u8,
    /// Boost indicator LEDs sit on the boost keys themselves
    pub boost_brightness: u8,
    pub boost_on_color: u8,
    pub boost_off_color: u8,
}

impl Default for LedLayout {
    fn default() -> Self {
        Self {
            rows: 8,
            columns: 8,
            on_brightness: 6,
            off_brightness: 1,
            marker_brightness: 6,
            marker_color: 0x03,
            muted_color: 0x05,
            boost_brightness: 0,
            boost_on_color: 127,
            boost_off_color: 0,
        }
    }
}

/// A fader position bound to an audio sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Fader position on the controller
    pub index: usize,
    /// Audio-server sink name
    pub sink: String,
    /// Exempt this channel from master scaling
    #[serde(default)]
    pub ignore_master: bool,
    /// Palette color of lit LED slots
    pub on_color: u8,
    /// Palette color of unlit LED slots
    #[serde(default)]
    pub off_color: u8,
}

impl ChannelConfig {
    pub fn new(index: usize, sink: &str, on_color: u8) -> Self {
        Self {
            index,
            sink: sink.to_string(),
            ignore_master: false,
            on_color,
            off_color: 0,
        }
    }
}

/// Mute/unmute animation timing
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FadeConfig {
    /// Number of discrete steps per fade
    pub steps: u32,
    /// Wait between steps, in milliseconds
    pub interval_ms: u64,
}

impl FadeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for FadeConfig {
    fn default() -> Self {
        Self {
            steps: 12,
            interval_ms: 15,
        }
    }
}

/// Configuration that cannot drive a control surface
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("channel {index} is outside the device's {count} faders")]
    ChannelOutOfRange { index: usize, count: usize },

    #[error("channel {0} is configured more than once")]
    DuplicateChannel(usize),

    #[error("mic channel {0} has no sink binding")]
    UnboundMicChannel(usize),

    #[error("fade needs at least one step")]
    NoFadeSteps,

    #[error("invalid {which} curve: min {min} must be >= 0 and <= max {max}")]
    InvalidCurve { which: &'static str, min: f32, max: f32 },

    #[error("LED layout needs at least one row and {needed} columns")]
    InvalidLedLayout { needed: usize },

    #[error("LED grid of {rows}x{columns} does not fit the 128 MIDI note numbers")]
    LedGridTooLarge { rows: u8, columns: u8 },

    #[error("{which} key range {start}..{end} goes past MIDI note 127")]
    KeyRangeTooLarge { which: &'static str, start: u8, end: u8 },
}

/// LED indices and button keys are 7-bit note numbers
pub const MIDI_NOTE_COUNT: usize = 128;

impl BridgeConfig {
    /// Check the invariants the engine relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let count = self.device.channel_count;
        let mut seen = HashSet::new();
        for channel in &self.channels {
            if channel.index >= count {
                return Err(ConfigError::ChannelOutOfRange {
                    index: channel.index,
                    count,
                });
            }
            if !seen.insert(channel.index) {
                return Err(ConfigError::DuplicateChannel(channel.index));
            }
        }

        if let Some(mic) = self.mic_channel {
            if !seen.contains(&mic) {
                return Err(ConfigError::UnboundMicChannel(mic));
            }
        }

        if self.fade.steps == 0 {
            return Err(ConfigError::NoFadeSteps);
        }

        for (which, range) in [("normal", &self.curve.normal), ("boosted", &self.curve.boosted)] {
            if !(range.min >= 0.0 && range.min <= range.max) {
                return Err(ConfigError::InvalidCurve {
                    which,
                    min: range.min,
                    max: range.max,
                });
            }
        }

        if let Some(ref led) = self.device.led {
            if led.rows == 0 || (led.columns as usize) < count {
                return Err(ConfigError::InvalidLedLayout { needed: count });
            }
            if led.rows as usize * led.columns as usize > MIDI_NOTE_COUNT {
                return Err(ConfigError::LedGridTooLarge {
                    rows: led.rows,
                    columns: led.columns,
                });
            }
        }

        let ranges = [("mute", self.device.mute_keys), ("boost", self.device.boost_keys)];
        for (which, range) in ranges {
            if let Some(KeyRange { start, end }) = range {
                if end as usize > MIDI_NOTE_COUNT {
                    return Err(ConfigError::KeyRangeTooLarge { which, start, end });
                }
            }
        }

        Ok(())
    }

    /// Look up the sink binding for a fader position
    pub fn channel(&self, index: usize) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.index == index)
    }
}

/// Get the default config file path
///
/// Returns: ~/.config/faderlink/config.yaml
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("faderlink")
        .join("config.yaml")
}

/// Load configuration from a YAML file
///
/// A missing file yields the built-in defaults. An unreadable or malformed
/// file is reported and also falls back to the defaults.
pub fn load_config(path: &Path) -> BridgeConfig {
    log::info!("load_config: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_config: Config file doesn't exist, using defaults");
        return BridgeConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<BridgeConfig>(&contents) {
            Ok(config) => {
                log::info!(
                    "load_config: Device '{}' (port_match: '{}'), {} channel(s)",
                    config.device.name,
                    config.device.port_match,
                    config.channels.len()
                );
                for channel in &config.channels {
                    log::info!(
                        "  - fader {} -> {}{}",
                        channel.index,
                        channel.sink,
                        if channel.ignore_master { " (ignores master)" } else { "" }
                    );
                }
                config
            }
            Err(e) => {
                log::warn!("load_config: Failed to parse config: {}", e);
                BridgeConfig::default()
            }
        },
        Err(e) => {
            log::warn!("load_config: Failed to read config file: {}", e);
            BridgeConfig::default()
        }
    }
}

/// Save configuration to a YAML file
pub fn save_config(config: &BridgeConfig, path: &Path) -> anyhow::Result<()> {
    use anyhow::Context;

    log::info!("save_config: Saving to {:?}", path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;

    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("save_config: Config saved successfully");
    Ok(())
}
