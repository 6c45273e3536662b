//! LED bar-graph feedback
//!
//! Each bound channel owns one column of the LED grid. The column is a bar
//! graph of the channel's display level with a marker on the slot just above
//! the lit part. Rendering is pure; the [`LedRenderer`] then filters the
//! result through a change tracker so only LEDs whose (brightness, color)
//! actually changed go out on the wire.

use crate::config::{ChannelConfig, KeyRange, LedLayout, MIDI_NOTE_COUNT};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Error type for outbound controller messages
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("Failed to send MIDI message: {0}")]
    SendFailed(String),
}

/// Destination for LED and init messages
///
/// Implemented over a MIDI output port by the transport and by recorders
/// in tests.
pub trait LedOutput: Send {
    /// Set one LED to a brightness code and palette color
    fn send_led(&mut self, brightness: u8, index: u8, color: u8) -> Result<(), OutputError>;

    /// Send a raw SysEx payload (including F0/F7)
    fn send_sysex(&mut self, payload: &[u8]) -> Result<(), OutputError>;
}

/// One LED state to display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedCommand {
    pub brightness: u8,
    pub index: u8,
    pub color: u8,
}

/// Number of bar slots a display value fills
pub fn bar_level(display: f32, rows: u8) -> usize {
    let scaled = (display * rows as f32).round();
    if scaled.is_nan() {
        return 0;
    }
    scaled.clamp(0.0, rows as f32) as usize
}

/// Compute every LED of a channel's column
///
/// Level 0 still lights the bottom slot so an idle channel stays visible;
/// any non-zero level below the top also shows the marker above the bar,
/// which is what tells level 0 and level 1 apart. Slots whose LED index
/// falls outside the 7-bit note range are skipped.
pub fn render_column(
    layout: &LedLayout,
    channel: &ChannelConfig,
    display: f32,
    muted: bool,
) -> Vec<LedCommand> {
    let level = bar_level(display, layout.rows);
    let lit_color = if muted { layout.muted_color } else { channel.on_color };

    (0..layout.rows as usize)
        .filter_map(|slot| {
            let index = led_index(layout, slot, channel.index)?;
            let command = if slot == level && level != 0 {
                LedCommand {
                    brightness: layout.marker_brightness,
                    index,
                    color: layout.marker_color,
                }
            } else if slot < level || (level == 0 && slot == 0) {
                LedCommand {
                    brightness: layout.on_brightness,
                    index,
                    color: lit_color,
                }
            } else {
                LedCommand {
                    brightness: layout.off_brightness,
                    index,
                    color: channel.off_color,
                }
            };
            Some(command)
        })
        .collect()
}

/// Note number of the LED at (slot, channel), if it is a valid 7-bit note
pub fn led_index(layout: &LedLayout, slot: usize, channel: usize) -> Option<u8> {
    let index = slot
        .checked_mul(layout.columns as usize)?
        .checked_add(channel)?;
    if index >= MIDI_NOTE_COUNT {
        log::trace!("LED: slot {} of channel {} has no note number", slot, channel);
        return None;
    }
    u8::try_from(index).ok()
}

/// Change tracker for LED output
///
/// Remembers the last (brightness, color) sent per LED index.
pub struct FeedbackChangeTracker {
    last_values: HashMap<u8, (u8, u8)>,
}

impl FeedbackChangeTracker {
    pub fn new() -> Self {
        Self {
            last_values: HashMap::new(),
        }
    }

    /// Record a state, returning true if it differs from the last one sent
    pub fn update(&mut self, index: u8, brightness: u8, color: u8) -> bool {
        if self.last_values.get(&index) == Some(&(brightness, color)) {
            false
        } else {
            self.last_values.insert(index, (brightness, color));
            true
        }
    }

    /// Drop the record for one LED so its next state is always sent
    pub fn forget(&mut self, index: u8) {
        self.last_values.remove(&index);
    }

    pub fn clear(&mut self) {
        self.last_values.clear();
    }

    /// All LEDs that have been sent at least once
    pub fn tracked_indices(&self) -> impl Iterator<Item = &u8> {
        self.last_values.keys()
    }
}

impl Default for FeedbackChangeTracker {
    fn default() -> Self {
        Self::new()
    }
}

struct LedPort {
    output: Box<dyn LedOutput>,
    tracker: FeedbackChangeTracker,
}

/// Deduplicating LED renderer
///
/// One lock covers the tracker and the output, so diffing and sending are a
/// single step and LED messages leave in the order they were rendered.
pub struct LedRenderer {
    layout: LedLayout,
    boost_keys: Option<KeyRange>,
    port: Mutex<LedPort>,
}

impl LedRenderer {
    pub fn new(layout: LedLayout, boost_keys: Option<KeyRange>, output: Box<dyn LedOutput>) -> Self {
        Self {
            layout,
            boost_keys,
            port: Mutex::new(LedPort {
                output,
                tracker: FeedbackChangeTracker::new(),
            }),
        }
    }

    /// Render a channel column, returning the number of LED messages sent
    pub fn render_channel(&self, channel: &ChannelConfig, display: f32, muted: bool) -> usize {
        let commands = render_column(&self.layout, channel, display, muted);
        self.apply(&commands)
    }

    /// Light or clear the boost key of a channel
    pub fn render_boost(&self, index: usize, boosted: bool) -> usize {
        let Some(key) = self.boost_keys.and_then(|keys| keys.key_at(index)) else {
            return 0;
        };
        let color = if boosted {
            self.layout.boost_on_color
        } else {
            self.layout.boost_off_color
        };
        self.apply(&[LedCommand {
            brightness: self.layout.boost_brightness,
            index: key,
            color,
        }])
    }

    /// Turn off every LED that was ever lit
    pub fn clear_all(&self) {
        let mut port = self.lock_port();
        let indices: Vec<u8> = port.tracker.tracked_indices().copied().collect();
        for index in indices {
            if let Err(e) = port.output.send_led(0, index, 0) {
                log::warn!("LED: Failed to clear LED {}: {}", index, e);
            }
        }
        port.tracker.clear();
    }

    fn apply(&self, commands: &[LedCommand]) -> usize {
        let mut port = self.lock_port();
        let mut sent = 0;
        for command in commands {
            if !port.tracker.update(command.index, command.brightness, command.color) {
                continue;
            }
            match port.output.send_led(command.brightness, command.index, command.color) {
                Ok(()) => sent += 1,
                Err(e) => {
                    log::warn!("LED: {}", e);
                    // Resend on the next recompute
                    port.tracker.forget(command.index);
                }
            }
        }
        sent
    }

    fn lock_port(&self) -> MutexGuard<'_, LedPort> {
        self.port.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
