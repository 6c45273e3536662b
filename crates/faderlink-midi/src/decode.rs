//! Raw controller events to mixer events
//!
//! The decoder is stateless: it only knows the device layout. Anything it
//! cannot place (short frames, out-of-range controllers, unknown keys) is
//! dropped here so the engine never sees a partial update.

use crate::config::{DeviceProfile, KeyRange};

/// Semantic mixer event produced by the decoder
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MixerEvent {
    /// Set a channel fader (0.0-1.0)
    SetChannelValue {
        index: usize,
        value: f32,
        /// Came from a single fader move rather than a bulk frame
        from_fader: bool,
    },
    /// Set the master scalar (0.0-1.0)
    SetMaster(f32),
    /// Toggle a channel's mute
    ToggleMute(usize),
    /// Toggle a channel's boost range
    ToggleBoost(usize),
    /// Toggle master between zero and its last non-zero level
    ToggleMasterMute,
}

/// Convert a 7-bit MIDI value to 0.0-1.0
pub fn normalize_7bit(value: u8) -> f32 {
    value.min(127) as f32 / 127.0
}

/// Device-layout driven input decoder
#[derive(Debug, Clone)]
pub struct InputDecoder {
    channel_count: usize,
    fader_cc_offset: u8,
    mute_keys: Option<KeyRange>,
    boost_keys: Option<KeyRange>,
    master_mute_key: Option<u8>,
}

impl InputDecoder {
    pub fn new(profile: &DeviceProfile) -> Self {
        Self {
            channel_count: profile.channel_count,
            fader_cc_offset: profile.fader_cc_offset,
            mute_keys: profile.mute_keys,
            boost_keys: profile.boost_keys,
            master_mute_key: profile.master_mute_key,
        }
    }

    /// Decode a bulk frame: one byte per channel, master byte last
    ///
    /// Returns `None` for short frames or frames with non 7-bit bytes.
    pub fn decode_bulk(&self, frame: &[u8]) -> Option<Vec<MixerEvent>> {
        let needed = self.channel_count + 1;
        if frame.len() < needed {
            log::trace!("Decode: bulk frame too short ({} < {})", frame.len(), needed);
            return None;
        }
        let frame = &frame[..needed];
        if frame.iter().any(|&b| b > 127) {
            log::trace!("Decode: bulk frame has non 7-bit data");
            return None;
        }

        let (faders, master) = frame.split_at(self.channel_count);
        let mut events: Vec<MixerEvent> = faders
            .iter()
            .enumerate()
            .map(|(index, &raw)| MixerEvent::SetChannelValue {
                index,
                value: normalize_7bit(raw),
                from_fader: false,
            })
            .collect();
        events.push(MixerEvent::SetMaster(normalize_7bit(master[0])));
        Some(events)
    }

    /// Decode a single fader/knob move
    pub fn decode_control_change(&self, controller: u8, value: u8) -> Option<MixerEvent> {
        if value > 127 {
            return None;
        }
        let index = controller.checked_sub(self.fader_cc_offset)? as usize;
        let value = normalize_7bit(value);

        if index >= self.channel_count {
            Some(MixerEvent::SetMaster(value))
        } else {
            Some(MixerEvent::SetChannelValue {
                index,
                value,
                from_fader: true,
            })
        }
    }

    /// Decode a button press
    pub fn decode_button(&self, key: u8) -> Option<MixerEvent> {
        if self.master_mute_key == Some(key) {
            return Some(MixerEvent::ToggleMasterMute);
        }
        if let Some(index) = self.mute_keys.and_then(|r| r.offset_of(key)) {
            return Some(MixerEvent::ToggleMute(index));
        }
        if let Some(index) = self.boost_keys.and_then(|r| r.offset_of(key)) {
            return Some(MixerEvent::ToggleBoost(index));
        }
        None
    }
}
