//! MIDI LED output
//!
//! Sends LED commands and SysEx to the controller over midir. Change
//! detection happens upstream in the renderer; everything handed to this
//! type goes out on the wire.

use crate::feedback::{LedOutput, OutputError};
use midir::MidiOutputConnection;

/// LED output over a MIDI output port
///
/// An LED command is a Note On whose channel nibble carries the brightness
/// code and whose velocity carries the palette color.
pub struct MidiLedOutput {
    connection: MidiOutputConnection,
}

/// Wire bytes of one LED command
pub fn led_message(brightness: u8, index: u8, color: u8) -> [u8; 3] {
    [0x90 | (brightness & 0x0F), index & 0x7F, color & 0x7F]
}

impl MidiLedOutput {
    pub fn new(connection: MidiOutputConnection) -> Self {
        Self { connection }
    }
}

impl LedOutput for MidiLedOutput {
    fn send_led(&mut self, brightness: u8, index: u8, color: u8) -> Result<(), OutputError> {
        log::debug!(
            "[MIDI OUT] LED idx={} brightness={} color={:#04x}",
            index, brightness, color
        );
        self.connection
            .send(&led_message(brightness, index, color))
            .map_err(|e| OutputError::SendFailed(e.to_string()))
    }

    fn send_sysex(&mut self, payload: &[u8]) -> Result<(), OutputError> {
        log::debug!("[MIDI OUT] SysEx {:02X?}", payload);
        self.connection
            .send(payload)
            .map_err(|e| OutputError::SendFailed(e.to_string()))
    }
}
