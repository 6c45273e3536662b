//! MIDI input handling
//!
//! Receives raw MIDI bytes from the midir callback, turns them into
//! [`MixerEvent`]s and hands them to the bridge loop over a flume channel.

use super::connection::{find_input_port, MidiConnectionError};
use crate::config::DeviceProfile;
use crate::decode::{InputDecoder, MixerEvent};
use flume::{Sender, TrySendError};
use midir::MidiInputConnection;

/// Raw controller message (before decoding into mixer events)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// Data bytes of a bulk fader SysEx reply, prefix and F7 stripped
    BulkFrame(Vec<u8>),
    /// Note On message
    NoteOn { channel: u8, note: u8, velocity: u8 },
    /// Note Off message
    NoteOff { channel: u8, note: u8, velocity: u8 },
    /// Control Change message
    ControlChange { channel: u8, cc: u8, value: u8 },
}

impl ControllerEvent {
    /// Parse raw MIDI bytes into an event
    ///
    /// MIDI message format:
    /// - Note Off: 0x8n nn vv (n=channel, nn=note, vv=velocity)
    /// - Note On: 0x9n nn vv
    /// - Control Change: 0xBn cc vv (cc=controller, vv=value)
    /// - SysEx: F0 .. F7, kept only when it starts with `bulk_prefix`
    pub fn parse(data: &[u8], bulk_prefix: Option<&[u8]>) -> Option<Self> {
        let status = *data.first()?;

        if status == 0xF0 {
            let prefix = bulk_prefix?;
            let payload = data.strip_prefix(prefix)?;
            let payload = payload.strip_suffix(&[0xF7]).unwrap_or(payload);
            return Some(Self::BulkFrame(payload.to_vec()));
        }

        let channel = status & 0x0F;
        match status & 0xF0 {
            0x80 if data.len() >= 3 => Some(Self::NoteOff {
                channel,
                note: data[1],
                velocity: data[2],
            }),
            // Note On with velocity 0 is a Note Off
            0x90 if data.len() >= 3 && data[2] == 0 => Some(Self::NoteOff {
                channel,
                note: data[1],
                velocity: 0,
            }),
            0x90 if data.len() >= 3 => Some(Self::NoteOn {
                channel,
                note: data[1],
                velocity: data[2],
            }),
            0xB0 if data.len() >= 3 => Some(Self::ControlChange {
                channel,
                cc: data[1],
                value: data[2],
            }),
            _ => None,
        }
    }

    /// Mixer events this message stands for
    ///
    /// Only key presses act; releases are ignored.
    pub fn decode(&self, decoder: &InputDecoder) -> Vec<MixerEvent> {
        match self {
            Self::BulkFrame(frame) => match decoder.decode_bulk(frame) {
                Some(events) => events,
                None => {
                    log::warn!("Decode: malformed bulk frame ({} bytes)", frame.len());
                    Vec::new()
                }
            },
            Self::ControlChange { cc, value, .. } => {
                decoder.decode_control_change(*cc, *value).into_iter().collect()
            }
            Self::NoteOn { note, .. } => decoder.decode_button(*note).into_iter().collect(),
            Self::NoteOff { .. } => Vec::new(),
        }
    }
}

/// Callback data passed to midir
struct CallbackData {
    decoder: InputDecoder,
    bulk_prefix: Option<Vec<u8>>,
    event_tx: Sender<Vec<MixerEvent>>,
}

/// MIDI input handler
///
/// Owns the midir connection; dropping it disconnects the port.
pub struct MidiInputHandler {
    _connection: MidiInputConnection<CallbackData>,
}

impl MidiInputHandler {
    /// Connect to the device's input port with our callback
    pub fn connect(
        profile: &DeviceProfile,
        decoder: InputDecoder,
        event_tx: Sender<Vec<MixerEvent>>,
    ) -> Result<Self, MidiConnectionError> {
        let (midi_in, port) = find_input_port(&profile.port_match)?;

        let callback_data = CallbackData {
            decoder,
            bulk_prefix: profile.bulk_frame_prefix.clone(),
            event_tx,
        };

        let connection = midi_in
            .connect(&port, "faderlink-input", Self::midi_callback, callback_data)
            .map_err(|e| MidiConnectionError::ConnectionError(e.to_string()))?;

        log::info!("MIDI: Input handler connected");

        Ok(Self {
            _connection: connection,
        })
    }

    /// The midir callback function
    ///
    /// Called from the MIDI driver thread whenever a message is received.
    /// Must be fast and non-blocking.
    fn midi_callback(_timestamp: u64, data: &[u8], callback_data: &mut CallbackData) {
        let Some(event) = ControllerEvent::parse(data, callback_data.bulk_prefix.as_deref()) else {
            log::trace!("MIDI: ignoring {:02X?}", data);
            return;
        };

        let events = event.decode(&callback_data.decoder);
        if events.is_empty() {
            return;
        }

        match callback_data.event_tx.try_send(events) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::warn!("MIDI: Event channel full, dropping message"),
            Err(TrySendError::Disconnected(_)) => log::debug!("MIDI: Event channel closed"),
        }
    }
}
