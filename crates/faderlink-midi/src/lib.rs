//! MIDI control surface to audio mixer bridge
//!
//! This crate provides:
//! - Device-profile driven decoding of fader frames, fader moves and buttons
//! - A mixer state store with per-channel mute fades and master auto-mute
//! - Fader-to-gain mapping with a boost range
//! - Deduplicated LED bar-graph feedback
//! - A background sink worker that applies gains to audio-server sinks
//!
//! # Architecture
//!
//! ```text
//! MIDI Device → midir callback → decoder → flume channel → MixerEngine
//!                                                            ├→ SinkWorker → AudioSink
//!                                                            └→ LedRenderer → MIDI out
//! ```
//!
//! The midir callback only parses and decodes; all state changes happen on
//! the thread running [`SurfaceBridge::run`] and on the fade threads.

pub mod config;
pub mod curve;
pub mod decode;
pub mod engine;
pub mod fade;
pub mod feedback;
pub mod midi;
pub mod sink;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::{
    default_config_path, load_config, save_config, BridgeConfig, ChannelConfig, ConfigError,
    DeviceProfile, FadeConfig, KeyRange, LedLayout,
};
pub use curve::{GainRange, VolumeCurve};
pub use decode::{InputDecoder, MixerEvent};
pub use engine::{EngineOutputs, MixerEngine, MixerObserver};
pub use feedback::{LedCommand, LedOutput, LedRenderer, OutputError};
pub use midi::{MidiConnectionError, MidiInputHandler, MidiLedOutput};
pub use sink::{AudioSink, GainOutput, SinkError, SinkWorker};
pub use store::{ChannelPhase, ChannelSnapshot, MasterState};

use flume::{Receiver, Sender};
use std::sync::Arc;

/// Capacity of the controller → engine event queue
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Error type for bridge startup
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("MIDI connection error: {0}")]
    Connection(#[from] MidiConnectionError),

    #[error("MIDI output error: {0}")]
    Output(#[from] OutputError),
}

/// Asks a running bridge to shut down
#[derive(Clone)]
pub struct StopHandle(Sender<()>);

impl StopHandle {
    pub fn stop(&self) {
        // A full channel already carries a stop request
        let _ = self.0.try_send(());
    }
}

/// Why the event loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Stopped,
    InputClosed,
}

/// Apply controller events until a stop request or until the input closes
///
/// Events already queued when the stop arrives are still applied.
fn pump_events(
    engine: &MixerEngine,
    event_rx: &Receiver<Vec<MixerEvent>>,
    stop_rx: &Receiver<()>,
) -> LoopExit {
    loop {
        let next = flume::Selector::new()
            .recv(event_rx, |events| events.map_err(|_| LoopExit::InputClosed))
            .recv(stop_rx, |_| Err(LoopExit::Stopped))
            .wait();

        match next {
            Ok(events) => engine.handle_all(events),
            Err(exit) => {
                for events in event_rx.try_iter() {
                    engine.handle_all(events);
                }
                return exit;
            }
        }
    }
}

/// Let fades finish and turn the LEDs off
fn settle(engine: &MixerEngine) {
    engine.wait_for_fades();
    engine.clear_leds();
}

/// A connected control surface driving the mixer engine
///
/// Owns the MIDI input connection; the LED output lives inside the engine.
pub struct SurfaceBridge {
    engine: MixerEngine,
    event_rx: Receiver<Vec<MixerEvent>>,
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
    input: MidiInputHandler,
}

impl SurfaceBridge {
    /// Connect to the configured device and push the initial state
    ///
    /// Sends the device's init SysEx, which on the APC mini mk2 also makes it
    /// report every fader position in one bulk frame.
    pub fn connect(
        config: &BridgeConfig,
        gains: Arc<dyn GainOutput>,
        observer: Option<Arc<dyn MixerObserver>>,
    ) -> Result<Self, BridgeError> {
        config.validate()?;
        let device = &config.device;
        log::info!("MIDI: Connecting to '{}' (match: '{}')", device.name, device.port_match);

        let (event_tx, event_rx) = flume::bounded(EVENT_QUEUE_CAPACITY);
        let decoder = InputDecoder::new(device);
        let input = MidiInputHandler::connect(device, decoder, event_tx)?;

        let mut output = MidiLedOutput::new(midi::connect_output(&device.port_match)?);
        if !device.init_sysex.is_empty() {
            if let Err(e) = output.send_sysex(&device.init_sysex) {
                log::warn!("MIDI: Failed to send init SysEx: {}", e);
            }
        }

        let leds: Option<Box<dyn LedOutput>> = if device.led.is_some() {
            Some(Box::new(output))
        } else {
            None
        };
        let engine = MixerEngine::new(config, EngineOutputs { gains, leds, observer });
        engine.refresh_all();

        let (stop_tx, stop_rx) = flume::bounded(1);

        log::info!("MIDI: '{}' ready", device.name);
        Ok(Self {
            engine,
            event_rx,
            stop_tx,
            stop_rx,
            input,
        })
    }

    /// Handle to the engine, for driving it alongside the controller
    pub fn engine(&self) -> &MixerEngine {
        &self.engine
    }

    /// Handle that makes [`run`](Self::run) return, usable from any thread
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop_tx.clone())
    }

    /// Apply controller events until stopped
    ///
    /// On return the input port is closed, all fades have settled and the
    /// LEDs are cleared.
    pub fn run(self) {
        let Self {
            engine,
            event_rx,
            stop_tx: _stop_tx,
            stop_rx,
            input,
        } = self;

        log::info!("Bridge: event loop started");
        match pump_events(&engine, &event_rx, &stop_rx) {
            LoopExit::Stopped => log::info!("Bridge: stop requested, shutting down"),
            LoopExit::InputClosed => log::info!("Bridge: input disconnected, shutting down"),
        }

        drop(input);
        settle(&engine);
    }
}
