//! Recording fakes for the engine's outputs

use crate::engine::MixerObserver;
use crate::feedback::{LedCommand, LedOutput, OutputError};
use crate::sink::{AudioSink, GainOutput, SinkError};
use crate::store::{ChannelSnapshot, MasterState};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct LedLog {
    commands: Vec<LedCommand>,
    failing: bool,
}

/// LED output that records every message
#[derive(Clone, Default)]
pub struct RecordingLeds(Arc<Mutex<LedLog>>);

impl RecordingLeds {
    pub fn commands(&self) -> Vec<LedCommand> {
        self.0.lock().unwrap().commands.clone()
    }

    /// Return and forget everything recorded so far
    pub fn take(&self) -> Vec<LedCommand> {
        std::mem::take(&mut self.0.lock().unwrap().commands)
    }

    pub fn set_failing(&self, failing: bool) {
        self.0.lock().unwrap().failing = failing;
    }
}

impl LedOutput for RecordingLeds {
    fn send_led(&mut self, brightness: u8, index: u8, color: u8) -> Result<(), OutputError> {
        let mut log = self.0.lock().unwrap();
        if log.failing {
            return Err(OutputError::SendFailed("port closed".to_string()));
        }
        log.commands.push(LedCommand { brightness, index, color });
        Ok(())
    }

    fn send_sysex(&mut self, _payload: &[u8]) -> Result<(), OutputError> {
        Ok(())
    }
}

#[derive(Default)]
struct SinkLog {
    calls: Vec<(String, f32)>,
    failures: usize,
    failing: bool,
}

/// Audio sink that records applied volumes
#[derive(Clone, Default)]
pub struct RecordingSink(Arc<Mutex<SinkLog>>);

impl RecordingSink {
    pub fn calls(&self) -> Vec<(String, f32)> {
        self.0.lock().unwrap().calls.clone()
    }

    pub fn failures(&self) -> usize {
        self.0.lock().unwrap().failures
    }

    pub fn set_failing(&self, failing: bool) {
        self.0.lock().unwrap().failing = failing;
    }
}

impl AudioSink for RecordingSink {
    fn set_sink_volume(&mut self, sink: &str, gain: f32) -> Result<(), SinkError> {
        let mut log = self.0.lock().unwrap();
        if log.failing {
            log.failures += 1;
            return Err(SinkError::SetVolume {
                sink: sink.to_string(),
                reason: "no such sink".to_string(),
            });
        }
        log.calls.push((sink.to_string(), gain));
        Ok(())
    }
}

/// Synchronous gain output that records every gain handed over
#[derive(Clone, Default)]
pub struct RecordingGains(Arc<Mutex<Vec<(String, f32)>>>);

impl RecordingGains {
    pub fn last(&self, sink: &str) -> Option<f32> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(s, _)| s == sink)
            .map(|(_, gain)| *gain)
    }
}

impl GainOutput for RecordingGains {
    fn apply_gain(&self, sink: &str, gain: f32) {
        self.0.lock().unwrap().push((sink.to_string(), gain));
    }
}

/// Observer that records every snapshot
#[derive(Clone, Default)]
pub struct RecordingObserver {
    channels: Arc<Mutex<Vec<ChannelSnapshot>>>,
    masters: Arc<Mutex<Vec<MasterState>>>,
}

impl RecordingObserver {
    /// Snapshots of one channel in emission order
    pub fn channel(&self, index: usize) -> Vec<ChannelSnapshot> {
        self.channels
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.index == index)
            .copied()
            .collect()
    }

    pub fn masters(&self) -> Vec<MasterState> {
        self.masters.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.channels.lock().unwrap().clear();
        self.masters.lock().unwrap().clear();
    }
}

impl MixerObserver for RecordingObserver {
    fn channel_updated(&self, snapshot: &ChannelSnapshot) {
        self.channels.lock().unwrap().push(*snapshot);
    }

    fn master_updated(&self, master: &MasterState) {
        self.masters.lock().unwrap().push(*master);
    }
}
