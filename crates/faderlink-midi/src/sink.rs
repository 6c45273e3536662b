//! Audio sink plumbing
//!
//! The engine never talks to the audio server directly. It hands gains to a
//! [`GainOutput`]; in production that is a [`SinkWorker`], which keeps the
//! newest pending gain per sink and wakes a background thread owning the
//! [`AudioSink`] over a flume channel. A burst of fade steps therefore costs
//! one volume call, the final gain of a burst is never dropped, and gains
//! the sink already has are skipped.

use flume::{Receiver, Sender, TrySendError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

/// Error type for audio sink operations
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Audio server unreachable: {0}")]
    Unreachable(String),

    #[error("Failed to set volume of sink '{sink}': {reason}")]
    SetVolume { sink: String, reason: String },
}

/// Applies gain values to named audio-server sinks
pub trait AudioSink: Send + 'static {
    fn set_sink_volume(&mut self, sink: &str, gain: f32) -> Result<(), SinkError>;
}

/// Non-blocking gain destination used by the engine
pub trait GainOutput: Send + Sync {
    fn apply_gain(&self, sink: &str, gain: f32);
}

/// Gain change waiting for the worker
#[derive(Debug, Clone, PartialEq)]
struct GainUpdate {
    sink: String,
    gain: f32,
}

/// Newest gain per sink, in first-arrival order
#[derive(Default)]
struct PendingGains(Mutex<Vec<GainUpdate>>);

impl PendingGains {
    fn lock(&self) -> MutexGuard<'_, Vec<GainUpdate>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, sink: &str, gain: f32) {
        let mut pending = self.lock();
        match pending.iter_mut().find(|u| u.sink == sink) {
            Some(existing) => existing.gain = gain,
            None => pending.push(GainUpdate {
                sink: sink.to_string(),
                gain,
            }),
        }
    }

    fn take(&self) -> Vec<GainUpdate> {
        std::mem::take(&mut *self.lock())
    }
}

/// Background thread that owns the audio sink
pub struct SinkWorker {
    pending: Arc<PendingGains>,
    wake_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SinkWorker {
    /// Start the worker thread for `sink`
    pub fn spawn<S: AudioSink>(sink: S) -> std::io::Result<Self> {
        // One queued wake-up covers any number of pending gains
        let (wake_tx, wake_rx) = flume::bounded::<()>(1);
        let pending = Arc::new(PendingGains::default());

        let thread = {
            let pending = Arc::clone(&pending);
            std::thread::Builder::new()
                .name("sink-worker".into())
                .spawn(move || Self::run(wake_rx, pending, sink))?
        };

        Ok(Self {
            pending,
            wake_tx: Some(wake_tx),
            thread: Some(thread),
        })
    }

    fn run<S: AudioSink>(wake_rx: Receiver<()>, pending: Arc<PendingGains>, mut sink: S) {
        let mut applied: HashMap<String, f32> = HashMap::new();

        log::info!("Sink worker started");

        loop {
            // Disconnect still drains what was queued before it
            let connected = wake_rx.recv().is_ok();

            for update in pending.take() {
                if applied.get(&update.sink) == Some(&update.gain) {
                    continue;
                }
                match sink.set_sink_volume(&update.sink, update.gain) {
                    Ok(()) => {
                        log::debug!("Sink: {} -> {:.3}", update.sink, update.gain);
                        applied.insert(update.sink, update.gain);
                    }
                    Err(e) => {
                        log::warn!("Sink: {}", e);
                        applied.remove(&update.sink);
                    }
                }
            }

            if !connected {
                break;
            }
        }

        log::info!("Sink worker: channel disconnected, shutting down");
    }

    /// Stop accepting gains, apply everything still pending, and join the thread
    pub fn shutdown(mut self) {
        self.wake_tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Sink worker panicked");
            }
        }
    }
}

impl GainOutput for SinkWorker {
    fn apply_gain(&self, sink: &str, gain: f32) {
        let Some(ref tx) = self.wake_tx else {
            return;
        };
        self.pending.push(sink, gain);
        match tx.try_send(()) {
            // A full channel means a wake-up is already queued
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                log::warn!("Sink: worker is gone, dropping gain for '{}'", sink);
            }
        }
    }
}
