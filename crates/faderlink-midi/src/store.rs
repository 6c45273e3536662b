//! Mixer state store
//!
//! One cell per bound fader position, each behind its own mutex, plus the
//! master state behind another. Fade threads and the event loop share the
//! store through `Arc`; nothing here is global.
//!
//! Lock order is channel → master. Code holding the master lock must release
//! it before touching any channel.

use crate::config::{BridgeConfig, ChannelConfig};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

/// Where a channel is in its mute/unmute cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelPhase {
    #[default]
    Active,
    FadingToMute,
    Muted,
    FadingToUnmute,
}

/// Mutable per-channel state
#[derive(Debug, Clone, Default)]
pub struct ChannelState {
    /// Fader value, always within 0.0-1.0
    pub value: f32,
    pub muted: bool,
    pub boosted: bool,
    /// Fader value captured when the mute started, taken by the next unmute
    pub restore: Option<f32>,
    pub phase: ChannelPhase,
    /// Bumped whenever a fade starts or is cancelled
    pub(crate) generation: u64,
}

impl ChannelState {
    /// Set the fader value, clamped to 0.0-1.0
    pub fn set_value(&mut self, value: f32) {
        self.value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
    }

    /// Enter FadingToMute, capturing the restore value
    ///
    /// Returns the fade generation and the captured level.
    pub(crate) fn begin_mute(&mut self) -> (u64, f32) {
        let level = self.value;
        self.restore = Some(level);
        self.muted = true;
        self.phase = ChannelPhase::FadingToMute;
        self.generation += 1;
        (self.generation, level)
    }

    /// Enter FadingToUnmute, consuming the restore value
    pub(crate) fn begin_unmute(&mut self) -> (u64, f32) {
        let level = self.restore.take().unwrap_or(self.value);
        self.muted = false;
        self.phase = ChannelPhase::FadingToUnmute;
        self.generation += 1;
        (self.generation, level)
    }

    /// Drop any mute and fade in favour of a direct fader value
    pub(crate) fn override_value(&mut self, value: f32) {
        if self.muted || self.phase != ChannelPhase::Active {
            self.generation += 1;
        }
        self.muted = false;
        self.restore = None;
        self.phase = ChannelPhase::Active;
        self.set_value(value);
    }

    /// Whether the fade identified by `generation` may keep stepping
    pub(crate) fn fade_is_current(&self, generation: u64, muting: bool) -> bool {
        self.generation == generation && self.muted == muting
    }

    /// Settle the phase after a fade ran all its steps
    pub(crate) fn finish_fade(&mut self, generation: u64) {
        if self.generation != generation {
            return;
        }
        self.phase = if self.muted {
            ChannelPhase::Muted
        } else {
            ChannelPhase::Active
        };
    }
}

/// A bound fader position and its state
pub struct ChannelCell {
    pub config: ChannelConfig,
    state: Mutex<ChannelState>,
    /// Fade threads that may still be stepping
    fade_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChannelCell {
    fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ChannelState::default()),
            fade_tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn index(&self) -> usize {
        self.config.index
    }

    /// Lock this channel's state
    ///
    /// A panic on another thread never leaves the state half-written, so a
    /// poisoned lock is simply reclaimed.
    pub fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Keep a fade thread handle, dropping handles of finished fades
    pub(crate) fn track_fade(&self, handle: JoinHandle<()>) {
        let mut tasks = self.fade_tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Wait for every fade thread of this channel to exit
    pub(crate) fn join_fades(&self) {
        let tasks: Vec<JoinHandle<()>> = self
            .fade_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            if task.join().is_err() {
                log::error!("Fade: channel {} fade thread panicked", self.index());
            }
        }
    }

    /// Level shown on the LEDs and fed into the gain curve
    pub fn display_value(&self, state: &ChannelState, master: f32) -> f32 {
        if self.config.ignore_master {
            state.value
        } else {
            state.value * master
        }
    }
}

/// Master scalar and the mic auto-mute bookkeeping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MasterState {
    pub scalar: f32,
    /// The mic was muted because master reached zero
    pub mic_muted_by_master: bool,
    /// Level restored by a master mute toggle
    pub last_nonzero: f32,
}

impl Default for MasterState {
    fn default() -> Self {
        Self {
            scalar: 1.0,
            mic_muted_by_master: false,
            last_nonzero: 1.0,
        }
    }
}

/// Read-only view of one channel after a recompute
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSnapshot {
    pub index: usize,
    pub value: f32,
    pub display: f32,
    pub gain: f32,
    pub muted: bool,
    pub boosted: bool,
    pub phase: ChannelPhase,
}

/// Owned store of all channel and master state
pub struct MixerStore {
    /// Indexed by fader position; `None` for unbound positions
    slots: Vec<Option<Arc<ChannelCell>>>,
    master: Mutex<MasterState>,
}

impl MixerStore {
    pub fn new(config: &BridgeConfig) -> Self {
        let mut slots: Vec<Option<Arc<ChannelCell>>> = vec![None; config.device.channel_count];
        for channel in &config.channels {
            if let Some(slot) = slots.get_mut(channel.index) {
                *slot = Some(Arc::new(ChannelCell::new(channel.clone())));
            }
        }
        Self {
            slots,
            master: Mutex::new(MasterState::default()),
        }
    }

    /// Cell for a fader position, if it is bound to a sink
    pub fn channel(&self, index: usize) -> Option<&Arc<ChannelCell>> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// All bound channels in fader order
    pub fn channels(&self) -> impl Iterator<Item = &Arc<ChannelCell>> {
        self.slots.iter().flatten()
    }

    /// Current master state
    pub fn master(&self) -> MasterState {
        *self.lock_master()
    }

    /// Mutate master state; the closure must not touch any channel
    pub fn update_master<R>(&self, f: impl FnOnce(&mut MasterState) -> R) -> R {
        f(&mut self.lock_master())
    }

    fn lock_master(&self) -> MutexGuard<'_, MasterState> {
        self.master.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
