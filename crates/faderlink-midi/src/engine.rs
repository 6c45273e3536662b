//! Mixer synchronization engine
//!
//! Applies decoded [`MixerEvent`]s to the [`MixerStore`] and mirrors every
//! change to the audio sinks and the controller LEDs. All outbound work for a
//! channel happens in [`EngineShared::emit`], which runs with that channel's
//! lock held, so gains and LEDs leave in the same order the state changed in.
//! Fade threads call the same path after each step.

use crate::config::{BridgeConfig, FadeConfig};
use crate::curve::VolumeCurve;
use crate::decode::MixerEvent;
use crate::fade::{self, Fade, FadeDirection};
use crate::feedback::{LedOutput, LedRenderer};
use crate::sink::GainOutput;
use crate::store::{ChannelCell, ChannelSnapshot, ChannelState, MasterState, MixerStore};
use std::sync::Arc;

/// Receives a snapshot after every recompute
///
/// Used by the binary for logging; any text rendering of mixer state would
/// hang off this too.
pub trait MixerObserver: Send + Sync {
    fn channel_updated(&self, snapshot: &ChannelSnapshot);

    fn master_updated(&self, _master: &MasterState) {}
}

/// Where the engine sends its results
pub struct EngineOutputs {
    pub gains: Arc<dyn GainOutput>,
    /// `None` for controllers without LED feedback
    pub leds: Option<Box<dyn LedOutput>>,
    pub observer: Option<Arc<dyn MixerObserver>>,
}

/// What a master change does to the mic channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MicAction {
    None,
    MuteIfActive,
    Unmute,
}

struct EngineShared {
    store: MixerStore,
    curve: VolumeCurve,
    fade: FadeConfig,
    mic_channel: Option<usize>,
    fader_move_unmutes: bool,
    renderer: Option<LedRenderer>,
    gains: Arc<dyn GainOutput>,
    observer: Option<Arc<dyn MixerObserver>>,
}

impl EngineShared {
    /// Recompute gain and LEDs for a locked channel and send them out
    fn emit(&self, cell: &ChannelCell, state: &ChannelState) -> ChannelSnapshot {
        // channel → master lock order
        let master = self.store.master().scalar;
        let display = cell.display_value(state, master);
        let gain = if state.muted { 0.0 } else { self.curve.gain(display, state.boosted) };

        self.gains.apply_gain(&cell.config.sink, gain);
        if let Some(ref renderer) = self.renderer {
            renderer.render_channel(&cell.config, display, state.muted);
        }

        let snapshot = ChannelSnapshot {
            index: cell.index(),
            value: state.value,
            display,
            gain,
            muted: state.muted,
            boosted: state.boosted,
            phase: state.phase,
        };
        if let Some(ref observer) = self.observer {
            observer.channel_updated(&snapshot);
        }
        snapshot
    }

    fn refresh(&self, cell: &ChannelCell) -> ChannelSnapshot {
        let state = cell.lock();
        self.emit(cell, &state)
    }

    fn is_mic(&self, index: usize) -> bool {
        self.mic_channel == Some(index)
    }
}

/// Handle to the synchronization engine
///
/// Cheap to clone; clones share one store.
#[derive(Clone)]
pub struct MixerEngine {
    shared: Arc<EngineShared>,
}

impl MixerEngine {
    pub fn new(config: &BridgeConfig, outputs: EngineOutputs) -> Self {
        let renderer = match (config.device.led.clone(), outputs.leds) {
            (Some(layout), Some(leds)) => Some(LedRenderer::new(layout, config.device.boost_keys, leds)),
            _ => None,
        };

        Self {
            shared: Arc::new(EngineShared {
                store: MixerStore::new(config),
                curve: config.curve,
                fade: config.fade,
                mic_channel: config.mic_channel,
                fader_move_unmutes: config.fader_move_unmutes,
                renderer,
                gains: outputs.gains,
                observer: outputs.observer,
            }),
        }
    }

    /// Apply one decoded event
    pub fn handle(&self, event: MixerEvent) {
        log::debug!("Engine: {:?}", event);
        match event {
            MixerEvent::SetChannelValue { index, value, from_fader } => {
                self.set_channel_value(index, value, from_fader)
            }
            MixerEvent::SetMaster(value) => self.set_master(value),
            MixerEvent::ToggleMute(index) => self.toggle_mute(index),
            MixerEvent::ToggleBoost(index) => self.toggle_boost(index),
            MixerEvent::ToggleMasterMute => self.toggle_master_mute(),
        }
    }

    /// Apply a batch of events in order, such as one bulk frame
    pub fn handle_all(&self, events: impl IntoIterator<Item = MixerEvent>) {
        for event in events {
            self.handle(event);
        }
    }

    /// Set a channel's fader value
    ///
    /// A physical fader move also clears the channel's mute when configured
    /// to, cancelling any fade in progress.
    pub fn set_channel_value(&self, index: usize, value: f32, from_fader: bool) {
        let Some(cell) = self.shared.store.channel(index) else {
            log::trace!("Engine: fader {} is not bound", index);
            return;
        };

        let mut state = cell.lock();
        if from_fader && self.shared.fader_move_unmutes {
            let was_muted = state.muted;
            state.override_value(value);
            if was_muted && self.shared.is_mic(index) {
                self.shared.store.update_master(|m| m.mic_muted_by_master = false);
            }
        } else {
            state.set_value(value);
        }
        self.shared.emit(cell, &state);
    }

    /// Toggle a channel's mute, starting the matching fade
    pub fn toggle_mute(&self, index: usize) {
        let Some(cell) = self.shared.store.channel(index) else {
            log::trace!("Engine: mute for unbound channel {}", index);
            return;
        };

        // A button press takes the mic out of master's hands
        if self.shared.is_mic(index) {
            self.shared.store.update_master(|m| m.mic_muted_by_master = false);
        }

        let fade = {
            let mut state = cell.lock();
            if state.muted {
                let (generation, level) = state.begin_unmute();
                Fade { direction: FadeDirection::ToUnmute, level, generation }
            } else {
                let (generation, level) = state.begin_mute();
                Fade { direction: FadeDirection::ToMute, level, generation }
            }
        };
        log::info!("Engine: channel {} {:?} from {:.3}", index, fade.direction, fade.level);
        self.start_fade(cell, fade);
    }

    /// Toggle a channel between the normal and boosted gain range
    pub fn toggle_boost(&self, index: usize) {
        let Some(cell) = self.shared.store.channel(index) else {
            log::trace!("Engine: boost for unbound channel {}", index);
            return;
        };

        let mut state = cell.lock();
        state.boosted = !state.boosted;
        log::info!("Engine: channel {} boost {}", index, if state.boosted { "on" } else { "off" });
        self.shared.emit(cell, &state);
        if let Some(ref renderer) = self.shared.renderer {
            renderer.render_boost(index, state.boosted);
        }
    }

    /// Set the master scalar
    ///
    /// Reaching zero mutes the mic channel on master's behalf; leaving zero
    /// undoes exactly that mute and nothing the user did.
    pub fn set_master(&self, value: f32) {
        let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };

        let (action, master) = self.shared.store.update_master(|m| {
            let was_zero = m.scalar == 0.0;
            m.scalar = value;
            if value > 0.0 {
                m.last_nonzero = value;
            }

            let action = if value == 0.0 && !was_zero {
                MicAction::MuteIfActive
            } else if value > 0.0 && was_zero && m.mic_muted_by_master {
                m.mic_muted_by_master = false;
                MicAction::Unmute
            } else {
                MicAction::None
            };
            (action, *m)
        });

        if let Some(ref observer) = self.shared.observer {
            observer.master_updated(&master);
        }

        if let Some(mic) = self.shared.mic_channel.and_then(|i| self.shared.store.channel(i)) {
            match action {
                MicAction::MuteIfActive => self.master_mute_mic(mic),
                MicAction::Unmute => self.master_unmute_mic(mic),
                MicAction::None => {}
            }
        }

        for cell in self.shared.store.channels() {
            if !cell.config.ignore_master {
                self.shared.refresh(cell);
            }
        }
    }

    /// Toggle master between zero and its last non-zero level
    pub fn toggle_master_mute(&self) {
        let master = self.shared.store.master();
        let target = if master.scalar > 0.0 { 0.0 } else { master.last_nonzero };
        self.set_master(target);
    }

    fn master_mute_mic(&self, mic: &Arc<ChannelCell>) {
        let fade = {
            let mut state = mic.lock();
            if state.muted {
                log::debug!("Engine: master at zero, mic already muted by user");
                return;
            }
            let (generation, level) = state.begin_mute();
            // channel → master lock order
            self.shared.store.update_master(|m| m.mic_muted_by_master = true);
            Fade { direction: FadeDirection::ToMute, level, generation }
        };
        log::info!("Engine: master at zero, muting mic channel {}", mic.index());
        self.start_fade(mic, fade);
    }

    fn master_unmute_mic(&self, mic: &Arc<ChannelCell>) {
        let fade = {
            let mut state = mic.lock();
            if !state.muted {
                return;
            }
            let (generation, level) = state.begin_unmute();
            Fade { direction: FadeDirection::ToUnmute, level, generation }
        };
        log::info!("Engine: master raised, unmuting mic channel {}", mic.index());
        self.start_fade(mic, fade);
    }

    fn start_fade(&self, cell: &Arc<ChannelCell>, fade: Fade) {
        let shared = Arc::clone(&self.shared);
        let emit = move |cell: &ChannelCell, state: &ChannelState| {
            shared.emit(cell, state);
        };

        match fade::spawn_fade(Arc::clone(cell), fade, self.shared.fade, emit) {
            Ok(handle) => cell.track_fade(handle),
            Err(e) => {
                log::error!("Fade: failed to spawn fade thread: {}, jumping to target", e);
                let jump = FadeConfig { steps: 1, interval_ms: 0 };
                fade::run_fade(cell, fade, jump, |cell, state| {
                    self.shared.emit(cell, state);
                });
            }
        }
    }

    /// Push the full current state to sinks and LEDs
    pub fn refresh_all(&self) {
        for cell in self.shared.store.channels() {
            let state = cell.lock();
            self.shared.emit(cell, &state);
            if let Some(ref renderer) = self.shared.renderer {
                renderer.render_boost(cell.index(), state.boosted);
            }
        }
    }

    /// Current view of one channel, without emitting anything
    pub fn snapshot(&self, index: usize) -> Option<ChannelSnapshot> {
        let cell = self.shared.store.channel(index)?;
        let state = cell.lock();
        let display = cell.display_value(&state, self.shared.store.master().scalar);
        let gain = if state.muted { 0.0 } else { self.shared.curve.gain(display, state.boosted) };
        Some(ChannelSnapshot {
            index,
            value: state.value,
            display,
            gain,
            muted: state.muted,
            boosted: state.boosted,
            phase: state.phase,
        })
    }

    pub fn master(&self) -> MasterState {
        self.shared.store.master()
    }

    /// Block until every running fade has finished or stopped
    pub fn wait_for_fades(&self) {
        for cell in self.shared.store.channels() {
            cell.join_fades();
        }
    }

    /// Turn off every LED the engine has lit
    pub fn clear_leds(&self) {
        if let Some(ref renderer) = self.shared.renderer {
            renderer.clear_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::store::ChannelPhase;
    use crate::testing::{RecordingGains, RecordingLeds, RecordingObserver};
    use std::thread;
    use std::time::Duration;

    struct Harness {
        engine: MixerEngine,
        gains: RecordingGains,
        leds: RecordingLeds,
        observer: RecordingObserver,
    }

    fn harness_with(config: BridgeConfig) -> Harness {
        let _ = env_logger::builder().is_test(true).try_init();
        let gains = RecordingGains::default();
        let leds = RecordingLeds::default();
        let observer = RecordingObserver::default();
        let engine = MixerEngine::new(
            &config,
            EngineOutputs {
                gains: Arc::new(gains.clone()),
                leds: Some(Box::new(leds.clone())),
                observer: Some(Arc::new(observer.clone())),
            },
        );
        Harness { engine, gains, leds, observer }
    }

    fn harness() -> Harness {
        harness_with(BridgeConfig::default())
    }

    /// Default layout with a short fade so tests stay quick
    fn fast_config() -> BridgeConfig {
        BridgeConfig {
            fade: FadeConfig { steps: 12, interval_ms: 1 },
            ..BridgeConfig::default()
        }
    }

    #[test]
    fn test_bulk_frame_scenario() {
        let h = harness();
        let decoder = crate::decode::InputDecoder::new(&BridgeConfig::default().device);
        h.engine.handle_all(decoder.decode_bulk(&[64, 0, 0, 0, 0, 0, 0, 0, 100]).unwrap());

        let ch0 = h.engine.snapshot(0).unwrap();
        assert!((ch0.value - 64.0 / 127.0).abs() < 1e-6);
        assert!((h.engine.master().scalar - 100.0 / 127.0).abs() < 1e-6);
        assert!((ch0.gain - 0.527).abs() < 1e-3);
        assert!((h.gains.last("general-output").unwrap() - 0.527).abs() < 1e-3);

        for index in [1, 2, 7] {
            assert_eq!(h.engine.snapshot(index).unwrap().value, 0.0);
        }
        assert_eq!(h.gains.last("discord-output"), Some(0.0));
    }

    #[test]
    fn test_boost_full_fader_is_exact() {
        let h = harness();
        h.engine.set_channel_value(2, 1.0, true);
        h.engine.toggle_boost(2);

        assert_eq!(h.engine.snapshot(2).unwrap().gain, 5.00);
        assert_eq!(h.gains.last("tidal-output"), Some(5.00));
        // Boost key 102 lit
        assert!(h.leds.commands().contains(&crate::feedback::LedCommand {
            brightness: 0,
            index: 102,
            color: 127
        }));

        h.engine.toggle_boost(2);
        assert_eq!(h.gains.last("tidal-output"), Some(1.10));
    }

    #[test]
    fn test_identical_recompute_sends_no_leds() {
        let h = harness();
        h.engine.set_channel_value(0, 0.5, true);
        let first = h.leds.take();
        assert!(!first.is_empty());

        h.engine.set_channel_value(0, 0.5, true);
        assert!(h.leds.take().is_empty());

        // Same bar level, slightly different value
        h.engine.set_channel_value(0, 0.51, true);
        assert!(h.leds.take().is_empty());
    }

    #[test]
    fn test_mute_fade_steps() {
        let h = harness_with(fast_config());
        h.engine.set_channel_value(0, 0.88, true);
        h.observer.clear();

        h.engine.toggle_mute(0);
        h.engine.wait_for_fades();

        let steps = h.observer.channel(0);
        assert_eq!(steps.len(), 12);
        assert_eq!(steps[0].value, 0.88);
        for pair in steps.windows(2) {
            assert!(pair[1].value < pair[0].value);
        }
        let last = steps.last().unwrap();
        assert_eq!(last.value, 0.0);
        assert_eq!(last.phase, ChannelPhase::Muted);
        // Muted channels are silent from the first step on
        assert!(steps.iter().all(|s| s.muted && s.gain == 0.0));
        assert_eq!(h.gains.last("general-output"), Some(0.0));
    }

    #[test]
    fn test_unmute_restores_exact_value() {
        let h = harness_with(fast_config());
        h.engine.set_channel_value(0, 0.88, true);
        h.engine.toggle_mute(0);
        h.engine.wait_for_fades();
        h.observer.clear();

        h.engine.toggle_mute(0);
        h.engine.wait_for_fades();

        let steps = h.observer.channel(0);
        assert_eq!(steps.len(), 12);
        assert_eq!(steps[0].value, 0.0);
        assert_eq!(steps[11].value, 0.88);
        assert_eq!(steps[11].phase, ChannelPhase::Active);
        assert!(!steps[11].muted);
        assert_eq!(h.engine.snapshot(0).unwrap().value, 0.88);
    }

    #[test]
    fn test_unmute_cancels_mute_fade() {
        // Long enough steps that the unmute lands mid-fade
        let config = BridgeConfig {
            fade: FadeConfig { steps: 12, interval_ms: 25 },
            ..BridgeConfig::default()
        };
        let h = harness_with(config);
        h.engine.set_channel_value(0, 0.88, true);
        h.observer.clear();

        h.engine.toggle_mute(0);
        thread::sleep(Duration::from_millis(60));
        let muted_before_unmute = h.observer.channel(0).iter().filter(|s| s.muted).count();
        h.engine.toggle_mute(0);
        h.engine.wait_for_fades();

        let steps = h.observer.channel(0);
        let mute_steps: Vec<_> = steps.iter().filter(|s| s.muted).collect();
        assert!(!mute_steps.is_empty());
        assert!(mute_steps.len() < 12, "mute fade ran {} steps", mute_steps.len());
        // The mute fade stops within one step of the unmute
        assert!(
            mute_steps.len() <= muted_before_unmute + 1,
            "{} mute steps after the unmute",
            mute_steps.len() - muted_before_unmute
        );

        // Once unmuted, the value only ever climbs back to the restore point
        let unmute_steps: Vec<_> = steps.iter().skip_while(|s| s.muted).collect();
        assert!(unmute_steps.iter().all(|s| !s.muted));
        assert_eq!(unmute_steps.len(), 12);
        assert_eq!(unmute_steps.last().unwrap().value, 0.88);
    }

    #[test]
    fn test_rapid_toggles_leave_one_effective_fade() {
        let config = BridgeConfig {
            fade: FadeConfig { steps: 12, interval_ms: 5 },
            ..BridgeConfig::default()
        };
        let h = harness_with(config);
        h.engine.set_channel_value(1, 0.6, true);

        h.engine.toggle_mute(1);
        h.engine.toggle_mute(1);
        h.engine.toggle_mute(1);
        h.engine.wait_for_fades();

        let snapshot = h.engine.snapshot(1).unwrap();
        assert!(snapshot.muted);
        assert_eq!(snapshot.phase, ChannelPhase::Muted);
        assert_eq!(snapshot.value, 0.0);
    }

    #[test]
    fn test_fader_move_unmutes() {
        let h = harness_with(fast_config());
        h.engine.set_channel_value(0, 0.7, true);
        h.engine.toggle_mute(0);
        h.engine.wait_for_fades();

        h.engine.set_channel_value(0, 0.4, true);
        let snapshot = h.engine.snapshot(0).unwrap();
        assert!(!snapshot.muted);
        assert_eq!(snapshot.phase, ChannelPhase::Active);
        assert_eq!(snapshot.value, 0.4);

        // Bulk frames keep the mute
        h.engine.toggle_mute(0);
        h.engine.wait_for_fades();
        h.engine.set_channel_value(0, 0.9, false);
        assert!(h.engine.snapshot(0).unwrap().muted);
        assert_eq!(h.gains.last("general-output"), Some(0.0));
    }

    #[test]
    fn test_master_zero_auto_mutes_mic() {
        let h = harness_with(fast_config());
        h.engine.set_channel_value(7, 0.6, true);
        h.engine.set_master(0.5);

        h.engine.set_master(0.0);
        h.engine.wait_for_fades();
        let mic = h.engine.snapshot(7).unwrap();
        assert!(mic.muted);
        assert!(h.engine.master().mic_muted_by_master);

        h.engine.set_master(0.5);
        h.engine.wait_for_fades();
        let mic = h.engine.snapshot(7).unwrap();
        assert!(!mic.muted);
        assert_eq!(mic.value, 0.6);
        assert!(!h.engine.master().mic_muted_by_master);
    }

    #[test]
    fn test_user_muted_mic_survives_master_cycle() {
        let h = harness_with(fast_config());
        h.engine.set_channel_value(7, 0.6, true);
        h.engine.set_master(0.5);
        h.engine.toggle_mute(7);
        h.engine.wait_for_fades();

        h.engine.set_master(0.0);
        h.engine.wait_for_fades();
        assert!(!h.engine.master().mic_muted_by_master);

        h.engine.set_master(0.5);
        h.engine.wait_for_fades();
        assert!(h.engine.snapshot(7).unwrap().muted);
    }

    #[test]
    fn test_repeated_zero_master_is_not_a_transition() {
        let h = harness_with(fast_config());
        h.engine.set_channel_value(7, 0.6, true);
        h.engine.set_master(0.0);
        h.engine.wait_for_fades();

        // Further zero frames must not recapture the (now zero) restore value
        h.engine.set_master(0.0);
        h.engine.set_master(0.0);
        h.engine.wait_for_fades();

        h.engine.set_master(1.0);
        h.engine.wait_for_fades();
        assert_eq!(h.engine.snapshot(7).unwrap().value, 0.6);
    }

    #[test]
    fn test_button_on_auto_muted_mic_hands_it_back_to_user() {
        let h = harness_with(fast_config());
        h.engine.set_channel_value(7, 0.6, true);
        h.engine.set_master(0.0);
        h.engine.wait_for_fades();

        // User unmutes, then mutes again while master is still zero
        h.engine.toggle_mute(7);
        h.engine.toggle_mute(7);
        h.engine.wait_for_fades();
        assert!(!h.engine.master().mic_muted_by_master);

        h.engine.set_master(0.8);
        h.engine.wait_for_fades();
        assert!(h.engine.snapshot(7).unwrap().muted);
    }

    #[test]
    fn test_master_scales_only_non_ignoring_channels() {
        let h = harness();
        h.engine.set_channel_value(0, 1.0, true);
        h.engine.set_channel_value(7, 1.0, true);

        h.engine.set_master(0.5);
        assert_eq!(h.engine.snapshot(0).unwrap().display, 0.5);
        assert_eq!(h.engine.snapshot(7).unwrap().display, 1.0);
        assert_eq!(h.gains.last("mic"), Some(1.10));

        let masters = h.observer.masters();
        assert_eq!(masters.last().unwrap().scalar, 0.5);
    }

    #[test]
    fn test_toggle_master_mute() {
        let h = harness_with(fast_config());
        h.engine.set_master(0.6);

        h.engine.toggle_master_mute();
        assert_eq!(h.engine.master().scalar, 0.0);
        h.engine.toggle_master_mute();
        assert_eq!(h.engine.master().scalar, 0.6);
        h.engine.wait_for_fades();
    }

    #[test]
    fn test_unbound_channels_are_ignored() {
        let h = harness();
        h.engine.set_channel_value(4, 0.5, true);
        h.engine.toggle_mute(4);
        h.engine.toggle_boost(4);
        assert!(h.engine.snapshot(4).is_none());
        assert!(h.leds.commands().is_empty());
    }

    #[test]
    fn test_refresh_all_paints_every_channel() {
        let h = harness();
        h.engine.refresh_all();

        // 4 bound columns of 8 LEDs plus their boost keys
        assert_eq!(h.leds.commands().len(), 4 * 8 + 4);
        h.engine.refresh_all();
        assert_eq!(h.leds.commands().len(), 4 * 8 + 4);

        h.engine.clear_leds();
        assert!(h.leds.take()[36..].iter().all(|c| c.brightness == 0 && c.color == 0));
    }

    #[test]
    fn test_engine_without_leds() {
        let mut config = BridgeConfig::default();
        config.device.led = None;
        config.channels = vec![ChannelConfig::new(0, "only", 1)];
        config.mic_channel = None;

        let gains = RecordingGains::default();
        let engine = MixerEngine::new(
            &config,
            EngineOutputs {
                gains: Arc::new(gains.clone()),
                leds: None,
                observer: None,
            },
        );
        engine.set_channel_value(0, 1.0, true);
        engine.set_master(0.0);
        engine.wait_for_fades();
        assert_eq!(gains.last("only"), Some(0.0));
    }
}
