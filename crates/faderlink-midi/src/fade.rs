//! Mute/unmute fade animation
//!
//! A fade walks the fader value between its captured level and zero in a
//! fixed number of timed steps, each on its own thread. Before every step the
//! loop re-checks the channel under its lock: if the mute flag flipped or a
//! newer fade started, it stops. Cancellation therefore takes effect within
//! one step interval and is never forced.

use crate::config::FadeConfig;
use crate::store::{ChannelCell, ChannelState};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeDirection {
    ToMute,
    ToUnmute,
}

impl FadeDirection {
    /// Mute flag value for which a fade in this direction stays valid
    pub fn mutes(self) -> bool {
        matches!(self, Self::ToMute)
    }

    /// Fader value at `step` (0-based) of a `steps`-long fade
    ///
    /// The first step of a mute holds `level`, its last is exactly zero; an
    /// unmute mirrors that and ends exactly on `level`.
    pub fn step_value(self, level: f32, step: u32, steps: u32) -> f32 {
        let progress = if steps <= 1 {
            1.0
        } else {
            step.min(steps - 1) as f32 / (steps - 1) as f32
        };
        match self {
            Self::ToMute => level * (1.0 - progress),
            Self::ToUnmute => level * progress,
        }
    }
}

/// Every value a full fade passes through
pub fn fade_values(direction: FadeDirection, level: f32, steps: u32) -> impl Iterator<Item = f32> {
    (0..steps.max(1)).map(move |step| direction.step_value(level, step, steps.max(1)))
}

/// One scheduled fade
#[derive(Debug, Clone, Copy)]
pub(crate) struct Fade {
    pub direction: FadeDirection,
    /// Restore value the fade starts from or heads to
    pub level: f32,
    pub generation: u64,
}

/// Run a fade on a dedicated thread
///
/// `emit` is called with the channel lock held after every applied step.
pub(crate) fn spawn_fade<E>(
    cell: Arc<ChannelCell>,
    fade: Fade,
    timing: FadeConfig,
    emit: E,
) -> std::io::Result<JoinHandle<()>>
where
    E: Fn(&ChannelCell, &ChannelState) + Send + 'static,
{
    thread::Builder::new()
        .name(format!("fade-{}", cell.index()))
        .spawn(move || run_fade(&cell, fade, timing, emit))
}

/// Step loop shared by the fade thread and the synchronous fallback
pub(crate) fn run_fade<E>(cell: &ChannelCell, fade: Fade, timing: FadeConfig, emit: E)
where
    E: Fn(&ChannelCell, &ChannelState),
{
    let steps = timing.steps.max(1);

    for step in 0..steps {
        {
            let mut state = cell.lock();
            if !state.fade_is_current(fade.generation, fade.direction.mutes()) {
                log::debug!(
                    "Fade: channel {} {:?} stopped at step {}/{}",
                    cell.index(),
                    fade.direction,
                    step,
                    steps
                );
                return;
            }

            state.set_value(fade.direction.step_value(fade.level, step, steps));
            if step + 1 == steps {
                state.finish_fade(fade.generation);
            }
            emit(cell, &state);
        }

        if step + 1 < steps {
            thread::sleep(timing.interval());
        }
    }

    log::trace!("Fade: channel {} {:?} complete", cell.index(), fade.direction);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mute_fade_from_088() {
        let values: Vec<f32> = fade_values(FadeDirection::ToMute, 0.88, 12).collect();
        assert_eq!(values.len(), 12);
        assert_eq!(values[0], 0.88);
        assert_eq!(values[11], 0.0);
        for pair in values.windows(2) {
            assert!(pair[1] < pair[0], "{:?} not strictly decreasing", pair);
        }
    }

    #[test]
    fn test_unmute_fade_ends_on_level() {
        let values: Vec<f32> = fade_values(FadeDirection::ToUnmute, 0.88, 12).collect();
        assert_eq!(values.len(), 12);
        assert_eq!(values[0], 0.0);
        assert_eq!(values[11], 0.88);
        for pair in values.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn test_single_step_fade_jumps_to_target() {
        assert_eq!(FadeDirection::ToMute.step_value(0.5, 0, 1), 0.0);
        assert_eq!(FadeDirection::ToUnmute.step_value(0.5, 0, 1), 0.5);
    }

    #[test]
    fn test_run_fade_stops_on_stale_generation() {
        use crate::config::BridgeConfig;
        use crate::store::MixerStore;
        use std::sync::Mutex;

        let store = MixerStore::new(&BridgeConfig::default());
        let cell = store.channel(0).unwrap().clone();
        let (generation, level) = {
            let mut state = cell.lock();
            state.set_value(0.5);
            state.begin_mute()
        };
        // A newer fade supersedes this one before it runs
        cell.lock().begin_unmute();

        let emitted = Mutex::new(0);
        let fade = Fade { direction: FadeDirection::ToMute, level, generation };
        let timing = FadeConfig { steps: 4, interval_ms: 0 };
        run_fade(&cell, fade, timing, |_, _| *emitted.lock().unwrap() += 1);

        assert_eq!(*emitted.lock().unwrap(), 0);
        assert_eq!(cell.lock().value, 0.5);
    }
}
