use embassy_time::Instant;

use crate::{ButtonState, Error, InstantaneousState, TriggerMode};

/// Per-channel settings passed to [`TouchButtons::configure`](crate::TouchButtons::configure)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelConfig {
    /// Detection threshold in percent of the idle (calibration-time) reading
    pub threshold_percent: u8,
    /// Classified state the callback is registered under
    pub state: ButtonState,
    /// Edge of the classified state that runs the callback
    pub trigger: TriggerMode,
    /// Once a callback has run, suppress further callbacks on this channel until it is released
    pub wait_for_release: bool,
}

impl ChannelConfig {
    pub const fn new(threshold_percent: u8) -> Self {
        Self {
            threshold_percent,
            state: ButtonState::ShortPressed,
            trigger: TriggerMode::Rise,
            wait_for_release: true,
        }
    }

    pub const fn on(mut self, state: ButtonState) -> Self {
        self.state = state;
        self
    }

    pub const fn trigger(mut self, trigger: TriggerMode) -> Self {
        self.trigger = trigger;
        self
    }

    pub const fn wait_for_release(mut self, wait: bool) -> Self {
        self.wait_for_release = wait;
        self
    }

    pub(crate) fn check(&self) -> Result<(), Error> {
        if self.threshold_percent > 100 {
            return Err(Error::InvalidPercent(self.threshold_percent));
        }
        Ok(())
    }
}

/// State of one touch input.
///
/// A channel starts disabled with every field zeroed. It is only mutated by the
/// configuration operations and by the dispatcher of the driver that owns it.
pub struct Channel<C> {
    pub(crate) enabled: bool,
    pub(crate) threshold_percent: u8,
    pub(crate) threshold: u16,
    pub(crate) filtered_value: u16,
    pub(crate) instantaneous: InstantaneousState,
    pub(crate) press_started_at: Option<Instant>,
    pub(crate) state: ButtonState,
    pub(crate) trigger: TriggerMode,
    pub(crate) wait_for_release: bool,
    /// Set when a callback ran during the current press and `wait_for_release` holds
    pub(crate) awaiting_release: bool,
    pub(crate) callbacks: [Option<C>; 3],
}

impl<C> Channel<C> {
    pub fn new() -> Self {
        Self {
            enabled: false,
            threshold_percent: 0,
            threshold: 0,
            filtered_value: 0,
            instantaneous: InstantaneousState::NotPressed,
            press_started_at: None,
            state: ButtonState::NoPress,
            trigger: TriggerMode::Rise,
            wait_for_release: false,
            awaiting_release: false,
            callbacks: [None, None, None],
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn threshold_percent(&self) -> u8 {
        self.threshold_percent
    }

    /// Absolute threshold, a reading below it counts as pressed
    pub fn threshold(&self) -> u16 {
        self.threshold
    }

    /// Reading seen by the last calibration or tick
    pub fn filtered_value(&self) -> u16 {
        self.filtered_value
    }

    pub fn instantaneous_state(&self) -> InstantaneousState {
        self.instantaneous
    }

    pub fn press_started_at(&self) -> Option<Instant> {
        self.press_started_at
    }

    pub fn state(&self) -> ButtonState {
        self.state
    }

    pub fn trigger_mode(&self) -> TriggerMode {
        self.trigger
    }

    pub fn waits_for_release(&self) -> bool {
        self.wait_for_release
    }

    pub fn has_callback(&self, state: ButtonState) -> bool {
        state
            .slot()
            .map(|slot| self.callbacks[slot].is_some())
            .unwrap_or(false)
    }

    /// Enable the channel and install `callback` under `config.state`.
    ///
    /// The threshold is left alone until the next calibration.
    pub(crate) fn apply(&mut self, config: &ChannelConfig, callback: Option<C>) {
        self.enabled = true;
        self.threshold_percent = config.threshold_percent;
        self.trigger = config.trigger;
        self.wait_for_release = config.wait_for_release;
        self.state = ButtonState::NoPress;
        self.awaiting_release = false;
        if let Some(slot) = config.state.slot() {
            self.callbacks[slot] = callback;
        }
    }

    /// Back to the initial disabled state, dropping every callback
    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }

    /// Derive the absolute threshold from an idle `baseline` reading
    pub(crate) fn calibrate(&mut self, baseline: u16) -> u16 {
        self.filtered_value = baseline;
        self.threshold = threshold_from_baseline(baseline, self.threshold_percent);
        self.threshold
    }

    /// Run the callback registered for `state`, returning whether one ran
    pub(crate) fn invoke(&mut self, state: ButtonState) -> bool
    where
        C: FnMut(),
    {
        match state.slot().and_then(|slot| self.callbacks[slot].as_mut()) {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }
}

impl<C> Default for Channel<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// `baseline * percent / 100`, truncated toward zero
pub fn threshold_from_baseline(baseline: u16, percent: u8) -> u16 {
    // percent <= 100, so the result never exceeds the baseline
    (baseline as u32 * percent.min(100) as u32 / 100) as u16
}
