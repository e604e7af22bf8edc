//! The periodic dispatcher.
//!
//! [`TouchButtons`] owns the channel table and is driven by the application:
//! a timer, a main loop or a test calls [`TouchButtons::tick`] with the current
//! time. Each tick does, for every enabled channel in index order:
//!
//! 1. compare the latest filtered reading against the threshold (below means
//!    pressed, capacitance lowers the reading),
//! 2. on a continuing press, move the classified state up to the highest
//!    duration bucket reached; on release drop it back to `NoPress`,
//! 3. run at most one callback, selected by the channel's trigger mode and the
//!    change of classified state since the previous tick.
//!
//! Callbacks run synchronously inside `tick`. A slow callback delays the
//! remaining channels and possibly the next tick.

use embassy_time::{Duration, Instant};
use log::{debug, info, trace};

use crate::calibrate::calibrate_channels;
use crate::channel::{Channel, ChannelConfig};
use crate::feed::FilteredReadings;
use crate::{ButtonState, DispatchConfig, Error, InstantaneousState, TriggerMode};

/// A callback that ran during a tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ButtonEvent {
    pub channel: usize,
    /// State the callback was registered under
    pub state: ButtonState,
    pub trigger: TriggerMode,
}

/// Callbacks run by one tick, in channel order. At most one per channel.
pub type TickReport<const N: usize> = heapless::Vec<ButtonEvent, N>;

/// Snapshot of one enabled channel for inspection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelDiagnostics {
    pub channel: usize,
    pub filtered_value: u16,
    pub threshold: u16,
    pub instantaneous: InstantaneousState,
    pub state: ButtonState,
}

/// Touch button driver for `N` channels.
///
/// `C` is the callback type. Any `FnMut()` works: plain `fn()` items for
/// statically registered handlers, or `&mut dyn FnMut()` to mix closures.
pub struct TouchButtons<'r, C, const N: usize> {
    channels: [Channel<C>; N],
    readings: &'r FilteredReadings<N>,
    config: DispatchConfig,
    armed: bool,
    last_callback_at: Option<Instant>,
}

impl<'r, C: FnMut(), const N: usize> TouchButtons<'r, C, N> {
    /// Create a driver reading from `readings`, with every channel disabled and dispatch disarmed
    pub fn new(
        readings: &'r FilteredReadings<N>,
        config: Option<DispatchConfig>,
    ) -> Result<Self, Error> {
        let config = config.unwrap_or_default();
        config.validate()?;
        Ok(Self {
            channels: core::array::from_fn(|_| Channel::new()),
            readings,
            config,
            armed: false,
            last_callback_at: None,
        })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn readings(&self) -> &'r FilteredReadings<N> {
        self.readings
    }

    pub fn channel(&self, channel: usize) -> Result<&Channel<C>, Error> {
        self.channels
            .get(channel)
            .ok_or(Error::InvalidChannel { channel, count: N })
    }

    fn channel_mut(&mut self, channel: usize) -> Result<&mut Channel<C>, Error> {
        self.channels
            .get_mut(channel)
            .ok_or(Error::InvalidChannel { channel, count: N })
    }

    /// Enable `channel` and register `callback` under `config.state`.
    ///
    /// Registering again for the same state replaces the earlier callback; other
    /// states keep theirs, so one pad can carry e.g. a short and a long press
    /// handler. The threshold is only computed by the next calibration.
    pub fn configure(
        &mut self,
        channel: usize,
        config: ChannelConfig,
        callback: Option<C>,
    ) -> Result<(), Error> {
        config.check()?;
        if callback.is_some() && config.state == ButtonState::NoPress {
            return Err(Error::NoPressCallback);
        }
        let ch = self.channel_mut(channel)?;
        ch.apply(&config, callback);
        debug!(
            "touch: configured channel={} percent={} state={:?} trigger={:?} wait_for_release={}",
            channel, config.threshold_percent, config.state, config.trigger, config.wait_for_release
        );
        Ok(())
    }

    /// Return `channel` to its initial disabled state, dropping all its callbacks
    pub fn disable(&mut self, channel: usize) -> Result<(), Error> {
        self.channel_mut(channel)?.reset();
        debug!("touch: disabled channel={}", channel);
        Ok(())
    }

    pub fn disable_all(&mut self) {
        for channel in self.channels.iter_mut() {
            channel.reset();
        }
        debug!("touch: disabled all channels");
    }

    /// Recompute every enabled channel's threshold from the current readings.
    ///
    /// No channel may be touched while this runs.
    pub fn calibrate_all_thresholds(&mut self) {
        let baseline = self.readings.snapshot();
        self.calibrate_from_baseline(&baseline);
    }

    /// Recompute every enabled channel's threshold from an externally gathered
    /// idle baseline, e.g. the mean from a [`BaselineAccumulator`](crate::calibrate::BaselineAccumulator)
    pub fn calibrate_from_baseline(&mut self, baseline: &[u16; N]) {
        calibrate_channels(&mut self.channels, baseline);
    }

    /// Calibrate, then arm dispatch. Call once after all channels are configured.
    pub fn begin(&mut self) {
        self.calibrate_all_thresholds();
        self.enable_dispatch();
    }

    pub fn enable_dispatch(&mut self) {
        self.armed = true;
    }

    /// Stop dispatching without losing configuration or calibration
    pub fn disable_dispatch(&mut self) {
        self.armed = false;
    }

    pub fn is_dispatch_enabled(&self) -> bool {
        self.armed
    }

    /// Time since any callback last ran, `None` if none ever did
    pub fn time_since_last_callback(&self, now: Instant) -> Option<Duration> {
        self.last_callback_at
            .map(|at| now.saturating_duration_since(at))
    }

    /// Run one dispatch cycle at time `now`.
    ///
    /// Does nothing while dispatch is disarmed.
    pub fn tick(&mut self, now: Instant) -> TickReport<N> {
        let mut report = TickReport::new();
        if !self.armed {
            return report;
        }

        let readings = self.readings.snapshot();
        for (i, channel) in self.channels.iter_mut().enumerate() {
            if !channel.is_enabled() {
                continue;
            }

            let previous = update_button_state(i, channel, readings[i], now, &self.config);

            if let Some(state) = triggered_state(channel.trigger, previous, channel.state) {
                if !channel.awaiting_release {
                    debug!("touch: dispatching channel={} state={:?}", i, state);
                    if channel.invoke(state) {
                        self.last_callback_at = Some(now);
                        channel.awaiting_release = channel.wait_for_release;
                        // One entry per channel at most, the report can't overflow
                        let _ = report.push(ButtonEvent {
                            channel: i,
                            state,
                            trigger: channel.trigger,
                        });
                    }
                }
            }

            if channel.instantaneous == InstantaneousState::NotPressed {
                channel.awaiting_release = false;
            }
        }

        report
    }

    /// One record per enabled channel
    pub fn diagnostics(&self) -> impl Iterator<Item = ChannelDiagnostics> + '_ {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, channel)| channel.is_enabled())
            .map(|(i, channel)| ChannelDiagnostics {
                channel: i,
                filtered_value: self.readings.load(i).unwrap_or_default(),
                threshold: channel.threshold(),
                instantaneous: channel.instantaneous_state(),
                state: channel.state(),
            })
    }

    pub fn log_diagnostics(&self) {
        for d in self.diagnostics() {
            info!(
                "touch: channel={} value={} threshold={} contact={:?} state={:?}",
                d.channel, d.filtered_value, d.threshold, d.instantaneous, d.state
            );
        }
    }
}

/// Advance one channel's press state machine, returning the classified state
/// it had before this tick.
fn update_button_state<C>(
    index: usize,
    channel: &mut Channel<C>,
    reading: u16,
    now: Instant,
    config: &DispatchConfig,
) -> ButtonState {
    let previous = channel.state;
    let last = channel.instantaneous;
    let current = if reading < channel.threshold {
        InstantaneousState::Pressed
    } else {
        InstantaneousState::NotPressed
    };
    channel.filtered_value = reading;

    match (last, current) {
        (InstantaneousState::NotPressed, InstantaneousState::Pressed) => {
            channel.press_started_at = Some(now);
        }
        (InstantaneousState::Pressed, InstantaneousState::Pressed) => {
            let started = *channel.press_started_at.get_or_insert(now);
            let elapsed = now.saturating_duration_since(started);
            channel.state = channel.state.max(config.classify(elapsed));
        }
        (_, InstantaneousState::NotPressed) => {
            channel.state = ButtonState::NoPress;
            channel.press_started_at = None;
        }
    }
    channel.instantaneous = current;

    if previous != channel.state {
        trace!(
            "touch: channel={} {:?} -> {:?} reading={}",
            index,
            previous,
            channel.state,
            reading
        );
    }
    previous
}

/// State whose callback fires for a `previous` -> `current` change, if any
fn triggered_state(
    trigger: TriggerMode,
    previous: ButtonState,
    current: ButtonState,
) -> Option<ButtonState> {
    if previous == current {
        return None;
    }
    match trigger {
        TriggerMode::Rise if current != ButtonState::NoPress => Some(current),
        TriggerMode::Fall if current == ButtonState::NoPress => Some(previous),
        _ => None,
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::calibrate::BaselineAccumulator;
    use crate::CHANNEL_COUNT;
    use core::cell::Cell;

    type Callback<'a> = &'a mut dyn FnMut();

    const IDLE: u16 = 1000;
    const TOUCHED: u16 = 650;

    fn cb<'a>(f: &'a mut dyn FnMut()) -> Option<Callback<'a>> {
        Some(f)
    }

    fn ms(t: u64) -> Instant {
        Instant::from_millis(t)
    }

    fn idle_readings() -> FilteredReadings<CHANNEL_COUNT> {
        let readings = FilteredReadings::new();
        readings.store_all(&[IDLE; CHANNEL_COUNT]);
        readings
    }

    #[test]
    fn test_rise_short_press_scenario() {
        let readings = idle_readings();
        let hits = Cell::new(0u32);
        let mut on_short = || hits.set(hits.get() + 1);

        let mut buttons: TouchButtons<'_, Callback<'_>, CHANNEL_COUNT> =
            TouchButtons::new(&readings, None).unwrap();
        buttons
            .configure(3, ChannelConfig::new(70), cb(&mut on_short))
            .unwrap();
        buttons.calibrate_all_thresholds();
        assert_eq!(buttons.channel(3).unwrap().threshold(), 700);
        buttons.enable_dispatch();

        assert!(buttons.tick(ms(0)).is_empty());
        assert!(buttons.tick(ms(20)).is_empty());

        readings.store(3, TOUCHED);
        // Press begins
        assert!(buttons.tick(ms(40)).is_empty());
        assert_eq!(buttons.channel(3).unwrap().press_started_at(), Some(ms(40)));
        assert_eq!(buttons.channel(3).unwrap().state(), ButtonState::NoPress);
        assert!(buttons.tick(ms(60)).is_empty());
        assert!(buttons.tick(ms(80)).is_empty());
        assert_eq!(hits.get(), 0);

        // Third tick after the press began, 60 ms elapsed
        let report = buttons.tick(ms(100));
        assert_eq!(hits.get(), 1);
        assert_eq!(
            report.as_slice(),
            &[ButtonEvent {
                channel: 3,
                state: ButtonState::ShortPressed,
                trigger: TriggerMode::Rise,
            }]
        );

        // Staying in the same bucket doesn't fire again
        for t in (120..=280).step_by(20) {
            assert!(buttons.tick(ms(t)).is_empty());
        }
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_fall_short_press_scenario() {
        let readings = idle_readings();
        let hits = Cell::new(0u32);
        let mut on_short = || hits.set(hits.get() + 1);

        let mut buttons: TouchButtons<'_, Callback<'_>, CHANNEL_COUNT> =
            TouchButtons::new(&readings, None).unwrap();
        buttons
            .configure(
                3,
                ChannelConfig::new(70).trigger(TriggerMode::Fall),
                cb(&mut on_short),
            )
            .unwrap();
        buttons.begin();

        buttons.tick(ms(0));
        readings.store(3, TOUCHED);
        for t in [20, 40, 60, 80] {
            assert!(buttons.tick(ms(t)).is_empty());
        }
        assert_eq!(buttons.channel(3).unwrap().state(), ButtonState::ShortPressed);
        assert_eq!(hits.get(), 0);

        readings.store(3, IDLE);
        let report = buttons.tick(ms(100));
        assert_eq!(hits.get(), 1);
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].state, ButtonState::ShortPressed);
        assert_eq!(report[0].trigger, TriggerMode::Fall);

        assert!(buttons.tick(ms(120)).is_empty());
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_release_resets_on_same_tick() {
        let readings = idle_readings();
        let mut buttons: TouchButtons<'_, fn(), CHANNEL_COUNT> =
            TouchButtons::new(&readings, None).unwrap();
        buttons.configure(0, ChannelConfig::new(80), None).unwrap();
        buttons.begin();

        readings.store(0, TOUCHED);
        buttons.tick(ms(0));
        buttons.tick(ms(500));
        assert_eq!(buttons.channel(0).unwrap().state(), ButtonState::MediumPressed);

        readings.store(0, IDLE);
        buttons.tick(ms(520));
        let ch = buttons.channel(0).unwrap();
        assert_eq!(ch.instantaneous_state(), InstantaneousState::NotPressed);
        assert_eq!(ch.state(), ButtonState::NoPress);
        assert_eq!(ch.press_started_at(), None);
    }

    #[test]
    fn test_short_and_long_rise_without_wait_both_fire() {
        let readings = idle_readings();
        let short = Cell::new(0u32);
        let long = Cell::new(0u32);
        let mut on_short = || short.set(short.get() + 1);
        let mut on_long = || long.set(long.get() + 1);

        let mut buttons: TouchButtons<'_, Callback<'_>, CHANNEL_COUNT> =
            TouchButtons::new(&readings, None).unwrap();
        let config = ChannelConfig::new(80).wait_for_release(false);
        buttons.configure(1, config, cb(&mut on_short)).unwrap();
        buttons
            .configure(1, config.on(ButtonState::LongPressed), cb(&mut on_long))
            .unwrap();
        buttons.begin();

        readings.store(1, TOUCHED);
        let mut t = 0;
        while t <= 2100 {
            buttons.tick(ms(t));
            t += 20;
        }
        assert_eq!(short.get(), 1);
        assert_eq!(long.get(), 1);
    }

    #[test]
    fn test_wait_for_release_blocks_escalation() {
        let readings = idle_readings();
        let short = Cell::new(0u32);
        let long = Cell::new(0u32);
        let mut on_short = || short.set(short.get() + 1);
        let mut on_long = || long.set(long.get() + 1);

        let mut buttons: TouchButtons<'_, Callback<'_>, CHANNEL_COUNT> =
            TouchButtons::new(&readings, None).unwrap();
        let config = ChannelConfig::new(80);
        assert!(config.wait_for_release);
        buttons.configure(1, config, cb(&mut on_short)).unwrap();
        buttons
            .configure(1, config.on(ButtonState::LongPressed), cb(&mut on_long))
            .unwrap();
        buttons.begin();

        readings.store(1, TOUCHED);
        let mut t = 0;
        while t <= 2100 {
            buttons.tick(ms(t));
            t += 20;
        }
        assert_eq!(short.get(), 1);
        assert_eq!(long.get(), 0);

        // After a release the next press fires again
        readings.store(1, IDLE);
        buttons.tick(ms(2120));
        readings.store(1, TOUCHED);
        buttons.tick(ms(2140));
        buttons.tick(ms(2200));
        assert_eq!(short.get(), 2);
    }

    #[test]
    fn test_wait_for_release_ignores_unregistered_states() {
        let readings = idle_readings();
        let long = Cell::new(0u32);
        let mut on_long = || long.set(long.get() + 1);

        let mut buttons: TouchButtons<'_, Callback<'_>, CHANNEL_COUNT> =
            TouchButtons::new(&readings, None).unwrap();
        buttons
            .configure(
                2,
                ChannelConfig::new(80).on(ButtonState::LongPressed),
                cb(&mut on_long),
            )
            .unwrap();
        buttons.begin();

        readings.store(2, TOUCHED);
        let mut t = 0;
        while t <= 2100 {
            buttons.tick(ms(t));
            t += 20;
        }
        // Short and medium had no callback, so nothing latched before long
        assert_eq!(long.get(), 1);
    }

    #[test]
    fn test_fall_fires_only_reached_state() {
        let readings = idle_readings();
        let short = Cell::new(0u32);
        let long = Cell::new(0u32);
        let mut on_short = || short.set(short.get() + 1);
        let mut on_long = || long.set(long.get() + 1);

        let mut buttons: TouchButtons<'_, Callback<'_>, CHANNEL_COUNT> =
            TouchButtons::new(&readings, None).unwrap();
        let config = ChannelConfig::new(80).trigger(TriggerMode::Fall);
        buttons.configure(4, config, cb(&mut on_short)).unwrap();
        buttons
            .configure(4, config.on(ButtonState::LongPressed), cb(&mut on_long))
            .unwrap();
        buttons.begin();

        readings.store(4, TOUCHED);
        for t in [0, 1000, 2000, 2100] {
            assert!(buttons.tick(ms(t)).is_empty());
        }
        readings.store(4, IDLE);
        buttons.tick(ms(2120));

        assert_eq!(short.get(), 0);
        assert_eq!(long.get(), 1);
    }

    #[test]
    fn test_skipped_bucket_fires_reached_state_only() {
        let readings = idle_readings();
        let short = Cell::new(0u32);
        let medium = Cell::new(0u32);
        let mut on_short = || short.set(short.get() + 1);
        let mut on_medium = || medium.set(medium.get() + 1);

        let mut buttons: TouchButtons<'_, Callback<'_>, CHANNEL_COUNT> =
            TouchButtons::new(&readings, None).unwrap();
        let config = ChannelConfig::new(80).wait_for_release(false);
        buttons.configure(0, config, cb(&mut on_short)).unwrap();
        buttons
            .configure(0, config.on(ButtonState::MediumPressed), cb(&mut on_medium))
            .unwrap();
        buttons.begin();

        readings.store(0, TOUCHED);
        buttons.tick(ms(0));
        // A late tick jumps straight past the short bucket
        let report = buttons.tick(ms(400));
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].state, ButtonState::MediumPressed);
        assert_eq!(short.get(), 0);
        assert_eq!(medium.get(), 1);
    }

    #[test]
    fn test_missing_callback_is_noop() {
        let readings = idle_readings();
        let mut buttons: TouchButtons<'_, fn(), CHANNEL_COUNT> =
            TouchButtons::new(&readings, None).unwrap();
        buttons.configure(5, ChannelConfig::new(80), None).unwrap();
        buttons.begin();

        readings.store(5, TOUCHED);
        for t in (0..=3000).step_by(20) {
            assert!(buttons.tick(ms(t)).is_empty());
        }
        assert_eq!(buttons.channel(5).unwrap().state(), ButtonState::LongPressed);
        assert_eq!(buttons.time_since_last_callback(ms(3000)), None);
    }

    #[test]
    fn test_zero_percent_never_presses() {
        let readings = idle_readings();
        let hits = Cell::new(0u32);
        let mut on_short = || hits.set(hits.get() + 1);

        let mut buttons: TouchButtons<'_, Callback<'_>, CHANNEL_COUNT> =
            TouchButtons::new(&readings, None).unwrap();
        buttons
            .configure(0, ChannelConfig::new(0), cb(&mut on_short))
            .unwrap();
        buttons.begin();
        assert_eq!(buttons.channel(0).unwrap().threshold(), 0);

        readings.store(0, 0);
        for t in (0..=500).step_by(20) {
            buttons.tick(ms(t));
            assert_eq!(
                buttons.channel(0).unwrap().instantaneous_state(),
                InstantaneousState::NotPressed
            );
        }
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_disable_all_stops_dispatch() {
        let readings = idle_readings();
        let hits = Cell::new(0u32);
        let mut on_a = || hits.set(hits.get() + 1);
        let mut on_b = || hits.set(hits.get() + 1);

        let mut buttons: TouchButtons<'_, Callback<'_>, CHANNEL_COUNT> =
            TouchButtons::new(&readings, None).unwrap();
        buttons.configure(0, ChannelConfig::new(80), cb(&mut on_a)).unwrap();
        buttons.configure(9, ChannelConfig::new(80), cb(&mut on_b)).unwrap();
        buttons.begin();

        buttons.disable_all();
        // Idempotent
        buttons.disable_all();

        for i in 0..CHANNEL_COUNT {
            let ch = buttons.channel(i).unwrap();
            assert!(!ch.is_enabled());
            assert!(!ch.has_callback(ButtonState::ShortPressed));
        }

        readings.store_all(&[TOUCHED; CHANNEL_COUNT]);
        for t in (0..=500).step_by(20) {
            assert!(buttons.tick(ms(t)).is_empty());
        }
        assert_eq!(hits.get(), 0);
        assert_eq!(buttons.diagnostics().count(), 0);
    }

    #[test]
    fn test_disable_single_channel() {
        let readings = idle_readings();
        let mut buttons: TouchButtons<'_, fn(), CHANNEL_COUNT> =
            TouchButtons::new(&readings, None).unwrap();
        fn noop() {}
        buttons
            .configure(2, ChannelConfig::new(80), Some(noop as fn()))
            .unwrap();
        buttons
            .configure(3, ChannelConfig::new(80), Some(noop as fn()))
            .unwrap();
        buttons.begin();

        buttons.disable(2).unwrap();
        buttons.disable(2).unwrap();
        assert!(!buttons.channel(2).unwrap().is_enabled());
        assert_eq!(buttons.channel(2).unwrap().threshold(), 0);
        assert!(buttons.channel(3).unwrap().is_enabled());
        assert_eq!(buttons.channel(3).unwrap().threshold(), 800);
    }

    #[test]
    fn test_configuration_errors() {
        let readings = idle_readings();
        let mut buttons: TouchButtons<'_, fn(), CHANNEL_COUNT> =
            TouchButtons::new(&readings, None).unwrap();
        fn noop() {}

        assert_eq!(
            buttons.configure(CHANNEL_COUNT, ChannelConfig::new(80), None),
            Err(Error::InvalidChannel {
                channel: CHANNEL_COUNT,
                count: CHANNEL_COUNT
            })
        );
        assert_eq!(
            buttons.configure(0, ChannelConfig::new(101), None),
            Err(Error::InvalidPercent(101))
        );
        assert_eq!(
            buttons.configure(
                0,
                ChannelConfig::new(80).on(ButtonState::NoPress),
                Some(noop as fn())
            ),
            Err(Error::NoPressCallback)
        );
        assert!(buttons.disable(42).is_err());
        assert!(buttons.channel(42).is_err());

        // Nothing leaked into the table
        assert!(buttons.channels.iter().all(|ch| !ch.is_enabled()));

        let bad = DispatchConfig {
            short_press: Duration::from_millis(400),
            ..DispatchConfig::default()
        };
        assert!(matches!(
            TouchButtons::<'_, fn(), CHANNEL_COUNT>::new(&readings, Some(bad)),
            Err(Error::InvalidPressTimes)
        ));
    }

    #[test]
    fn test_disarmed_tick_does_nothing() {
        let readings = idle_readings();
        let hits = Cell::new(0u32);
        let mut on_short = || hits.set(hits.get() + 1);

        let mut buttons: TouchButtons<'_, Callback<'_>, CHANNEL_COUNT> =
            TouchButtons::new(&readings, None).unwrap();
        buttons
            .configure(0, ChannelConfig::new(80), cb(&mut on_short))
            .unwrap();
        buttons.calibrate_all_thresholds();
        assert!(!buttons.is_dispatch_enabled());

        readings.store(0, TOUCHED);
        buttons.tick(ms(0));
        buttons.tick(ms(100));
        assert_eq!(hits.get(), 0);
        assert_eq!(
            buttons.channel(0).unwrap().instantaneous_state(),
            InstantaneousState::NotPressed
        );

        buttons.enable_dispatch();
        buttons.tick(ms(120));
        buttons.tick(ms(200));
        assert_eq!(hits.get(), 1);

        // Disarming keeps the configuration
        buttons.disable_dispatch();
        assert!(buttons.channel(0).unwrap().is_enabled());
        assert_eq!(buttons.channel(0).unwrap().threshold(), 800);
    }

    #[test]
    fn test_time_since_last_callback() {
        let readings = idle_readings();
        let mut buttons: TouchButtons<'_, fn(), CHANNEL_COUNT> =
            TouchButtons::new(&readings, None).unwrap();
        fn noop() {}
        buttons
            .configure(6, ChannelConfig::new(80), Some(noop as fn()))
            .unwrap();
        buttons.begin();
        assert_eq!(buttons.time_since_last_callback(ms(10)), None);

        readings.store(6, TOUCHED);
        buttons.tick(ms(0));
        assert_eq!(buttons.tick(ms(60)).len(), 1);
        assert_eq!(
            buttons.time_since_last_callback(ms(110)),
            Some(Duration::from_millis(50))
        );
    }

    #[test]
    fn test_recalibration_from_averaged_baseline() {
        let readings = idle_readings();
        let mut buttons: TouchButtons<'_, fn(), CHANNEL_COUNT> =
            TouchButtons::new(&readings, None).unwrap();
        buttons.configure(0, ChannelConfig::new(50), None).unwrap();

        let mut acc = BaselineAccumulator::<CHANNEL_COUNT>::new(2);
        readings.store(0, 900);
        acc.push(&readings.snapshot());
        readings.store(0, 1100);
        assert!(acc.push(&readings.snapshot()));

        buttons.calibrate_from_baseline(&acc.baseline().unwrap());
        assert_eq!(buttons.channel(0).unwrap().threshold(), 500);
        assert_eq!(buttons.channel(1).unwrap().threshold(), 0);
    }

    #[test]
    fn test_diagnostics_lists_enabled_channels() {
        let readings = idle_readings();
        let mut buttons: TouchButtons<'_, fn(), CHANNEL_COUNT> =
            TouchButtons::new(&readings, None).unwrap();
        buttons.configure(1, ChannelConfig::new(80), None).unwrap();
        buttons.configure(7, ChannelConfig::new(60), None).unwrap();
        buttons.begin();
        readings.store(7, 500);
        buttons.tick(ms(0));

        let mut diags = buttons.diagnostics();
        assert_eq!(
            diags.next(),
            Some(ChannelDiagnostics {
                channel: 1,
                filtered_value: IDLE,
                threshold: 800,
                instantaneous: InstantaneousState::NotPressed,
                state: ButtonState::NoPress,
            })
        );
        let d = diags.next().unwrap();
        assert_eq!(d.channel, 7);
        assert_eq!(d.threshold, 600);
        assert_eq!(d.instantaneous, InstantaneousState::Pressed);
        assert!(diags.next().is_none());
        drop(diags);
        buttons.log_diagnostics();
    }

    #[test]
    fn test_state_invariants_under_noise() {
        let readings = idle_readings();
        let mut buttons: TouchButtons<'_, fn(), CHANNEL_COUNT> =
            TouchButtons::new(&readings, None).unwrap();
        for i in 0..CHANNEL_COUNT {
            buttons
                .configure(
                    i,
                    ChannelConfig::new(80).wait_for_release(i % 2 == 0),
                    None,
                )
                .unwrap();
        }
        buttons.begin();

        // Readings wander around the 800 threshold
        let mut seed: u32 = 0x1234_5678;
        let mut next = || {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            seed >> 16
        };

        let mut last_states = [ButtonState::NoPress; CHANNEL_COUNT];
        let mut t = 0u64;
        for _ in 0..2000 {
            for i in 0..CHANNEL_COUNT {
                // Mostly sticky so presses last long enough to escalate
                if next() % 8 == 0 {
                    let value = if next() % 2 == 0 { TOUCHED } else { IDLE };
                    readings.store(i, value);
                }
            }
            t += 5 + (next() % 60) as u64;
            buttons.tick(ms(t));

            for i in 0..CHANNEL_COUNT {
                let ch = buttons.channel(i).unwrap();
                match ch.instantaneous_state() {
                    InstantaneousState::NotPressed => {
                        assert_eq!(ch.state(), ButtonState::NoPress);
                        assert_eq!(ch.press_started_at(), None);
                    }
                    InstantaneousState::Pressed => {
                        assert!(ch.press_started_at().is_some());
                        // Never regresses while the press continues
                        assert!(ch.state() >= last_states[i]);
                    }
                }
                last_states[i] = ch.state();
            }
        }
    }

    #[test]
    fn test_triggered_state_table() {
        use ButtonState::*;
        use TriggerMode::*;

        assert_eq!(triggered_state(Rise, NoPress, ShortPressed), Some(ShortPressed));
        assert_eq!(triggered_state(Rise, ShortPressed, ShortPressed), None);
        assert_eq!(triggered_state(Rise, MediumPressed, NoPress), None);
        assert_eq!(triggered_state(Fall, NoPress, ShortPressed), None);
        assert_eq!(triggered_state(Fall, MediumPressed, NoPress), Some(MediumPressed));
        assert_eq!(triggered_state(Fall, NoPress, NoPress), None);
    }
}
