#![cfg_attr(not(test), no_std)]

//! Touch button classification and callback dispatch.
//!
//! The touch hardware (or its firmware filter) pushes one filtered reading per
//! channel into a [`feed::FilteredReadings`]. A [`dispatch::TouchButtons`] driver
//! holds the per-channel configuration, turns each reading into a pressed /
//! not-pressed decision against a calibrated threshold, buckets continuous
//! presses by duration and runs the user callback registered for the bucket.
//!
//! Required call sequence: configure all channels, calibrate (or `begin`, which
//! calibrates), then call [`dispatch::TouchButtons::tick`] at a fixed period.

use embassy_time::Duration;

pub mod calibrate;
pub mod channel;
pub mod dispatch;
pub mod error;
pub mod feed;

pub use channel::{Channel, ChannelConfig};
pub use dispatch::{ButtonEvent, ChannelDiagnostics, TickReport, TouchButtons};
pub use error::Error;
pub use feed::FilteredReadings;

/// Number of touch pads on the ESP32-class peripheral this driver was sized for
pub const CHANNEL_COUNT: usize = 10;

/// This-tick physical contact state of a channel
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InstantaneousState {
    Pressed,
    #[default]
    NotPressed,
}

/// Duration-bucketed press state.
///
/// Ordered so that a longer press compares greater; a continuous press only
/// ever moves up this order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ButtonState {
    #[default]
    NoPress,
    ShortPressed,
    MediumPressed,
    LongPressed,
}

impl ButtonState {
    /// Slot in a channel's callback table, `None` for `NoPress`
    pub(crate) const fn slot(self) -> Option<usize> {
        match self {
            ButtonState::NoPress => None,
            ButtonState::ShortPressed => Some(0),
            ButtonState::MediumPressed => Some(1),
            ButtonState::LongPressed => Some(2),
        }
    }
}

/// Selects which classified-state edge runs a callback
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TriggerMode {
    /// Run the callback for a state when the press enters it
    #[default]
    Rise,
    /// Run the callback for the state the press had reached when it is released.
    /// Gives a single event per press even with several states registered.
    Fall,
}

/// Timing configuration shared by all channels of one driver
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Minimum continuous press duration classified as `ShortPressed`
    pub short_press: Duration,
    /// Minimum continuous press duration classified as `MediumPressed`
    pub medium_press: Duration,
    /// Minimum continuous press duration classified as `LongPressed`
    pub long_press: Duration,
    /// Period at which the application is expected to call `tick`
    pub dispatch_period: Duration,
    /// Period of the filtered-reading feed
    pub filter_period: Duration,
}

impl DispatchConfig {
    pub const fn default() -> Self {
        Self {
            short_press: Duration::from_millis(50),
            medium_press: Duration::from_millis(300),
            long_press: Duration::from_millis(2000),
            dispatch_period: Duration::from_millis(20),
            filter_period: Duration::from_millis(10),
        }
    }

    /// Check that the press buckets are strictly increasing
    pub fn validate(&self) -> Result<(), Error> {
        if self.short_press < self.medium_press && self.medium_press < self.long_press {
            Ok(())
        } else {
            Err(Error::InvalidPressTimes)
        }
    }

    /// Highest bucket whose minimum duration is not longer than `elapsed`
    pub fn classify(&self, elapsed: Duration) -> ButtonState {
        if elapsed >= self.long_press {
            ButtonState::LongPressed
        } else if elapsed >= self.medium_press {
            ButtonState::MediumPressed
        } else if elapsed >= self.short_press {
            ButtonState::ShortPressed
        } else {
            ButtonState::NoPress
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig::default()
    }
}

pub const DEFAULT_DISPATCH_CONFIG: DispatchConfig = DispatchConfig::default();
