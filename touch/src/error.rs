//! Configuration errors
//!
//! Only the configuration surface can fail. Dispatch itself has no error path:
//! a missing threshold or callback simply results in no event.

/// Errors returned by the configuration operations of [`TouchButtons`](crate::TouchButtons)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Channel index outside of `0..count`
    InvalidChannel {
        /// Requested channel index
        channel: usize,
        /// Number of channels owned by the driver
        count: usize,
    },
    /// Threshold percentage above 100
    InvalidPercent(u8),
    /// A callback was registered for `ButtonState::NoPress`, which is never dispatched
    NoPressCallback,
    /// Press durations are not strictly increasing from short to long
    InvalidPressTimes,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidChannel { channel, count } => {
                write!(f, "Invalid touch channel {channel} (driver has {count})")
            }
            Error::InvalidPercent(percent) => {
                write!(f, "Invalid threshold percentage {percent} (max 100)")
            }
            Error::NoPressCallback => write!(f, "Callbacks cannot be registered for NoPress"),
            Error::InvalidPressTimes => {
                write!(f, "Press durations must increase from short to medium to long")
            }
        }
    }
}

impl core::error::Error for Error {}
