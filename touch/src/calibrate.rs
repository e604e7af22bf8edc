//! Threshold calibration.
//!
//! A threshold is a percentage of the reading a channel shows while nobody
//! touches it. Calibrating a pressed channel records the pressed reading as the
//! baseline and leaves the channel unusable until the next calibration; the
//! caller is responsible for calibrating at rest.

use log::{debug, warn};

use crate::channel::Channel;

/// Recompute the threshold of every enabled channel from `baseline`.
///
/// Disabled channels are left untouched.
pub fn calibrate_channels<C, const N: usize>(channels: &mut [Channel<C>; N], baseline: &[u16; N]) {
    for (i, (channel, reading)) in channels.iter_mut().zip(baseline).enumerate() {
        if !channel.is_enabled() {
            continue;
        }
        let threshold = channel.calibrate(*reading);
        debug!(
            "touch: calibrated channel={} reading={} percent={} threshold={}",
            i,
            reading,
            channel.threshold_percent(),
            threshold
        );
        if threshold == 0 {
            warn!("touch: channel={} has a zero threshold and will never press", i);
        }
    }
}

/// Averages several snapshots of the feed into one baseline.
///
/// Sums are kept in `u32`, so up to 65537 samples of full-scale `u16` readings fit.
pub struct BaselineAccumulator<const N: usize> {
    sums: [u32; N],
    samples: u16,
    target: u16,
}

impl<const N: usize> BaselineAccumulator<N> {
    /// Collect `target` samples. A target of zero is treated as one.
    pub fn new(target: u16) -> Self {
        Self {
            sums: [0; N],
            samples: 0,
            target: target.max(1),
        }
    }

    /// Add one snapshot, returning true once enough samples were collected.
    ///
    /// Snapshots pushed after the target is reached are ignored.
    pub fn push(&mut self, readings: &[u16; N]) -> bool {
        if self.is_complete() {
            return true;
        }
        for (sum, reading) in self.sums.iter_mut().zip(readings) {
            *sum += *reading as u32;
        }
        self.samples += 1;
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.samples >= self.target
    }

    pub fn samples(&self) -> u16 {
        self.samples
    }

    /// Mean of the collected samples per channel, or `None` before the target is reached
    pub fn baseline(&self) -> Option<[u16; N]> {
        if !self.is_complete() {
            return None;
        }
        let samples = self.samples as u32;
        Some(core::array::from_fn(|i| (self.sums[i] / samples) as u16))
    }

    /// Drop everything collected so far
    pub fn restart(&mut self) {
        self.sums = [0; N];
        self.samples = 0;
    }
}
