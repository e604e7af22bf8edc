//! Filtered-reading sink.
//!
//! The filter source (an interrupt or a background task) and the dispatcher run
//! in different contexts. Each channel's latest reading is a single atomic
//! `u16`, so the writer never blocks and the dispatcher never sees a torn
//! value. Only plain loads and stores are used, which thumbv6m supports.

use core::sync::atomic::{AtomicU16, Ordering};

pub struct FilteredReadings<const N: usize> {
    values: [AtomicU16; N],
}

impl<const N: usize> FilteredReadings<N> {
    /// All readings start at zero
    pub const fn new() -> Self {
        Self {
            values: [const { AtomicU16::new(0) }; N],
        }
    }

    pub const fn len(&self) -> usize {
        N
    }

    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    /// Record the latest filtered value for one channel, overwriting the previous one.
    ///
    /// Out of range channels are ignored, the feed has no error path.
    pub fn store(&self, channel: usize, value: u16) {
        if let Some(slot) = self.values.get(channel) {
            slot.store(value, Ordering::Relaxed);
        }
    }

    /// Record a full filter cycle, one value per channel
    pub fn store_all(&self, values: &[u16; N]) {
        for (slot, value) in self.values.iter().zip(values) {
            slot.store(*value, Ordering::Relaxed);
        }
    }

    /// Latest value for `channel`, or `None` if out of range
    pub fn load(&self, channel: usize) -> Option<u16> {
        self.values
            .get(channel)
            .map(|slot| slot.load(Ordering::Relaxed))
    }

    /// Copy of the latest value of every channel
    pub fn snapshot(&self) -> [u16; N] {
        core::array::from_fn(|i| self.values[i].load(Ordering::Relaxed))
    }
}

impl<const N: usize> Default for FilteredReadings<N> {
    fn default() -> Self {
        Self::new()
    }
}
