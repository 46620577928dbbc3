//! Lock-free pre-convolution gain

use crossbeam::atomic::AtomicCell;

use crate::types::{db_to_linear, linear_to_db};

/// Linear gain applied to the input before convolution
///
/// Written from any control thread, read once per block by the render
/// thread. A plain atomic: no lock, no torn reads.
#[derive(Debug)]
pub struct PreGain(AtomicCell<f32>);

impl PreGain {
    pub fn new(gain: f32) -> Self {
        Self(AtomicCell::new(gain))
    }

    #[inline]
    pub fn get(&self) -> f32 {
        self.0.load()
    }

    /// Set the linear gain; non-finite values are ignored
    pub fn set(&self, gain: f32) {
        if !gain.is_finite() {
            log::warn!("Ignoring non-finite pre-gain {}", gain);
            return;
        }
        self.0.store(gain);
    }

    pub fn set_db(&self, db: f32) {
        self.set(db_to_linear(db));
    }

    /// Current gain in decibels (-inf at zero gain)
    pub fn db(&self) -> f32 {
        linear_to_db(self.get().abs())
    }
}

impl Default for PreGain {
    fn default() -> Self {
        Self::new(1.0)
    }
}
