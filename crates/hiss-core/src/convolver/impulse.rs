//! Impulse response storage

use std::sync::Arc;

use crate::types::{AudioBuffer, Sample};

/// An owned multi-channel impulse response at a known sample rate
///
/// Never mutated after construction; a new load replaces it wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    buffer: AudioBuffer,
    sample_rate: u32,
}

impl ImpulseResponse {
    pub fn new(buffer: AudioBuffer, sample_rate: u32) -> Self {
        Self { buffer, sample_rate }
    }

    /// Build from separate channel slices of equal length
    pub fn from_channels<C: AsRef<[Sample]>>(channels: &[C], sample_rate: u32) -> Self {
        Self::new(AudioBuffer::from_channels(channels), sample_rate)
    }

    /// Single-tap identity kernel on every channel
    pub fn unit(num_channels: usize, sample_rate: u32) -> Self {
        let mut buffer = AudioBuffer::silence(1, num_channels);
        for ch in 0..num_channels {
            buffer.channel_mut(ch)[0] = 1.0;
        }
        Self::new(buffer, sample_rate)
    }

    pub fn buffer(&self) -> &AudioBuffer {
        &self.buffer
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn num_channels(&self) -> usize {
        self.buffer.num_channels()
    }

    /// Length of every channel in frames
    pub fn num_frames(&self) -> usize {
        self.buffer.num_frames()
    }

    pub fn channel(&self, ch: usize) -> &[Sample] {
        self.buffer.channel(ch)
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.num_frames() as f64 / self.sample_rate as f64
    }
}

/// Slot holding the currently active impulse response
#[derive(Debug, Default)]
pub(crate) struct ImpulseStore {
    current: Option<Arc<ImpulseResponse>>,
}

impl ImpulseStore {
    pub(crate) fn current(&self) -> Option<&Arc<ImpulseResponse>> {
        self.current.as_ref()
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.current.is_some()
    }

    /// Install `impulse`, handing back the one it replaces
    pub(crate) fn replace(&mut self, impulse: Arc<ImpulseResponse>) -> Option<Arc<ImpulseResponse>> {
        self.current.replace(impulse)
    }

    /// Put back a previously active impulse (or none)
    pub(crate) fn restore(&mut self, previous: Option<Arc<ImpulseResponse>>) {
        self.current = previous;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_impulse() {
        let ir = ImpulseResponse::unit(3, 48000);
        assert_eq!(ir.num_channels(), 3);
        assert_eq!(ir.num_frames(), 1);
        assert!(ir.buffer().channels().all(|c| c == [1.0]));
    }

    #[test]
    fn test_duration() {
        let ir = ImpulseResponse::new(AudioBuffer::silence(24000, 1), 48000);
        assert!((ir.duration_secs() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_store_replace_and_restore() {
        let mut store = ImpulseStore::default();
        assert!(!store.is_loaded());

        let first = Arc::new(ImpulseResponse::unit(1, 48000));
        assert!(store.replace(first.clone()).is_none());

        let second = Arc::new(ImpulseResponse::unit(2, 48000));
        let previous = store.replace(second);
        assert!(Arc::ptr_eq(previous.as_ref().unwrap(), &first));

        store.restore(previous);
        assert!(Arc::ptr_eq(store.current().unwrap(), &first));

        store.restore(None);
        assert!(!store.is_loaded());
    }
}
