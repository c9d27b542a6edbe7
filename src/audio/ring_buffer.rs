//! Lock-free SPSC ring buffer for captured samples.
//!
//! The cpal callback thread owns the producer; whichever thread reads frames
//! owns the consumer. No locks on the audio callback path.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};

/// Default capacity: ~10 seconds of 16 kHz mono audio.
pub const DEFAULT_CAPACITY: usize = 160_000;

/// Producer half, lives in the cpal audio callback.
pub struct AudioProducer {
    inner: ringbuf::HeapProd<f32>,
}

/// Consumer half, lives with the frame reader.
pub struct AudioConsumer {
    inner: ringbuf::HeapCons<f32>,
}

/// Create a matched producer/consumer pair.
pub fn audio_ring_buffer(capacity: Option<usize>) -> (AudioProducer, AudioConsumer) {
    let cap = capacity.unwrap_or(DEFAULT_CAPACITY);
    let rb = HeapRb::<f32>::new(cap);
    let (prod, cons) = rb.split();
    (AudioProducer { inner: prod }, AudioConsumer { inner: cons })
}

impl AudioProducer {
    /// Push samples; returns how many fit. Overflow drops the newest audio.
    pub fn push_slice(&mut self, samples: &[f32]) -> usize {
        self.inner.push_slice(samples)
    }
}

impl AudioConsumer {
    /// Pop up to `buf.len()` samples into `buf`.
    pub fn pop_slice(&mut self, buf: &mut [f32]) -> usize {
        self.inner.pop_slice(buf)
    }

    /// Number of samples currently available for reading.
    pub fn available(&self) -> usize {
        self.inner.occupied_len()
    }

    /// Pop exactly `n` samples if that many are buffered.
    pub fn pop_exact(&mut self, n: usize) -> Option<Vec<f32>> {
        if self.available() < n {
            return None;
        }
        let mut buf = vec![0.0f32; n];
        let read = self.pop_slice(&mut buf);
        buf.truncate(read);
        Some(buf)
    }

    /// Discard everything currently buffered.
    pub fn clear(&mut self) -> usize {
        let n = self.available();
        self.inner.skip(n)
    }
}
