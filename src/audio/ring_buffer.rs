//! Lock-free SPSC ring buffers for PCM16 samples.
//!
//! Bridges the cpal callback threads and the mixer worker without locks:
//! one ring carries mic samples into the mix loop, a second carries mixed
//! stereo samples out to the virtual-output callback.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};

use super::MIXER_SAMPLE_RATE;

/// Default capacity: two seconds of 48 kHz stereo audio.
const DEFAULT_CAPACITY: usize = MIXER_SAMPLE_RATE as usize * 2 * 2;

/// Producer half — lives in a cpal audio callback or the mixer worker.
pub struct SampleProducer {
    inner: ringbuf::HeapProd<i16>,
}

/// Consumer half — lives in the mixer worker or the output callback.
pub struct SampleConsumer {
    inner: ringbuf::HeapCons<i16>,
}

/// Create a matched producer/consumer pair backed by a lock-free ring buffer.
pub fn sample_ring_buffer(capacity: Option<usize>) -> (SampleProducer, SampleConsumer) {
    let (prod, cons) = HeapRb::<i16>::new(capacity.unwrap_or(DEFAULT_CAPACITY)).split();
    (SampleProducer { inner: prod }, SampleConsumer { inner: cons })
}

impl SampleProducer {
    /// Push a slice of samples. Returns how many were actually written
    /// (less than `samples.len()` when the buffer is full — the producer
    /// drops the excess and the consumer catches up).
    pub fn push_slice(&mut self, samples: &[i16]) -> usize {
        self.inner.push_slice(samples)
    }

    /// Free space in samples.
    pub fn vacant(&self) -> usize {
        self.inner.vacant_len()
    }
}

impl SampleConsumer {
    /// Pop up to `buf.len()` samples into `buf`. Returns the count read.
    pub fn pop_slice(&mut self, buf: &mut [i16]) -> usize {
        self.inner.pop_slice(buf)
    }

    /// Number of samples currently available.
    pub fn available(&self) -> usize {
        self.inner.occupied_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_order() {
        let (mut prod, mut cons) = sample_ring_buffer(Some(8));
        assert_eq!(prod.push_slice(&[1, 2, 3]), 3);

        let mut buf = [0i16; 2];
        assert_eq!(cons.pop_slice(&mut buf), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(cons.available(), 1);
    }

    #[test]
    fn test_full_buffer_drops_excess() {
        let (mut prod, _cons) = sample_ring_buffer(Some(4));
        assert_eq!(prod.push_slice(&[1, 2, 3, 4, 5, 6]), 4);
        assert_eq!(prod.vacant(), 0);
    }
}
