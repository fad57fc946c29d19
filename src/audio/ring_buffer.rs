//! Circular PCM buffer shared between the capture callback and the VAD loop.
//!
//! The capture driver's callback writes into the buffer from its own thread;
//! the capture stage reads the most recent window whenever it polls. One
//! mutex guards the cursor, valid length, and backing storage, and is held
//! only for the duration of the copies, so the driver thread never waits on
//! downstream processing.

use std::sync::Mutex;

struct Inner {
    buf: Vec<f32>,
    /// Next write position.
    pos: usize,
    /// Valid samples, saturating at the buffer capacity.
    len: usize,
}

/// Fixed-capacity ring of mono f32 PCM at a single sample rate.
pub struct RingBuffer {
    inner: Mutex<Inner>,
    sample_rate: u32,
}

impl RingBuffer {
    /// Allocates a zeroed buffer holding `capacity_ms` of audio.
    pub fn new(capacity_ms: u32, sample_rate: u32) -> Self {
        let capacity = (sample_rate as usize * capacity_ms as usize / 1000).max(1);
        Self {
            inner: Mutex::new(Inner {
                buf: vec![0.0; capacity],
                pos: 0,
                len: 0,
            }),
            sample_rate,
        }
    }

    /// Appends captured samples, wrapping modulo the capacity.
    ///
    /// Called from the capture callback; must not block on readers. When the
    /// input is larger than the whole buffer, only its newest `capacity`
    /// samples are kept.
    pub fn push(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }

        let mut inner = self.inner.lock().unwrap();
        let capacity = inner.buf.len();

        // Oversized input: the front of it would be overwritten anyway.
        let samples = if samples.len() > capacity {
            &samples[samples.len() - capacity..]
        } else {
            samples
        };

        let pos = inner.pos;
        let n = samples.len();
        if pos + n > capacity {
            let first = capacity - pos;
            inner.buf[pos..].copy_from_slice(&samples[..first]);
            inner.buf[..n - first].copy_from_slice(&samples[first..]);
        } else {
            inner.buf[pos..pos + n].copy_from_slice(samples);
        }

        inner.pos = (pos + n) % capacity;
        inner.len = (inner.len + n).min(capacity);
    }

    /// Returns the most recent `ms` of audio in chronological order.
    ///
    /// Delivers at most the valid length; `ms == 0` means the whole buffer.
    pub fn get_ms(&self, ms: u32) -> Vec<f32> {
        let inner = self.inner.lock().unwrap();
        let capacity = inner.buf.len();

        let requested = if ms == 0 {
            capacity
        } else {
            self.sample_rate as usize * ms as usize / 1000
        };
        let n = requested.min(inner.len);
        if n == 0 {
            return Vec::new();
        }

        let start = (inner.pos + capacity - n) % capacity;
        let mut out = Vec::with_capacity(n);
        if start + n > capacity {
            out.extend_from_slice(&inner.buf[start..]);
            out.extend_from_slice(&inner.buf[..n - (capacity - start)]);
        } else {
            out.extend_from_slice(&inner.buf[start..start + n]);
        }
        out
    }

    /// Discards all buffered audio without reallocating.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.pos = 0;
        inner.len = 0;
    }

    /// Number of currently valid samples.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len
    }

    /// True when no samples have been captured since construction or `clear`.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total sample capacity.
    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().buf.len()
    }

    /// Sample rate the buffer was sized for.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
