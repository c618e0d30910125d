//! Fixed-capacity sample buffer with FIFO eviction

use std::collections::vec_deque::{self, VecDeque};

use crate::protocol::types::TelemetrySample;

/// Default number of samples kept
pub const DEFAULT_BUFFER_CAPACITY: usize = 500;

/// Insertion-ordered buffer of the most recent samples
#[derive(Debug, Clone)]
pub struct TelemetryBuffer {
    samples: VecDeque<TelemetrySample>,
    capacity: usize,
    /// Samples evicted to make room since creation or the last clear
    evicted: u64,
}

impl TelemetryBuffer {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "TelemetryBuffer capacity must be non-zero");
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    /// Append a sample, evicting the oldest one when full
    pub fn push(&mut self, sample: TelemetrySample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
            self.evicted += 1;
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<&TelemetrySample> {
        self.samples.back()
    }

    /// Samples oldest first
    pub fn iter(&self) -> vec_deque::Iter<'_, TelemetrySample> {
        self.samples.iter()
    }

    /// The last `n` samples, oldest first
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &TelemetrySample> {
        self.samples.iter().skip(self.samples.len().saturating_sub(n))
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.evicted = 0;
    }
}

impl Default for TelemetryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl<'a> IntoIterator for &'a TelemetryBuffer {
    type Item = &'a TelemetrySample;
    type IntoIter = vec_deque::Iter<'a, TelemetrySample>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::Vec3;
    use chrono::Utc;

    fn sample(ts: u32) -> TelemetrySample {
        TelemetrySample {
            device_timestamp: ts,
            host_time: Utc::now(),
            accel: Vec3::default(),
            gyro: Vec3::default(),
            mag: Vec3::default(),
            temperature: 20.0,
        }
    }

    fn timestamps(buffer: &TelemetryBuffer) -> Vec<u32> {
        buffer.iter().map(|s| s.device_timestamp).collect()
    }

    #[test]
    fn test_default_capacity() {
        assert_eq!(TelemetryBuffer::default().capacity(), 500);
    }

    #[test]
    fn test_push_below_capacity() {
        let mut buffer = TelemetryBuffer::new(3);
        buffer.push(sample(1));
        buffer.push(sample(2));

        assert_eq!(buffer.len(), 2);
        assert_eq!(timestamps(&buffer), vec![1, 2]);
        assert_eq!(buffer.latest().unwrap().device_timestamp, 2);
    }

    #[test]
    fn test_capacity_plus_one_evicts_oldest() {
        let n = 5;
        let mut buffer = TelemetryBuffer::new(n);
        for ts in 0..=n as u32 {
            buffer.push(sample(ts));
        }

        assert_eq!(buffer.len(), n);
        assert_eq!(timestamps(&buffer), vec![1, 2, 3, 4, 5]);
        assert_eq!(buffer.evicted(), 1);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut buffer = TelemetryBuffer::new(10);
        for ts in 0..1000 {
            buffer.push(sample(ts));
            assert!(buffer.len() <= 10);
        }
        assert_eq!(timestamps(&buffer), (990..1000).collect::<Vec<_>>());
    }

    #[test]
    fn test_recent() {
        let mut buffer = TelemetryBuffer::new(10);
        for ts in 0..6 {
            buffer.push(sample(ts));
        }
        let recent: Vec<u32> = buffer.recent(2).map(|s| s.device_timestamp).collect();
        assert_eq!(recent, vec![4, 5]);
        assert_eq!(buffer.recent(100).count(), 6);
    }

    #[test]
    fn test_clear() {
        let mut buffer = TelemetryBuffer::new(2);
        for ts in 0..5 {
            buffer.push(sample(ts));
        }
        buffer.clear();

        assert!(buffer.is_empty());
        assert!(buffer.latest().is_none());
        assert_eq!(buffer.evicted(), 0);
        assert_eq!(buffer.capacity(), 2);
    }

    #[test]
    #[should_panic]
    fn test_zero_capacity_panics() {
        TelemetryBuffer::new(0);
    }
}
