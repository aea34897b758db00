//! Fixed-capacity time series with FIFO eviction
//!
//! A `RingBuffer` holds `[timestamp, value]` points in insertion order. Once full,
//! every append drops the oldest point before pushing the new one. Timestamps are
//! expected to be monotonic; that is up to the caller and is not checked here.

use crate::error::ModelError;
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of points kept per multi-cluster endpoint series
pub const ENDPOINT_SERIES_CAPACITY: usize = 60;

/// Bounded, insertion-ordered sequence of `(timestamp, value)` points
#[derive(Debug, Clone, PartialEq)]
pub struct RingBuffer<T> {
    capacity: usize,
    points: VecDeque<(f64, T)>,
}

impl<T> RingBuffer<T> {
    /// Create an empty buffer. A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            points: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a point, evicting the oldest one when the buffer is full.
    ///
    /// Fails without touching the buffer if `timestamp` is NaN or infinite.
    pub fn append(&mut self, value: T, timestamp: f64) -> Result<(), ModelError> {
        check_timestamp(timestamp)?;

        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back((timestamp, value));

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate points from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &(f64, T)> {
        self.points.iter()
    }

    /// Most recently appended point
    pub fn latest(&self) -> Option<&(f64, T)> {
        self.points.back()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Values in insertion order, without timestamps
    pub fn values(&self) -> Vec<T> {
        self.points.iter().map(|(_, v)| v.clone()).collect()
    }
}

impl<T> Default for RingBuffer<T> {
    fn default() -> Self {
        Self::with_capacity(ENDPOINT_SERIES_CAPACITY)
    }
}

fn check_timestamp(timestamp: f64) -> Result<(), ModelError> {
    if timestamp.is_finite() {
        Ok(())
    } else {
        Err(ModelError::Validation(format!(
            "timestamp must be a finite number, got {}",
            timestamp
        )))
    }
}

impl<T: Serialize> Serialize for RingBuffer<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.points.len()))?;
        for (timestamp, value) in &self.points {
            seq.serialize_element(&(timestamp, value))?;
        }
        seq.end()
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for RingBuffer<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let points = Vec::<(f64, T)>::deserialize(deserializer)?;

        if points.len() > ENDPOINT_SERIES_CAPACITY {
            return Err(de::Error::custom(format!(
                "series holds {} points, capacity is {}",
                points.len(),
                ENDPOINT_SERIES_CAPACITY
            )));
        }

        let mut buffer = RingBuffer::default();
        for (timestamp, value) in points {
            buffer.append(value, timestamp).map_err(de::Error::custom)?;
        }
        Ok(buffer)
    }
}
