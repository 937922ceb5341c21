//! Time units for event timestamps.
//!
//! Provides type-safe wrappers for points in time and durations to prevent
//! unit confusion. Both carry microsecond resolution.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// A point in time, in microseconds since the Unix epoch.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(pub u64);

/// A duration, in microseconds.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Span(pub u64);

impl Timestamp {
    /// Create a timestamp from microseconds since the Unix epoch.
    pub fn new(microseconds: u64) -> Self {
        Self(microseconds)
    }

    /// The current time as microseconds since the Unix epoch.
    pub fn now() -> Self {
        Self(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("system time must be after UNIX_EPOCH")
                .as_micros() as u64,
        )
    }

    /// Get the raw microseconds value.
    pub fn get(self) -> u64 {
        self.0
    }

    /// Add a span with saturation at the numeric bounds.
    pub fn saturating_add(self, span: Span) -> Self {
        Timestamp(self.0.saturating_add(span.0))
    }

    /// Subtract a span with saturation at the numeric bounds.
    pub fn saturating_sub(self, span: Span) -> Self {
        Timestamp(self.0.saturating_sub(span.0))
    }

    /// Checked subtraction of two timestamps. Returns None on underflow.
    pub fn checked_since(self, earlier: Timestamp) -> Option<Span> {
        self.0.checked_sub(earlier.0).map(Span)
    }
}

impl Span {
    /// Create a span from microseconds.
    pub fn new(microseconds: u64) -> Self {
        Self(microseconds)
    }

    /// Create a span from whole seconds.
    pub fn from_secs(seconds: u64) -> Self {
        Self(seconds * 1_000_000)
    }

    /// Get the raw microseconds value.
    pub fn get(self) -> u64 {
        self.0
    }

    /// Convert to a `std::time::Duration`.
    pub fn to_duration(self) -> std::time::Duration {
        std::time::Duration::from_micros(self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(us: u64) -> Self {
        Timestamp(us)
    }
}

impl From<u64> for Span {
    fn from(us: u64) -> Self {
        Span(us)
    }
}

impl From<std::time::Duration> for Span {
    fn from(d: std::time::Duration) -> Self {
        Span(d.as_micros() as u64)
    }
}

impl Add<Span> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Span) -> Timestamp {
        Timestamp(self.0 + rhs.0)
    }
}

impl Sub<Span> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Span) -> Timestamp {
        Timestamp(self.0 - rhs.0)
    }
}

impl Add for Span {
    type Output = Span;

    fn add(self, rhs: Span) -> Span {
        Span(self.0 + rhs.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}
