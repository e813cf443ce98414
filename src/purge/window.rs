//! Time windows that partition the purge range.
//!
//! A pass walks `[earliest, cutoff)` in contiguous, non-overlapping steps so
//! each candidate query only touches a bounded slice of the `mod_date` index.

use std::{fmt, iter::FusedIterator};

use chrono::{DateTime, Duration, Utc};

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Lazy, forward-only iterator over the windows between `earliest` and `cutoff`.
///
/// Every window is `step` long except the last, which is clipped to end
/// exactly at `cutoff`. Yields nothing when `earliest >= cutoff` or when
/// `step` is not positive.
#[derive(Debug, Clone)]
pub struct Windows {
    next_start: DateTime<Utc>,
    cutoff: DateTime<Utc>,
    step: Duration,
}

impl Windows {
    pub fn new(earliest: DateTime<Utc>, cutoff: DateTime<Utc>, step: Duration) -> Self {
        let next_start = if step <= Duration::zero() {
            cutoff
        } else {
            earliest
        };
        Self {
            next_start,
            cutoff,
            step,
        }
    }
}

impl Iterator for Windows {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        if self.next_start >= self.cutoff {
            return None;
        }

        let start = self.next_start;
        let end = start
            .checked_add_signed(self.step)
            .map_or(self.cutoff, |end| end.min(self.cutoff));
        self.next_start = end;

        Some(Window { start, end })
    }
}

impl FusedIterator for Windows {}
