//! Miscellaneous utility structs and functions.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A closed interval on the real number line.
#[derive(Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub min: f64,
    pub max: f64,
}

impl Interval {
    /// Creates a new interval.
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Creates a degenerate interval containing a single value.
    pub const fn point(value: f64) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    /// Returns true if this interval contains the value.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Gets the magnitude of the interval.
    pub fn length(&self) -> f64 {
        self.max - self.min
    }

    /// Returns the interval expanded by `by` on both ends.
    pub fn widened(&self, by: f64) -> Self {
        Self {
            min: self.min - by,
            max: self.max + by,
        }
    }

    /// Returns the smallest interval containing both intervals.
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: f64::min(self.min, other.min),
            max: f64::max(self.max, other.max),
        }
    }
}

impl Debug for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Interval({:?}, {:?})", &self.min, &self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn union_spans_both() {
        let a = Interval::new(400.0, 420.0);
        let b = Interval::new(410.0, 450.0);
        let u = a.union(&b);
        assert_approx_eq!(u.min, 400.0);
        assert_approx_eq!(u.max, 450.0);
        assert_approx_eq!(u.length(), 50.0);
    }

    #[test]
    fn widened_point_contains_neighbourhood() {
        let p = Interval::point(450.0);
        assert!(p.contains(450.0));
        assert!(!p.contains(400.0));
        let w = p.widened(100.0);
        assert!(w.contains(400.0));
        assert!(w.contains(550.0));
        assert!(!w.contains(551.0));
    }
}
