//! Utilities for numerics.

use std::cmp::Ordering;

/// An `f32` that implements [`Ord`] according to the IEEE 754 totalOrder predicate.
#[derive(Debug, Clone, Copy)]
pub struct TotalF32(pub f32);

impl PartialEq for TotalF32 {
    fn eq(&self, other: &Self) -> bool {
        f32::total_cmp(&self.0, &other.0) == Ordering::Equal
    }
}

impl Eq for TotalF32 {}

impl PartialOrd for TotalF32 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TotalF32 {
    fn cmp(&self, other: &Self) -> Ordering {
        f32::total_cmp(&self.0, &other.0)
    }
}

/// Clamps `v` into the range `[0, max]`.
///
/// Unlike [`f32::clamp`], NaN is mapped to 0.
#[inline]
pub fn clip(v: f32, max: f32) -> f32 {
    if v < 0.0 || v.is_nan() {
        0.0
    } else if v > max {
        max
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_range() {
        assert_eq!(clip(-0.5, 1.0), 0.0);
        assert_eq!(clip(0.25, 1.0), 0.25);
        assert_eq!(clip(1.5, 1.0), 1.0);
        assert_eq!(clip(f32::NAN, 1.0), 0.0);
    }

    #[test]
    fn total_order() {
        let mut values = [TotalF32(0.5), TotalF32(-1.0), TotalF32(2.0)];
        values.sort();
        assert_eq!(values.map(|v| v.0), [-1.0, 0.5, 2.0]);
    }
}
