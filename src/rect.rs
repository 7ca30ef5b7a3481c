//! Bounding box geometry.
//!
//! Boxes are used both in normalized coordinates (`[0, 1]` relative to the frame size) and in
//! pixel coordinates, the type itself does not care.

use std::fmt;

use crate::image::Resolution;

/// Added to the union area when computing IoU, so that degenerate boxes don't divide by zero.
pub const IOU_EPSILON: f32 = 1e-5;

/// An axis-aligned rectangle in corner form.
///
/// Width and height are derived from the corners and not stored separately. A box is only
/// [valid][Self::is_valid] if neither is negative; geometry must not be computed on invalid boxes.
#[derive(Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    x0: f32,
    y0: f32,
    x1: f32,
    y1: f32,
}

impl BoundingBox {
    /// Creates a box from its top-left (`x0`, `y0`) and bottom-right (`x1`, `y1`) corners.
    #[inline]
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Creates a box extending outwards from a center point.
    #[inline]
    pub fn from_center(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
        Self::new(
            x_center - width * 0.5,
            y_center - height * 0.5,
            x_center + width * 0.5,
            y_center + height * 0.5,
        )
    }

    #[inline]
    pub fn x0(&self) -> f32 {
        self.x0
    }

    #[inline]
    pub fn y0(&self) -> f32 {
        self.y0
    }

    #[inline]
    pub fn x1(&self) -> f32 {
        self.x1
    }

    #[inline]
    pub fn y1(&self) -> f32 {
        self.y1
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    /// Changes the width by moving the right edge. The left edge stays in place.
    #[inline]
    pub fn set_width(&mut self, width: f32) {
        self.x1 = self.x0 + width;
    }

    /// Changes the height by moving the bottom edge. The top edge stays in place.
    #[inline]
    pub fn set_height(&mut self, height: f32) {
        self.y1 = self.y0 + height;
    }

    #[inline]
    pub fn center(&self) -> (f32, f32) {
        ((self.x0 + self.x1) * 0.5, (self.y0 + self.y1) * 0.5)
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Returns whether the box has non-negative width and height.
    ///
    /// Boxes with zero width or height are valid. Boxes with NaN coordinates are not, but boxes
    /// extending to infinity are; use [`Self::is_finite`] to rule those out.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.width() >= 0.0 && self.height() >= 0.0
    }

    /// Returns whether all corner coordinates are finite numbers.
    #[inline]
    pub fn is_finite(&self) -> bool {
        [self.x0, self.y0, self.x1, self.y1]
            .iter()
            .all(|v| v.is_finite())
    }

    /// Scales X coordinates by `sx` and Y coordinates by `sy`.
    #[must_use]
    pub fn scale(&self, sx: f32, sy: f32) -> Self {
        Self::new(self.x0 * sx, self.y0 * sy, self.x1 * sx, self.y1 * sy)
    }

    /// Converts a box in pixel coordinates of an image of size `res` to normalized coordinates.
    #[must_use]
    pub fn normalize(&self, res: Resolution) -> Self {
        let (w, h) = (res.width() as f32, res.height() as f32);
        Self::new(self.x0 / w, self.y0 / h, self.x1 / w, self.y1 / h)
    }

    /// Converts a normalized box to pixel coordinates of an image of size `res`.
    #[must_use]
    pub fn denormalize(&self, res: Resolution) -> Self {
        self.scale(res.width() as f32, res.height() as f32)
    }

    /// Computes the area of the overlap between `self` and `other`.
    ///
    /// Returns 0 if the boxes do not overlap on either axis.
    pub fn intersection_area(&self, other: &Self) -> f32 {
        let x_left = self.x0.max(other.x0);
        let y_top = self.y0.max(other.y0);
        let x_right = self.x1.min(other.x1);
        let y_bottom = self.y1.min(other.y1);

        if x_right < x_left || y_bottom < y_top {
            return 0.0;
        }

        (x_right - x_left) * (y_bottom - y_top)
    }

    /// Computes the Intersection over Union (IoU) of `self` and `other`.
    ///
    /// [`IOU_EPSILON`] is added to the union, so two identical boxes have an IoU of approximately
    /// 1.0, and two empty boxes have an IoU of 0.0.
    ///
    /// # Panics
    ///
    /// Panics if the result lies outside of `[0, 1]`. This cannot happen when both boxes are
    /// [valid] and [finite], so a panic means such a box was let through.
    ///
    /// [valid]: Self::is_valid
    /// [finite]: Self::is_finite
    #[track_caller]
    pub fn iou(&self, other: &Self) -> f32 {
        let intersection = self.intersection_area(other);
        let iou = intersection / (self.area() + other.area() - intersection + IOU_EPSILON);

        assert!(
            (0.0..=1.0).contains(&iou),
            "IoU of {:?} and {:?} is out of range: {}",
            self,
            other,
            iou
        );
        iou
    }
}

impl fmt::Debug for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BoundingBox ({},{})-({},{})",
            self.x0, self.y0, self.x1, self.y1
        )
    }
}
