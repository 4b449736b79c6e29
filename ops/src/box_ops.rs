//! Bounding box conversions and IoU variants.
//!
//! Boxes are `[f32; 4]`, either `[ymin, xmin, ymax, xmax]` or
//! `[x_center, y_center, width, height]`; [`BoxFormat`] says which.

use std::f32::consts::PI;

pub type BoxCoords = [f32; 4];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxFormat {
  /// `[ymin, xmin, ymax, xmax]`
  Yxyx,
  /// `[x_center, y_center, width, height]`
  Xcycwh,
}

pub fn yxyx_to_xcycwh(b: BoxCoords) -> BoxCoords {
  let [ymin, xmin, ymax, xmax] = b;
  [
    (xmax + xmin) / 2.0,
    (ymax + ymin) / 2.0,
    xmax - xmin,
    ymax - ymin,
  ]
}

pub fn xcycwh_to_yxyx(b: BoxCoords) -> BoxCoords {
  let [x, y, w, h] = b;
  [y - h / 2.0, x - w / 2.0, y + h / 2.0, x + w / 2.0]
}

fn as_yxyx(b: BoxCoords, format: BoxFormat) -> BoxCoords {
  match format {
    BoxFormat::Yxyx => b,
    BoxFormat::Xcycwh => xcycwh_to_yxyx(b),
  }
}

fn as_xcycwh(b: BoxCoords, format: BoxFormat) -> BoxCoords {
  match format {
    BoxFormat::Yxyx => yxyx_to_xcycwh(b),
    BoxFormat::Xcycwh => b,
  }
}

/// `a / b`, or `0.0` when `b` is zero.
#[inline]
pub fn divide_no_nan(a: f32, b: f32) -> f32 {
  if b == 0.0 {
    0.0
  } else {
    a / b
  }
}

/// Returns `(intersection, union)` areas.
pub fn intersect_and_union(a: BoxCoords, b: BoxCoords, format: BoxFormat) -> (f32, f32) {
  let a = as_yxyx(a, format);
  let b = as_yxyx(b, format);
  let inter_h = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let inter_w = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let intersection = inter_h * inter_w;
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  (intersection, area_a + area_b - intersection)
}

/// The smallest box containing both inputs, in the input format. A degenerate
/// (zero-area) result is returned as all zeros.
pub fn smallest_encompassing_box(a: BoxCoords, b: BoxCoords, format: BoxFormat) -> BoxCoords {
  let a = as_yxyx(a, format);
  let b = as_yxyx(b, format);
  let enclosing = [a[0].min(b[0]), a[1].min(b[1]), a[2].max(b[2]), a[3].max(b[3])];
  if (enclosing[2] - enclosing[0]) * (enclosing[3] - enclosing[1]) == 0.0 {
    return [0.0; 4];
  }
  match format {
    BoxFormat::Yxyx => enclosing,
    BoxFormat::Xcycwh => yxyx_to_xcycwh(enclosing),
  }
}

pub fn iou(a: BoxCoords, b: BoxCoords, format: BoxFormat) -> f32 {
  let (intersection, union) = intersect_and_union(a, b, format);
  divide_no_nan(intersection, union)
}

/// Generalized IoU. Returns `(iou, giou)`.
pub fn giou(a: BoxCoords, b: BoxCoords, format: BoxFormat) -> (f32, f32) {
  let (intersection, union) = intersect_and_union(a, b, format);
  let iou = divide_no_nan(intersection, union);
  let enclosing = as_xcycwh(smallest_encompassing_box(a, b, format), format);
  let enclosing_area = enclosing[2] * enclosing[3];
  let regularization = divide_no_nan(enclosing_area - union, enclosing_area);
  (iou, (iou - regularization).clamp(-1.0, 1.0))
}

/// Distance IoU. Returns `(iou, diou)`.
pub fn diou(a: BoxCoords, b: BoxCoords, format: BoxFormat) -> (f32, f32) {
  let (ca, cb) = (as_xcycwh(a, format), as_xcycwh(b, format));
  let center_dist = (ca[0] - cb[0]).powi(2) + (ca[1] - cb[1]).powi(2);

  let (intersection, union) = intersect_and_union(a, b, format);
  let iou = divide_no_nan(intersection, union);

  let (ya, yb) = (as_yxyx(a, format), as_yxyx(b, format));
  let diag = (ya[2].max(yb[2]) - ya[0].min(yb[0])).powi(2)
    + (ya[3].max(yb[3]) - ya[1].min(yb[1])).powi(2);

  (iou, (iou - divide_no_nan(center_dist, diag)).clamp(-1.0, 1.0))
}

/// Complete IoU: DIoU plus an aspect-ratio consistency term. Returns `(iou, ciou)`.
pub fn ciou(a: BoxCoords, b: BoxCoords, format: BoxFormat) -> (f32, f32) {
  let (iou, diou) = diou(a, b, format);
  let (ca, cb) = (as_xcycwh(a, format), as_xcycwh(b, format));
  let arc = divide_no_nan(ca[2], ca[3]).atan() - divide_no_nan(cb[2], cb[3]).atan();
  let v = 4.0 * arc * arc / (PI * PI);
  let alpha = divide_no_nan(v, (1.0 - iou) + v);
  (iou, (diou - v * alpha).clamp(-1.0, 1.0))
}

/// IoU of two `(width, height)` pairs sharing a center.
pub fn wh_iou(a: [f32; 2], b: [f32; 2]) -> f32 {
  let intersection = a[0].min(b[0]).max(0.0) * a[1].min(b[1]).max(0.0);
  let union = a[0] * a[1] + b[0] * b[1] - intersection;
  divide_no_nan(intersection, union)
}
