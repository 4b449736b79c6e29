//! Box bookkeeping for the input pipeline: padding, letterboxing, translation.

use crate::box_ops::BoxCoords;
use crate::error::{Error, Result};

/// Truncates or pads `values` to exactly `n` entries.
pub fn pad_max_instances<T: Clone>(values: &[T], n: usize, pad: T) -> Vec<T> {
  let mut out: Vec<T> = values.iter().take(n).cloned().collect();
  out.resize(n, pad);
  out
}

/// Largest multiple of `stride` not above `size`.
pub fn rounded_input_size(size: u32, stride: u32) -> u32 {
  if stride == 0 {
    return size;
  }
  (size / stride) * stride
}

/// Where an image lands on a square letterboxed canvas, in target pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  pub offset_y: f32,
  pub offset_x: f32,
  pub scaled_height: f32,
  pub scaled_width: f32,
}

impl Letterbox {
  /// Fits a `width x height` image into a `target x target` canvas, centered.
  pub fn fit(width: u32, height: u32, target: u32) -> Result<Self> {
    if width == 0 || height == 0 {
      return Err(Error::InvalidArgument {
        name: "image",
        message: format!("image size {}x{} has no area", width, height),
      });
    }
    let clipper = width.max(height) as f32;
    let scaled_width = width as f32 * target as f32 / clipper;
    let scaled_height = height as f32 * target as f32 / clipper;
    Ok(Self {
      offset_y: ((target as f32 - scaled_height) / 2.0).floor(),
      offset_x: ((target as f32 - scaled_width) / 2.0).floor(),
      scaled_height,
      scaled_width,
    })
  }

  /// Maps normalized `yxyx` boxes on the source image onto the canvas.
  /// Boxes with zero height are zeroed.
  pub fn apply(&self, boxes: &[BoxCoords], target: u32) -> Vec<BoxCoords> {
    let t = target as f32;
    boxes
      .iter()
      .map(|b| {
        if b[2] - b[0] == 0.0 {
          return [0.0; 4];
        }
        [
          (b[0] * self.scaled_height + self.offset_y) / t,
          (b[1] * self.scaled_width + self.offset_x) / t,
          (b[2] * self.scaled_height + self.offset_y) / t,
          (b[3] * self.scaled_width + self.offset_x) / t,
        ]
      })
      .collect()
  }

  /// Crop window `[ymin, xmin, ymax, xmax]` in canvas pixels.
  pub fn window(&self) -> [f32; 4] {
    [
      self.offset_y,
      self.offset_x,
      self.offset_y + self.scaled_height,
      self.offset_x + self.scaled_width,
    ]
  }
}

/// Letterboxes `boxes` from a `width x height` image onto a `target` square.
/// Returns the moved boxes and the crop window of the image on the canvas.
pub fn letterbox_boxes(
  boxes: &[BoxCoords],
  width: u32,
  height: u32,
  target: u32,
) -> Result<(Vec<BoxCoords>, [f32; 4])> {
  let letterbox = Letterbox::fit(width, height, target)?;
  Ok((letterbox.apply(boxes, target), letterbox.window()))
}

/// Shifts normalized `yxyx` boxes by `(tx, ty)`.
pub fn translate_boxes(boxes: &[BoxCoords], tx: f32, ty: f32) -> Vec<BoxCoords> {
  boxes
    .iter()
    .map(|b| [b[0] + ty, b[1] + tx, b[2] + ty, b[3] + tx])
    .collect()
}

/// Clamps normalized `yxyx` boxes to the unit square.
pub fn clip_boxes(boxes: &[BoxCoords]) -> Vec<BoxCoords> {
  boxes.iter().map(|b| b.map(|v| v.clamp(0.0, 1.0))).collect()
}
