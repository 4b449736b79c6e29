//! Matching ground-truth boxes to anchor priors and laying them out on an output grid.

use crate::box_ops::{wh_iou, BoxCoords};
use std::collections::BTreeMap;

/// Sentinel for "no anchor" in a ranked match list.
pub const NO_ANCHOR: i32 = -1;

/// Feature level -> indices of the anchors predicted at that level. Level
/// `min_level` takes the first `boxes_per_scale` anchors, the next level the
/// following ones, and so on.
pub fn anchor_masks(min_level: u32, max_level: u32, boxes_per_scale: usize) -> BTreeMap<u32, Vec<usize>> {
  (min_level..=max_level)
    .map(|level| {
      let start = (level - min_level) as usize * boxes_per_scale;
      (level, (start..start + boxes_per_scale).collect())
    })
    .collect()
}

/// The anchors for one ground-truth box, best first.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorMatch {
  /// Anchor indices ranked by shape IoU. The first entry is always the best
  /// anchor; later entries are [`NO_ANCHOR`] when their IoU is under the threshold.
  pub indices: Vec<i32>,
  /// Shape IoU of each ranked anchor, aligned with `indices`.
  pub ious: Vec<f32>,
}

impl AnchorMatch {
  pub fn best(&self) -> Option<usize> {
    self
      .indices
      .first()
      .filter(|index| **index != NO_ANCHOR)
      .map(|index| *index as usize)
  }
}

/// Ranks `anchors` (in pixels) for each box in `boxes` (normalized
/// `[x, y, w, h]`) by the IoU of their shapes, ignoring position.
///
/// Boxes with zero area map to [`NO_ANCHOR`] everywhere.
pub fn best_anchors(
  boxes: &[BoxCoords],
  anchors: &[[f32; 2]],
  width: f32,
  height: f32,
  iou_thresh: f32,
) -> Vec<AnchorMatch> {
  let normalized: Vec<[f32; 2]> = anchors.iter().map(|[w, h]| [w / width, h / height]).collect();

  boxes
    .iter()
    .map(|b| {
      let shape = [b[2], b[3]];
      let mut ranked: Vec<(usize, f32)> = normalized
        .iter()
        .enumerate()
        .map(|(i, anchor)| (i, wh_iou(shape, *anchor)))
        .collect();
      // Stable sort keeps the lower index first on ties.
      ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

      let has_area = shape[0] * shape[1] > 0.0;
      let indices = ranked
        .iter()
        .enumerate()
        .map(|(rank, (index, iou))| {
          if !has_area || (rank > 0 && *iou < iou_thresh) {
            NO_ANCHOR
          } else {
            *index as i32
          }
        })
        .collect();
      AnchorMatch {
        indices,
        ious: ranked.iter().map(|(_, iou)| *iou).collect(),
      }
    })
    .collect()
}

/// One ground-truth box written into a grid cell.
#[derive(Debug, Clone, PartialEq)]
pub struct GridEntry {
  pub row: usize,
  pub col: usize,
  /// Position of the matched anchor inside this level's mask.
  pub slot: usize,
  pub box_index: usize,
  pub bbox: BoxCoords,
  pub class: f32,
  pub iou: f32,
  /// How many of the box's ranked anchors fall in this level's mask.
  pub num_reps: usize,
}

/// Targets for one output level.
#[derive(Debug, Clone, PartialEq)]
pub struct GridTargets {
  pub size: usize,
  pub slots: usize,
  pub entries: Vec<GridEntry>,
  occupancy: Vec<f32>,
}

impl GridTargets {
  /// Number of boxes written to `(row, col, slot)`.
  pub fn occupancy(&self, row: usize, col: usize, slot: usize) -> f32 {
    self
      .occupancy
      .get((row * self.size + col) * self.slots + slot)
      .copied()
      .unwrap_or(0.0)
  }
}

/// A box is usable when it has some extent and its center lies inside the image.
fn is_valid_box(b: &BoxCoords) -> bool {
  let empty = b[2] <= 0.0 && b[3] <= 0.0;
  let outside = b[0] < 0.0 || b[1] < 0.0 || b[0] >= 1.0 || b[1] >= 1.0;
  !(empty || outside)
}

/// Writes the boxes whose matched anchors belong to `mask` into a `size x size`
/// grid. Primary (best) matches are written first; with `use_tie_breaker`,
/// alternate matches above the threshold follow. At most `max_instances`
/// entries are written, and none when `size` is zero.
pub fn build_grid_targets(
  boxes: &[BoxCoords],
  classes: &[f32],
  matches: &[AnchorMatch],
  mask: &[usize],
  size: usize,
  use_tie_breaker: bool,
  max_instances: usize,
) -> GridTargets {
  let slot_of = |anchor: i32| -> Option<usize> {
    if anchor == NO_ANCHOR {
      return None;
    }
    mask.iter().position(|m| *m as i32 == anchor)
  };

  let usable: Vec<usize> = (0..boxes.len().min(matches.len()))
    .filter(|i| is_valid_box(&boxes[*i]))
    .collect();

  let mut targets = GridTargets {
    size,
    slots: mask.len(),
    entries: Vec::new(),
    occupancy: vec![0.0; size * size * mask.len()],
  };
  if size == 0 {
    return targets;
  }

  let passes: &[bool] = if use_tie_breaker { &[true, false] } else { &[true] };
  'passes: for primary in passes {
    for &box_index in &usable {
      let found = &matches[box_index];
      let ranks = if *primary { 0..1 } else { 1..found.indices.len() };
      for rank in ranks {
        let Some(slot) = found.indices.get(rank).and_then(|anchor| slot_of(*anchor)) else {
          continue;
        };
        if targets.entries.len() >= max_instances {
          break 'passes;
        }
        let bbox = boxes[box_index];
        let row = ((bbox[1] * size as f32) as usize).min(size.saturating_sub(1));
        let col = ((bbox[0] * size as f32) as usize).min(size.saturating_sub(1));
        targets.occupancy[(row * size + col) * mask.len() + slot] += 1.0;
        targets.entries.push(GridEntry {
          row,
          col,
          slot,
          box_index,
          bbox,
          class: classes.get(box_index).copied().unwrap_or(0.0),
          iou: found.ious.get(rank).copied().unwrap_or(0.0),
          num_reps: found.indices.iter().filter(|a| slot_of(**a).is_some()).count(),
        });
      }
    }
  }
  targets
}
