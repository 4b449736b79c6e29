//! K-means over box shapes for choosing anchor priors.
//!
//! Distance is `1 - IoU` between `(width, height)` pairs, so large and small
//! boxes are clustered by shape rather than by absolute size.

use crate::box_ops::wh_iou;
use crate::error::{Error, Result};

use rand::{seq::index, SeedableRng};
use rand_pcg::Pcg64;
use tracing::{debug, warn};

pub const DEFAULT_MAX_ITER: usize = 300;

#[derive(Debug, Clone)]
pub struct AnchorKMeans {
  k: usize,
  max_iter: usize,
  seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
  /// Cluster centers, smallest area first.
  pub centroids: Vec<[f32; 2]>,
  /// Cluster of each input box, indexing into `centroids`.
  pub assignments: Vec<usize>,
  pub iterations: usize,
  /// Mean IoU of every box with its centroid.
  pub mean_iou: f32,
}

impl AnchorKMeans {
  pub fn new(k: usize) -> Self {
    Self {
      k,
      max_iter: DEFAULT_MAX_ITER,
      seed: None,
    }
  }

  pub fn max_iter(mut self, max_iter: usize) -> Self {
    self.max_iter = max_iter;
    self
  }

  /// Fixes the initial centroid draw. Unseeded runs draw from the thread RNG.
  pub fn seed(mut self, seed: u64) -> Self {
    self.seed = Some(seed);
    self
  }

  pub fn fit(&self, boxes: &[[f32; 2]]) -> Result<KMeansResult> {
    if self.k == 0 {
      return Err(Error::InvalidArgument {
        name: "k",
        message: "must be at least 1".to_string(),
      });
    }
    if boxes.len() < self.k {
      return Err(Error::NotEnoughBoxes {
        boxes: boxes.len(),
        k: self.k,
      });
    }
    if let Some(bad) = boxes.iter().position(|b| !(b[0] > 0.0 && b[1] > 0.0)) {
      return Err(Error::InvalidArgument {
        name: "boxes",
        message: format!("box {} has no area: {:?}", bad, boxes[bad]),
      });
    }

    let mut rng = match self.seed {
      Some(seed) => Pcg64::seed_from_u64(seed),
      None => Pcg64::from_rng(&mut rand::rng()),
    };
    let mut centroids: Vec<[f32; 2]> = index::sample(&mut rng, boxes.len(), self.k)
      .into_iter()
      .map(|i| boxes[i])
      .collect();

    let mut assignments: Option<Vec<usize>> = None;
    let mut iterations = 0;
    while iterations < self.max_iter {
      let current: Vec<usize> = boxes.iter().map(|b| nearest(*b, &centroids)).collect();
      if assignments.as_ref() == Some(&current) {
        break;
      }
      for (cluster, centroid) in centroids.iter_mut().enumerate() {
        let (mut sum, mut count) = ([0.0f32; 2], 0usize);
        for (b, _) in boxes.iter().zip(&current).filter(|(_, c)| **c == cluster) {
          sum[0] += b[0];
          sum[1] += b[1];
          count += 1;
        }
        // An empty cluster keeps its previous center.
        if count > 0 {
          *centroid = [sum[0] / count as f32, sum[1] / count as f32];
        }
      }
      assignments = Some(current);
      iterations += 1;
    }
    if iterations == self.max_iter {
      warn!(max_iter = self.max_iter, "Anchor k-means stopped before converging.");
    }

    let mut order: Vec<usize> = (0..self.k).collect();
    order.sort_by(|a, b| {
      let area = |c: &[f32; 2]| c[0] * c[1];
      area(&centroids[*a]).total_cmp(&area(&centroids[*b]))
    });
    let sorted: Vec<[f32; 2]> = order.iter().map(|i| centroids[*i]).collect();
    let assignments: Vec<usize> = boxes.iter().map(|b| nearest(*b, &sorted)).collect();
    let mean_iou = boxes
      .iter()
      .zip(&assignments)
      .map(|(b, c)| wh_iou(*b, sorted[*c]))
      .sum::<f32>()
      / boxes.len() as f32;

    debug!(k = self.k, iterations, mean_iou, "Anchor k-means finished.");
    Ok(KMeansResult {
      centroids: sorted,
      assignments,
      iterations,
      mean_iou,
    })
  }
}

fn nearest(b: [f32; 2], centroids: &[[f32; 2]]) -> usize {
  centroids
    .iter()
    .enumerate()
    .map(|(i, c)| (i, 1.0 - wh_iou(b, *c)))
    .min_by(|a, b| a.1.total_cmp(&b.1))
    .map(|(i, _)| i)
    .unwrap_or(0)
}

/// Renders normalized centroids as `(w, h)` pixel pairs at `scale`, the form
/// manifests list anchors in.
pub fn format_anchors(centroids: &[[f32; 2]], scale: f32) -> Vec<String> {
  centroids
    .iter()
    .map(|c| format!("({}, {})", (c[0] * scale).round(), (c[1] * scale).round()))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn rejects_too_few_boxes() {
    let err = AnchorKMeans::new(3).fit(&[[0.1, 0.1], [0.2, 0.2]]).unwrap_err();
    assert_eq!(err, Error::NotEnoughBoxes { boxes: 2, k: 3 });
  }

  #[test]
  fn rejects_empty_boxes() {
    let err = AnchorKMeans::new(1).fit(&[[0.1, 0.0]]).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { name: "boxes", .. }));
  }

  #[test]
  fn k_equal_to_boxes_returns_sorted_boxes() {
    let boxes = [[0.5, 0.5], [0.1, 0.1], [0.3, 0.2]];
    let result = AnchorKMeans::new(3).seed(7).fit(&boxes).unwrap();
    assert_eq!(result.centroids, vec![[0.1, 0.1], [0.3, 0.2], [0.5, 0.5]]);
    assert_eq!(result.assignments, vec![2, 0, 1]);
    assert!((result.mean_iou - 1.0).abs() < 1e-6);
  }

  #[test]
  fn formats_pixel_pairs() {
    assert_eq!(
      format_anchors(&[[10.0 / 416.0, 13.0 / 416.0]], 416.0),
      vec!["(10, 13)".to_string()]
    );
  }
}
