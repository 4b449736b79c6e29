use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use yolo_ops::anchors::{anchor_masks, best_anchors, build_grid_targets};
use yolo_ops::box_ops::{ciou, giou, BoxFormat};
use yolo_ops::kmeans::AnchorKMeans;

const COCO_ANCHORS: [[f32; 2]; 9] = [
  [10.0, 13.0],
  [16.0, 30.0],
  [33.0, 23.0],
  [30.0, 61.0],
  [62.0, 45.0],
  [59.0, 119.0],
  [116.0, 90.0],
  [156.0, 198.0],
  [373.0, 326.0],
];

fn random_boxes(n: usize) -> Vec<[f32; 4]> {
  let mut rng = Pcg64::seed_from_u64(0);
  (0..n)
    .map(|_| {
      [
        rng.random_range(0.05..0.95),
        rng.random_range(0.05..0.95),
        rng.random_range(0.01..0.5),
        rng.random_range(0.01..0.5),
      ]
    })
    .collect()
}

fn bench_iou(c: &mut Criterion) {
  let boxes = random_boxes(1024);
  let mut group = c.benchmark_group("iou");
  group.throughput(Throughput::Elements(boxes.len() as u64));
  group.bench_function("giou", |b| {
    b.iter(|| {
      for pair in boxes.windows(2) {
        black_box(giou(pair[0], pair[1], BoxFormat::Xcycwh));
      }
    })
  });
  group.bench_function("ciou", |b| {
    b.iter(|| {
      for pair in boxes.windows(2) {
        black_box(ciou(pair[0], pair[1], BoxFormat::Xcycwh));
      }
    })
  });
  group.finish();
}

fn bench_targets(c: &mut Criterion) {
  let boxes = random_boxes(100);
  let classes = vec![0.0; boxes.len()];
  let masks = anchor_masks(3, 5, 3);
  c.bench_function("best_anchors_and_grid_targets", |b| {
    b.iter(|| {
      let matches = best_anchors(black_box(&boxes), &COCO_ANCHORS, 416.0, 416.0, 0.213);
      for (level, mask) in &masks {
        let size = 416 >> level;
        black_box(build_grid_targets(&boxes, &classes, &matches, mask, size, true, 200));
      }
    })
  });
}

fn bench_kmeans(c: &mut Criterion) {
  let shapes: Vec<[f32; 2]> = random_boxes(2000).iter().map(|b| [b[2], b[3]]).collect();
  c.bench_function("anchor_kmeans_k9", |b| {
    b.iter(|| AnchorKMeans::new(9).seed(5).max_iter(100).fit(black_box(&shapes)))
  });
}

criterion_group!(benches, bench_iou, bench_targets, bench_kmeans);
criterion_main!(benches);
