//! Windowed k-means over range-image cells in a joint position, normal
//! and color space.

use nalgebra::Vector3;
use tracing::debug;

use crate::image::Grid2;
use crate::params::SegmentationParams;
use crate::range_image::RangeImage;

/// Per-cell features used for clustering.
struct CellFeatures<'a> {
    image: &'a RangeImage,
    wx: f64,
    wn: f64,
    wl: f64,
}

#[derive(Debug, Clone)]
struct Cluster {
    /// Mean pixel position `(i, j)`.
    pixel: (f64, f64),
    point: Vector3<f64>,
    normal: Vector3<f64>,
    lab: Vector3<f64>,
}

impl CellFeatures<'_> {
    fn cost(&self, c: &Cluster, i: usize, j: usize) -> f64 {
        let mut d = self.wx * (self.image.points.get(i, j) - c.point).norm_squared();
        if let Some(normals) = &self.image.normals {
            d += self.wn * (normals.get(i, j) - c.normal).norm_squared();
        }
        if let Some(labs) = &self.image.labs {
            d += self.wl * (labs.get(i, j) - c.lab).norm_squared();
        }
        d
    }

    fn cluster_at(&self, i: usize, j: usize) -> Cluster {
        Cluster {
            pixel: (i as f64, j as f64),
            point: *self.image.points.get(i, j),
            normal: self.image.normals.as_ref().map_or(Vector3::zeros(), |n| *n.get(i, j)),
            lab: self.image.labs.as_ref().map_or(Vector3::zeros(), |l| *l.get(i, j)),
        }
    }
}

/// Grid seeds snapped to the nearest occupied cell within half a spacing.
fn seed_clusters(features: &CellFeatures, spacing: usize) -> Vec<Cluster> {
    let image = features.image;
    let (w, h) = (image.width(), image.height());
    if w == 0 || h == 0 {
        return Vec::new();
    }
    let half = spacing / 2;
    let mut taken = Grid2::new(w, h, false);
    let mut seeds = Vec::new();
    for cj in (half.min(h - 1)..h).step_by(spacing) {
        for ci in (half.min(w - 1)..w).step_by(spacing) {
            let best = image
                .image
                .window(ci, cj, half)
                .filter(|&(i, j)| image.is_occupied(i, j) && !*taken.get(i, j))
                .min_by_key(|&(i, j)| {
                    let di = i as i64 - ci as i64;
                    let dj = j as i64 - cj as i64;
                    di * di + dj * dj
                });
            if let Some((i, j)) = best {
                taken.set(i, j, true);
                seeds.push(features.cluster_at(i, j));
            }
        }
    }
    seeds
}

/// One assignment pass. Returns per-cell labels and the total cost.
fn assign(features: &CellFeatures, clusters: &[Cluster], radius: usize) -> (Grid2<Option<usize>>, f64) {
    let image = features.image;
    let (w, h) = (image.width(), image.height());
    let mut best: Grid2<(Option<usize>, f64)> = Grid2::new(w, h, (None, f64::INFINITY));
    for (c, cluster) in clusters.iter().enumerate() {
        let ci = (cluster.pixel.0.round().max(0.0) as usize).min(w - 1);
        let cj = (cluster.pixel.1.round().max(0.0) as usize).min(h - 1);
        for (i, j) in image.image.window(ci, cj, radius) {
            if !image.is_occupied(i, j) {
                continue;
            }
            let d = features.cost(cluster, i, j);
            if d < best.get(i, j).1 {
                best.set(i, j, (Some(c), d));
            }
        }
    }

    // Cells no window reached go to the globally cheapest cluster
    let mut cost = 0.0;
    let mut labels = Grid2::new(w, h, None);
    for (i, j) in image.occupied_cells() {
        let (mut label, mut d) = *best.get(i, j);
        if label.is_none() {
            for (c, cluster) in clusters.iter().enumerate() {
                let dc = features.cost(cluster, i, j);
                if dc < d {
                    label = Some(c);
                    d = dc;
                }
            }
        }
        if label.is_some() {
            cost += d;
        }
        labels.set(i, j, label);
    }
    (labels, cost)
}

/// Recompute cluster means, dropping clusters with fewer than `min_cells`
/// members.
fn update(features: &CellFeatures, labels: &Grid2<Option<usize>>, k: usize, min_cells: usize) -> Vec<Cluster> {
    let zero = Cluster {
        pixel: (0.0, 0.0),
        point: Vector3::zeros(),
        normal: Vector3::zeros(),
        lab: Vector3::zeros(),
    };
    let mut sums = vec![zero; k];
    let mut counts = vec![0usize; k];
    for (i, j) in labels.coords() {
        let Some(c) = *labels.get(i, j) else {
            continue;
        };
        let cell = features.cluster_at(i, j);
        let s = &mut sums[c];
        s.pixel.0 += cell.pixel.0;
        s.pixel.1 += cell.pixel.1;
        s.point += cell.point;
        s.normal += cell.normal;
        s.lab += cell.lab;
        counts[c] += 1;
    }
    sums.into_iter()
        .zip(counts)
        .filter(|(_, n)| *n >= min_cells.max(1))
        .map(|(s, n)| {
            let n = n as f64;
            let normal = s.normal / n;
            Cluster {
                pixel: (s.pixel.0 / n, s.pixel.1 / n),
                point: s.point / n,
                normal: if normal.norm() > 1e-12 {
                    normal.normalize()
                } else {
                    normal
                },
                lab: s.lab / n,
            }
        })
        .collect()
}

/// Cluster the occupied cells of `image` into superpixels.
///
/// Returns a label per cell (`None` for empty cells) with labels in
/// `0..num_clusters`.
pub(super) fn superpixels(image: &RangeImage, params: &SegmentationParams) -> (Grid2<Option<usize>>, usize) {
    let features = CellFeatures {
        image,
        wx: 1.0 / (params.xyz_sigma * params.xyz_sigma),
        wn: 1.0 / (params.normal_sigma * params.normal_sigma),
        wl: 1.0 / (params.lab_sigma * params.lab_sigma),
    };
    let spacing = params.resolution.max(1);
    let mut clusters = seed_clusters(&features, spacing);
    if clusters.is_empty() {
        return (Grid2::new(image.width(), image.height(), None), 0);
    }

    let mut prev_cost = f64::INFINITY;
    let mut iterations = 0;
    for _ in 0..params.max_iterations {
        iterations += 1;
        let (labels, cost) = assign(&features, &clusters, spacing);
        let updated = update(&features, &labels, clusters.len(), params.min_cells);
        if updated.is_empty() {
            break;
        }
        clusters = updated;
        if (prev_cost - cost).abs() < params.cost_tolerance {
            break;
        }
        prev_cost = cost;
    }

    let (labels, _) = assign(&features, &clusters, spacing);
    debug!(
        "superpixel k-means: {} clusters after {} iterations",
        clusters.len(),
        iterations
    );
    (labels, clusters.len())
}
