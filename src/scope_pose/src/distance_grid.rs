//! Voxelized nearest-surface lookup for a rigid model.
//!
//! Every voxel over the model's padded bounding box stores the index of
//! the nearest occupied ("surface") voxel and the distance to it. Occupied
//! voxels also keep up to two model point indices, so a nearest-neighbor
//! query is one voxel lookup plus at most two exact distance checks.

use anyhow::{bail, Result};
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use nalgebra::Vector3;
use tracing::debug;

/// Bucket size for the occupied-voxel tree.
const BUCKET_SIZE: usize = 256;

/// Dense nearest-surface field over a model's bounding volume.
#[derive(Debug, Clone)]
pub struct DistanceGrid {
    /// Voxel counts along x, y, z.
    pub dims: [usize; 3],
    /// Voxel side length.
    pub res: f64,
    /// Corner of voxel `(0, 0, 0)`.
    pub min: Vector3<f64>,
    /// Nearest occupied voxel per voxel.
    nearest: Vec<Option<usize>>,
    /// Distance to the nearest occupied voxel.
    distance: Vec<f64>,
    /// Up to two model points per voxel.
    cell_points: Vec<[Option<usize>; 2]>,
    points: Vec<Vector3<f64>>,
    normals: Option<Vec<Vector3<f64>>>,
}

impl DistanceGrid {
    /// Compute the field from model points.
    ///
    /// # Arguments
    /// * `points` - Model surface points
    /// * `normals` - Optional per-point normals, for [`Self::find_nn_with_normal`]
    /// * `res` - Voxel side length
    /// * `padding` - Extra voxels on every side of the bounding box
    pub fn build(
        points: &[Vector3<f64>],
        normals: Option<&[Vector3<f64>]>,
        res: f64,
        padding: usize,
    ) -> Result<Self> {
        if points.is_empty() {
            bail!("cannot build a distance grid without points");
        }
        if !(res > 0.0) {
            bail!("distance grid resolution must be positive, got {res}");
        }
        let mut lo = points[0];
        let mut hi = points[0];
        for p in points {
            lo = lo.inf(p);
            hi = hi.sup(p);
        }
        let pad = padding as f64 * res;
        let min = lo - Vector3::repeat(pad);
        let dims = [0, 1, 2].map(|a| ((hi[a] - min[a]) / res).floor() as usize + 1 + padding);

        let mut grid = Self::empty(dims, res, min, points, normals)?;
        let occupied: Vec<usize> = (0..grid.num_voxels())
            .filter(|&v| grid.cell_points[v][0].is_some())
            .collect();
        let centers: Vec<[f64; 3]> = occupied
            .iter()
            .map(|&v| {
                let c = grid.voxel_center(v);
                [c.x, c.y, c.z]
            })
            .collect();
        let tree: ImmutableKdTree<f64, u64, 3, BUCKET_SIZE> = (&*centers).into();

        for v in 0..grid.num_voxels() {
            let c = grid.voxel_center(v);
            let nn = tree.nearest_one::<SquaredEuclidean>(&[c.x, c.y, c.z]);
            grid.nearest[v] = Some(occupied[nn.item as usize]);
            grid.distance[v] = nn.distance.max(0.0).sqrt();
        }
        debug!(
            "built distance grid {}x{}x{} with {} surface voxels",
            dims[0],
            dims[1],
            dims[2],
            occupied.len()
        );
        Ok(grid)
    }

    /// Attach a precomputed field (as loaded from disk) to model points.
    ///
    /// The per-voxel point lists are rebuilt by bucketing `points`.
    pub fn from_parts(
        dims: [usize; 3],
        res: f64,
        min: Vector3<f64>,
        nearest: Vec<Option<usize>>,
        distance: Vec<f64>,
        points: &[Vector3<f64>],
        normals: Option<&[Vector3<f64>]>,
    ) -> Result<Self> {
        let n = dims[0] * dims[1] * dims[2];
        if nearest.len() != n || distance.len() != n {
            bail!(
                "distance grid field has {} / {} entries, expected {}",
                nearest.len(),
                distance.len(),
                n
            );
        }
        if let Some(bad) = nearest.iter().flatten().find(|&&v| v >= n) {
            bail!("nearest voxel index {bad} out of range");
        }
        let mut grid = Self::empty(dims, res, min, points, normals)?;
        grid.nearest = nearest;
        grid.distance = distance;
        Ok(grid)
    }

    fn empty(
        dims: [usize; 3],
        res: f64,
        min: Vector3<f64>,
        points: &[Vector3<f64>],
        normals: Option<&[Vector3<f64>]>,
    ) -> Result<Self> {
        if !(res > 0.0) {
            bail!("distance grid resolution must be positive, got {res}");
        }
        if let Some(n) = normals {
            if n.len() != points.len() {
                bail!("{} normals for {} points", n.len(), points.len());
            }
        }
        let num = dims[0] * dims[1] * dims[2];
        let mut grid = Self {
            dims,
            res,
            min,
            nearest: vec![None; num],
            distance: vec![f64::INFINITY; num],
            cell_points: vec![[None, None]; num],
            points: points.to_vec(),
            normals: normals.map(<[_]>::to_vec),
        };
        grid.bucket_points();
        Ok(grid)
    }

    /// Keep the two points closest to each voxel center.
    fn bucket_points(&mut self) {
        for (k, p) in self.points.iter().enumerate() {
            let Some(v) = self.voxel_of(p) else {
                continue;
            };
            let c = self.voxel_center(v);
            let d = (p - c).norm_squared();
            let slot = &mut self.cell_points[v];
            let dist_of = |i: Option<usize>| i.map_or(f64::INFINITY, |i| (self.points[i] - c).norm_squared());
            let (d0, d1) = (dist_of(slot[0]), dist_of(slot[1]));
            if d < d0 {
                slot[1] = slot[0];
                slot[0] = Some(k);
            } else if d < d1 {
                slot[1] = Some(k);
            }
        }
    }

    #[inline]
    pub fn num_voxels(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    #[inline]
    fn flat(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.dims[0] * (j + self.dims[1] * k)
    }

    #[inline]
    fn unflat(&self, v: usize) -> [usize; 3] {
        let i = v % self.dims[0];
        let j = (v / self.dims[0]) % self.dims[1];
        let k = v / (self.dims[0] * self.dims[1]);
        [i, j, k]
    }

    fn voxel_center(&self, v: usize) -> Vector3<f64> {
        let [i, j, k] = self.unflat(v);
        self.min + Vector3::new(i as f64 + 0.5, j as f64 + 0.5, k as f64 + 0.5) * self.res
    }

    /// Voxel containing `p`, `None` outside the grid.
    pub fn voxel_of(&self, p: &Vector3<f64>) -> Option<usize> {
        let rel = (p - self.min) / self.res;
        let mut ijk = [0usize; 3];
        for a in 0..3 {
            let c = rel[a].floor();
            if !(c >= 0.0) || c as usize >= self.dims[a] {
                return None;
            }
            ijk[a] = c as usize;
        }
        Some(self.flat(ijk[0], ijk[1], ijk[2]))
    }

    /// Distance returned for points outside the grid.
    pub fn outside_distance(&self) -> f64 {
        self.res * (self.dims[0] + self.dims[1] + self.dims[2]) as f64
    }

    /// Precomputed distance from `p`'s voxel to the nearest surface voxel.
    pub fn get_distance(&self, p: &Vector3<f64>) -> f64 {
        match self.voxel_of(p) {
            Some(v) if self.distance[v].is_finite() => self.distance[v],
            _ => self.outside_distance(),
        }
    }

    /// Nearest model point as `(index, squared distance)`.
    ///
    /// Returns `None` outside the grid or when the nearest surface voxel
    /// holds no point.
    pub fn find_nn(&self, p: &Vector3<f64>) -> Option<(usize, f64)> {
        let v = self.voxel_of(p)?;
        let u = self.nearest[v]?;
        self.cell_points[u]
            .iter()
            .flatten()
            .map(|&k| (k, (self.points[k] - p).norm_squared()))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    }

    /// Nearest model point under the joint cost
    /// `xyz_weight²·|Δp|² + normal_weight²·|Δn|²`, searched over the
    /// `(2r+1)³` voxels around the nearest surface voxel.
    ///
    /// Falls back to [`Self::find_nn`] when the model has no normals.
    pub fn find_nn_with_normal(
        &self,
        p: &Vector3<f64>,
        n: &Vector3<f64>,
        xyz_weight: f64,
        normal_weight: f64,
        radius: usize,
    ) -> Option<usize> {
        let Some(normals) = self.normals.as_ref() else {
            return self.find_nn(p).map(|(k, _)| k);
        };
        let v = self.voxel_of(p)?;
        let u = self.nearest[v]?;
        let [ci, cj, ck] = self.unflat(u);
        let range = |c: usize, dim: usize| c.saturating_sub(radius)..=(c + radius).min(dim - 1);

        let (wx, wn) = (xyz_weight * xyz_weight, normal_weight * normal_weight);
        let mut best: Option<(usize, f64)> = None;
        for k in range(ck, self.dims[2]) {
            for j in range(cj, self.dims[1]) {
                for i in range(ci, self.dims[0]) {
                    for &idx in self.cell_points[self.flat(i, j, k)].iter().flatten() {
                        let cost = wx * (self.points[idx] - p).norm_squared()
                            + wn * (normals[idx] - n).norm_squared();
                        if best.map_or(true, |(_, c)| cost < c) {
                            best = Some((idx, cost));
                        }
                    }
                }
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Nearest-voxel field, for serialization.
    pub fn nearest_field(&self) -> &[Option<usize>] {
        &self.nearest
    }

    /// Distance field, for serialization.
    pub fn distance_field(&self) -> &[f64] {
        &self.distance
    }
}
