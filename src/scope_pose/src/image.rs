//! Dense 2D grids indexed by `(i, j)` = (column, row).

/// Row-major 2D grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid2<T> {
    width: usize,
    height: usize,
    data: Vec<T>,
}

impl<T: Clone> Grid2<T> {
    pub fn new(width: usize, height: usize, fill: T) -> Self {
        Self {
            width,
            height,
            data: vec![fill; width * height],
        }
    }
}

impl<T> Grid2<T> {
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> &T {
        &self.data[j * self.width + i]
    }

    #[inline]
    pub fn get_mut(&mut self, i: usize, j: usize) -> &mut T {
        &mut self.data[j * self.width + i]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: T) {
        self.data[j * self.width + i] = value;
    }

    /// Signed-coordinate lookup; `None` outside the grid.
    #[inline]
    pub fn get_signed(&self, i: i64, j: i64) -> Option<&T> {
        if self.contains(i, j) {
            Some(self.get(i as usize, j as usize))
        } else {
            None
        }
    }

    #[inline]
    pub fn contains(&self, i: i64, j: i64) -> bool {
        i >= 0 && j >= 0 && (i as usize) < self.width && (j as usize) < self.height
    }

    /// All `(i, j)` coordinates in row-major order.
    pub fn coords(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.height).flat_map(move |j| (0..self.width).map(move |i| (i, j)))
    }

    /// In-bounds cells of the `(2r+1)²` window centered on `(i, j)`.
    pub fn window(&self, i: usize, j: usize, r: usize) -> impl Iterator<Item = (usize, usize)> {
        let (w, h) = (self.width, self.height);
        let i0 = i.saturating_sub(r);
        let j0 = j.saturating_sub(r);
        let i1 = (i + r).min(w.saturating_sub(1));
        let j1 = (j + r).min(h.saturating_sub(1));
        (j0..=j1).flat_map(move |jj| (i0..=i1).map(move |ii| (ii, jj)))
    }

    pub fn map<U>(&self, f: impl Fn(&T) -> U) -> Grid2<U> {
        Grid2 {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(f).collect(),
        }
    }
}

impl Grid2<f64> {
    pub fn max_value(&self) -> f64 {
        self.data.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
    }

    /// One pass of a separable `[1 2 1] / 4` binomial blur, clamped at borders.
    pub fn blurred(&self) -> Grid2<f64> {
        let (w, h) = (self.width, self.height);
        if w == 0 || h == 0 {
            return self.clone();
        }
        let at = |g: &Grid2<f64>, i: i64, j: i64| {
            let ii = i.clamp(0, w as i64 - 1) as usize;
            let jj = j.clamp(0, h as i64 - 1) as usize;
            *g.get(ii, jj)
        };
        let mut horiz = Grid2::new(w, h, 0.0);
        for (i, j) in self.coords() {
            let (ii, jj) = (i as i64, j as i64);
            horiz.set(
                i,
                j,
                0.25 * at(self, ii - 1, jj) + 0.5 * at(self, ii, jj) + 0.25 * at(self, ii + 1, jj),
            );
        }
        let mut out = Grid2::new(w, h, 0.0);
        for (i, j) in self.coords() {
            let (ii, jj) = (i as i64, j as i64);
            out.set(
                i,
                j,
                0.25 * at(&horiz, ii, jj - 1) + 0.5 * at(&horiz, ii, jj) + 0.25 * at(&horiz, ii, jj + 1),
            );
        }
        out
    }

    /// Central-difference gradient `(∂/∂i, ∂/∂j)`, one-sided at borders.
    pub fn gradient_at(&self, i: usize, j: usize) -> (f64, f64) {
        let diff = |lo: usize, hi: usize, f: &dyn Fn(usize) -> f64| {
            if hi > lo {
                (f(hi) - f(lo)) / (hi - lo) as f64
            } else {
                0.0
            }
        };
        let di = diff(
            i.saturating_sub(1),
            (i + 1).min(self.width - 1),
            &|ii| *self.get(ii, j),
        );
        let dj = diff(
            j.saturating_sub(1),
            (j + 1).min(self.height - 1),
            &|jj| *self.get(i, jj),
        );
        (di, dj)
    }
}
