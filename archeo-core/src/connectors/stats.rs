//! Sample reductions shared by connectors
//!
//! Each connector turns its raw samples into one scalar with one of these.
//! All reductions are deterministic for identical input order.

/// Arithmetic mean; `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation; `None` for an empty slice
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Fraction of samples that are present
pub fn valid_fraction(samples: &[Option<f64>]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().filter(|s| s.is_some()).count() as f64 / samples.len() as f64
}

/// Absolute difference between the mean of the centre cells and the mean of the rest
///
/// `grid` is row-major with `ncols` columns. The centre block is the middle
/// `core` x `core` cells (clamped to the grid). Missing cells are skipped.
/// `None` when the grid holds less than one full row or either side has no valid cells.
pub fn center_contrast(grid: &[Option<f64>], ncols: usize, core: usize) -> Option<f64> {
    if ncols == 0 || grid.len() < ncols {
        return None;
    }
    let nrows = grid.len() / ncols;
    let core_rows = core.clamp(1, nrows);
    let core_cols = core.clamp(1, ncols);
    let row0 = (nrows - core_rows) / 2;
    let col0 = (ncols - core_cols) / 2;

    let mut inner = Vec::new();
    let mut outer = Vec::new();
    for (idx, cell) in grid.iter().enumerate().take(nrows * ncols) {
        let Some(value) = *cell else { continue };
        let (r, c) = (idx / ncols, idx % ncols);
        let in_core = r >= row0 && r < row0 + core_rows && c >= col0 && c < col0 + core_cols;
        if in_core {
            inner.push(value);
        } else {
            outer.push(value);
        }
    }

    Some((mean(&inner)? - mean(&outer)?).abs())
}

/// Standard deviation of residuals after a least-squares plane fit z = a + b*x + c*y
///
/// Removes regional slope so only local relief remains. Falls back to the plain
/// standard deviation when the fit is degenerate (collinear or fewer than 4 points).
pub fn detrended_std(points: &[(f64, f64, f64)]) -> Option<f64> {
    if points.is_empty() {
        return None;
    }
    let zs: Vec<f64> = points.iter().map(|p| p.2).collect();
    if points.len() < 4 {
        return std_dev(&zs);
    }

    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let my = points.iter().map(|p| p.1).sum::<f64>() / n;
    let mz = points.iter().map(|p| p.2).sum::<f64>() / n;

    let (mut sxx, mut syy, mut sxy, mut sxz, mut syz) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for &(x, y, z) in points {
        let (dx, dy, dz) = (x - mx, y - my, z - mz);
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
        sxz += dx * dz;
        syz += dy * dz;
    }

    let det = sxx * syy - sxy * sxy;
    if det.abs() < 1e-18 {
        return std_dev(&zs);
    }
    let b = (sxz * syy - syz * sxy) / det;
    let c = (syz * sxx - sxz * sxy) / det;

    let residuals: Vec<f64> = points
        .iter()
        .map(|&(x, y, z)| z - (mz + b * (x - mx) + c * (y - my)))
        .collect();
    std_dev(&residuals)
}
