//! Whole-row DEM optimization for ground-to-image batches.
//!
//! A warp against a geodetic target grid asks for long rows of points that
//! share one latitude; when the DEM is in the native geodetic frame and
//! axis-aligned, the whole row maps into a single strip of DEM rows, so one
//! bulk read replaces thousands of per-point lookups. Everything after the
//! read mirrors the per-point path exactly.

use tracing::debug;

use rpt_core::DemInterpolation;

use crate::dem::{bilinear_from_quad, cubic_from_window, is_nodata};
use crate::transformer::{INVALID_COORDINATE, RpcTransformer};

/// Minimum batch size for the optimization to pay for itself.
const MIN_POINTS_FOR_ROW_OPTIMIZATION: usize = 10;

impl RpcTransformer {
    /// Attempt the whole-row optimization. `None` means the batch does not
    /// qualify and the caller must fall back to the per-point path.
    pub(crate) fn try_transform_row_with_dem(
        &mut self,
        xs: &mut [f64],
        ys: &mut [f64],
        zs: &[f64],
        success: &mut [bool],
    ) -> Option<bool> {
        let point_count = xs.len();
        if point_count < MIN_POINTS_FOR_ROW_OPTIMIZATION || !self.row_optimization {
            return None;
        }

        let (interpolation, inverse_gt, raster_size) = {
            let dem = self.dem.as_ref()?;
            if dem.coord_transform.is_some() {
                return None;
            }
            (dem.interpolation, dem.inv_geo_transform, dem.raster_size)
        };

        // Axis-aligned DEM only: no rotation or shear, west-to-east columns.
        let igt = inverse_gt.0;
        if !(igt[1] > 0.0 && igt[2] == 0.0 && igt[4] == 0.0) {
            return None;
        }

        // Cheap same-latitude screen on first, middle, last before scanning
        // the whole row.
        if ys[0] != ys[point_count - 1] || ys[0] != ys[point_count / 2] {
            return None;
        }
        let mut min_x = xs[0];
        let mut max_x = xs[0];
        for i in 1..point_count {
            if ys[i] != ys[0] {
                return None;
            }
            min_x = min_x.min(xs[i]);
            max_x = max_x.max(xs[i]);
        }

        let (mut x1, mut y1) = inverse_gt.apply(min_x, ys[0]);
        let (mut x2, _) = inverse_gt.apply(max_x, ys[0]);
        if interpolation != DemInterpolation::Near {
            // Center-of-pixel convention for reading the image data.
            x1 -= 0.5;
            y1 -= 0.5;
            x2 -= 0.5;
        }

        let mut x_left = x1.floor() as i64;
        let mut width = x2.floor() as i64 - x_left + 1;
        let mut y_top = y1.floor() as i64;
        let height: i64 = match interpolation {
            DemInterpolation::Cubic => {
                x_left -= 1;
                width += 3;
                y_top -= 1;
                4
            }
            DemInterpolation::Bilinear => {
                width += 1;
                2
            }
            DemInterpolation::Near => 1,
        };

        let (raster_width, raster_height) = raster_size;
        if x_left < 0
            || x_left + width > raster_width as i64
            || y_top < 0
            || y_top + height > raster_height as i64
        {
            return None;
        }

        Some(self.transform_row_with_window(
            xs,
            ys,
            zs,
            success,
            x_left as usize,
            width as usize,
            y_top as usize,
            height as usize,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn transform_row_with_window(
        &mut self,
        xs: &mut [f64],
        ys: &mut [f64],
        zs: &[f64],
        success: &mut [bool],
        x_left: usize,
        width: usize,
        y_top: usize,
        height: usize,
    ) -> bool {
        debug!("transforming a whole row against one DEM window ({width}x{height})");

        let (window, nodata, interpolation, igt) = {
            let Some(dem) = self.dem.as_ref() else {
                // Applicability already proved a DEM exists.
                return false;
            };
            let window = match dem.read_window(x_left, y_top, width, height) {
                Ok(window) => window,
                Err(error) => {
                    debug!("bulk DEM read failed: {error}");
                    for i in 0..xs.len() {
                        success[i] = false;
                        xs[i] = INVALID_COORDINATE;
                        ys[i] = INVALID_COORDINATE;
                    }
                    return false;
                }
            };
            (window, dem.nodata, dem.interpolation, dem.inv_geo_transform.0)
        };

        // The shared row in center-of-pixel convention; unused by the
        // nearest kernel.
        let row_y = igt[3] + ys[0] * igt[5] - 0.5;
        let dy = row_y - row_y.floor();

        let mut all_ok = true;
        for i in 0..xs.len() {
            if xs[i] == INVALID_COORDINATE {
                all_ok = false;
                success[i] = false;
                continue;
            }

            let dem_value = match interpolation {
                DemInterpolation::Cubic => {
                    let x = igt[0] + xs[i] * igt[1] - 0.5;
                    let col = x.floor() as i64;
                    let dx = x - col as f64;
                    let col0 = (col - 1 - x_left as i64) as usize;
                    let mut samples = [0.0; 16];
                    for ky in 0..4 {
                        for kx in 0..4 {
                            samples[ky * 4 + kx] = window[[ky, col0 + kx]];
                        }
                    }
                    cubic_from_window(&samples, dx, dy, nodata)
                }
                DemInterpolation::Bilinear => {
                    let x = igt[0] + xs[i] * igt[1] - 0.5;
                    let col = x.floor() as i64;
                    let dx = x - col as f64;
                    let col0 = (col - x_left as i64) as usize;
                    let samples = [
                        window[[0, col0]],
                        window[[0, col0 + 1]],
                        window[[1, col0]],
                        window[[1, col0 + 1]],
                    ];
                    bilinear_from_quad(samples, dx, dy, nodata)
                }
                DemInterpolation::Near => {
                    let x = igt[0] + xs[i] * igt[1];
                    let col = (x.floor() as i64 - x_left as i64) as usize;
                    let value = window[[0, col]];
                    match nodata {
                        Some(nodata) if is_nodata(nodata, value) => None,
                        _ => Some(value),
                    }
                }
            };

            // Missing-value fallback, footprint test and height composition
            // all mirror the per-point path.
            let dem_value = match dem_value.or(self.dem.as_ref().and_then(|d| d.missing_value)) {
                Some(value) => value,
                None => {
                    all_ok = false;
                    success[i] = false;
                    xs[i] = INVALID_COORDINATE;
                    ys[i] = INVALID_COORDINATE;
                    continue;
                }
            };

            if let Some(footprint) = &self.footprint {
                if !footprint.contains(xs[i], ys[i]) {
                    all_ok = false;
                    success[i] = false;
                    xs[i] = INVALID_COORDINATE;
                    ys[i] = INVALID_COORDINATE;
                    continue;
                }
            }

            let ground_height =
                zs[i] + self.opts.height_offset + dem_value * self.opts.height_scale;
            let (pixel, line) = self.model.project(&self.evaluator, xs[i], ys[i], ground_height);
            xs[i] = pixel;
            ys[i] = line;
            success[i] = true;
        }

        all_ok
    }
}
