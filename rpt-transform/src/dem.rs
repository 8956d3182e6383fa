//! Elevation sampling against an auxiliary DEM raster.
//!
//! The kernel math here is shared, sample for sample, with the batch row
//! optimizer so that the two paths stay observationally identical.

use std::fmt;

use gdal::Dataset;
use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use ndarray::Array2;
use tracing::debug;

use rpt_core::{DemInterpolation, GeoTransform, RpcModel, TransformOptions};

use crate::cache::{self, BLOCK_SIZE, ElevationBlockCache};
use crate::error::{Result, TransformerError};

/// Tolerance of the empirical no-op test for the DEM coordinate transform.
const NOOP_PROBE_TOLERANCE: f64 = 1e-12;

/// Raw DEM lookup result. `value` is the interpolated raster value before
/// height offset/scale composition; `dem_pixel`/`dem_line` report where the
/// raster was probed, which the inverse solver needs for its snap fallback.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DemLookup {
    pub value: Option<f64>,
    pub vdatum_shift: f64,
    pub dem_pixel: f64,
    pub dem_line: f64,
}

pub(crate) struct DemSource {
    dataset: Dataset,
    pub(crate) interpolation: DemInterpolation,
    pub(crate) missing_value: Option<f64>,
    apply_vdatum_shift: bool,
    pub(crate) coord_transform: Option<CoordTransform>,
    geo_transform: GeoTransform,
    pub(crate) inv_geo_transform: GeoTransform,
    pub(crate) nodata: Option<f64>,
    pub(crate) raster_size: (usize, usize),
    cache: ElevationBlockCache,
}

impl fmt::Debug for DemSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DemSource")
            .field("interpolation", &self.interpolation)
            .field("missing_value", &self.missing_value)
            .field("raster_size", &self.raster_size)
            .field("reprojected", &self.coord_transform.is_some())
            .finish_non_exhaustive()
    }
}

impl DemSource {
    pub(crate) fn open(path: &str, opts: &TransformOptions, model: &RpcModel) -> Result<Self> {
        let dataset = Dataset::open(path)?;
        if dataset.raster_count() < 1 {
            return Err(TransformerError::DemWithoutBands(path.to_string()));
        }

        let coord_transform = reconcile_srs(&dataset, opts, model)?;

        let geo_transform = GeoTransform(
            dataset
                .geo_transform()
                .map_err(|_| TransformerError::DemGeoTransform(path.to_string()))?,
        );
        let inv_geo_transform = geo_transform
            .invert()
            .ok_or_else(|| TransformerError::DemGeoTransform(path.to_string()))?;

        let nodata = dataset.rasterband(1)?.no_data_value();
        let raster_size = dataset.raster_size();

        Ok(Self {
            dataset,
            interpolation: opts.dem_interpolation,
            missing_value: opts.dem_missing_value,
            apply_vdatum_shift: opts.apply_vdatum_shift,
            coord_transform,
            geo_transform,
            inv_geo_transform,
            nodata,
            raster_size,
            cache: ElevationBlockCache::new(),
        })
    }

    /// Look up the raw DEM value under a WGS84 ground coordinate, going
    /// through the reconciliation transform when one is configured, and
    /// retrying across the dateline for global rasters.
    pub(crate) fn lookup(&mut self, long: f64, lat: f64) -> DemLookup {
        let mut vdatum_shift = 0.0;
        let (mut x, mut y) = (long, lat);

        if let Some(transform) = &self.coord_transform {
            let mut xs = [long];
            let mut ys = [lat];
            let mut zs = [0.0];
            if transform.transform_coords(&mut xs, &mut ys, &mut zs).is_err() {
                return DemLookup { value: None, vdatum_shift: 0.0, dem_pixel: 0.0, dem_line: 0.0 };
            }
            x = xs[0];
            y = ys[0];
            // The transform goes from the ellipsoid toward the DEM frame;
            // lifting a DEM height back onto the ellipsoid takes the
            // opposite sign.
            if self.apply_vdatum_shift {
                vdatum_shift = -zs[0];
            }
        }

        let mut retried = false;
        loop {
            let (dem_pixel, dem_line) = self.inv_geo_transform.apply(x, y);

            if let Some(value) = self.interpolate(dem_pixel, dem_line) {
                return DemLookup { value: Some(value), vdatum_shift, dem_pixel, dem_line };
            }

            // A geodetic DEM spanning exactly [-180,180] can be probed just
            // across the dateline; fold the longitude back in and retry once.
            if !retried
                && self.coord_transform.is_none()
                && (long >= 180.0 || long <= -180.0)
                && self.spans_global_longitudes()
            {
                x = if long >= 180.0 { long - 360.0 } else { long + 360.0 };
                y = lat;
                retried = true;
                continue;
            }

            if let Some(missing) = self.missing_value {
                return DemLookup { value: Some(missing), vdatum_shift, dem_pixel, dem_line };
            }
            return DemLookup { value: None, vdatum_shift, dem_pixel, dem_line };
        }
    }

    fn spans_global_longitudes(&self) -> bool {
        let min_long = self.geo_transform.0[0];
        let max_long = min_long + self.raster_size.0 as f64 * self.geo_transform.0[1];
        (min_long + 180.0).abs() < 0.1 && (max_long - 180.0).abs() < 0.1
    }

    /// Interpolate the raster at fractional pixel coordinates with the
    /// configured kernel. `None` means out of extent or unresolvable nodata.
    pub(crate) fn interpolate(&mut self, dem_pixel: f64, dem_line: f64) -> Option<f64> {
        match self.interpolation {
            DemInterpolation::Near => {
                let col = dem_pixel.floor() as i64;
                let row = dem_line.floor() as i64;
                let value = self.pixel(col, row)?;
                match self.nodata {
                    Some(nodata) if is_nodata(nodata, value) => None,
                    _ => Some(value),
                }
            }
            DemInterpolation::Bilinear => {
                // Center-of-pixel convention for the 2x2 window.
                let x = dem_pixel - 0.5;
                let y = dem_line - 0.5;
                let col = x.floor() as i64;
                let row = y.floor() as i64;
                let mut samples = [0.0; 4];
                for (sample, (r, c)) in samples
                    .iter_mut()
                    .zip([(row, col), (row, col + 1), (row + 1, col), (row + 1, col + 1)])
                {
                    *sample = self.pixel(c, r)?;
                }
                bilinear_from_quad(samples, x - col as f64, y - row as f64, self.nodata)
            }
            DemInterpolation::Cubic => {
                let x = dem_pixel - 0.5;
                let y = dem_line - 0.5;
                let col = x.floor() as i64;
                let row = y.floor() as i64;
                let mut samples = [0.0; 16];
                for ky in 0..4i64 {
                    for kx in 0..4i64 {
                        samples[(ky * 4 + kx) as usize] = self.pixel(col - 1 + kx, row - 1 + ky)?;
                    }
                }
                cubic_from_window(&samples, x - col as f64, y - row as f64, self.nodata)
            }
        }
    }

    /// One raster sample through the block cache. `None` when out of extent
    /// or unreadable; nodata values are returned as-is.
    fn pixel(&mut self, col: i64, row: i64) -> Option<f64> {
        let (width, height) = self.raster_size;
        if col < 0 || row < 0 || col >= width as i64 || row >= height as i64 {
            return None;
        }

        let block_col = col as usize / BLOCK_SIZE;
        let block_row = row as usize / BLOCK_SIZE;
        let x0 = block_col * BLOCK_SIZE;
        let y0 = block_row * BLOCK_SIZE;
        let block_width = BLOCK_SIZE.min(width - x0);
        let block_height = BLOCK_SIZE.min(height - y0);

        let key = cache::block_key(block_col as u64, block_row as u64);
        let block = match self.cache.get(key) {
            Some(block) => block,
            None => {
                let data = match self.read_block(x0, y0, block_width, block_height) {
                    Ok(data) => data,
                    Err(error) => {
                        debug!("DEM block read at ({x0},{y0}) failed: {error}");
                        return None;
                    }
                };
                self.cache.put(key, data)
            }
        };
        Some(block[(row as usize - y0) * block_width + (col as usize - x0)])
    }

    fn read_block(&self, x0: usize, y0: usize, width: usize, height: usize) -> Result<Vec<f64>> {
        let band = self.dataset.rasterband(1)?;
        let buffer = band.read_as::<f64>((x0 as isize, y0 as isize), (width, height), (width, height), None)?;
        Ok(buffer.data().to_vec())
    }

    /// Bulk-read a sub-raster for the batch row optimizer, which does its
    /// interpolation in memory instead of through the cache.
    pub(crate) fn read_window(&self, x_left: usize, y_top: usize, width: usize, height: usize) -> Result<Array2<f64>> {
        let band = self.dataset.rasterband(1)?;
        let buffer = band.read_as::<f64>(
            (x_left as isize, y_top as isize),
            (width, height),
            (width, height),
            None,
        )?;

        let mut window = Array2::<f64>::zeros((height, width));
        for row in 0..height {
            for col in 0..width {
                window[[row, col]] = buffer.data()[row * width + col];
            }
        }
        Ok(window)
    }
}

fn reconcile_srs(
    dataset: &Dataset,
    opts: &TransformOptions,
    model: &RpcModel,
) -> Result<Option<CoordTransform>> {
    let dem_srs = match &opts.dem_srs {
        Some(definition) => Some(SpatialRef::from_definition(definition)?),
        None => dataset.spatial_ref().ok(),
    };
    let Some(mut dem_srs) = dem_srs else {
        // No reference frame on the raster: assume it already is geodetic
        // WGS84, the frame the RPC model lives in.
        return Ok(None);
    };
    dem_srs.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);

    let mut wgs84 = SpatialRef::from_epsg(4326)?;
    wgs84.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);

    let transform = CoordTransform::new(&wgs84, &dem_srs)?;

    // Probe the globe corners, the origin, and the model's own reference
    // point; when everything round-trips to within 1e-12 the transform is an
    // apparent no-op (e.g. a DEM tagged with a WGS84-equivalent datum) and
    // gets dropped, which also unlocks the batch row optimizer.
    let (ref_long, ref_lat) = if model.long_min != -180.0 || model.long_max != 180.0 {
        ((model.long_min + model.long_max) * 0.5, (model.lat_min + model.lat_max) * 0.5)
    } else {
        (model.long_off, model.lat_off)
    };
    let original_xs = [-179.0, 179.0, 179.0, -179.0, 0.0, ref_long];
    let original_ys = [89.0, 89.0, -89.0, -89.0, 0.0, ref_lat];
    let mut xs = original_xs;
    let mut ys = original_ys;
    let mut zs = [0.0f64; 6];
    if transform.transform_coords(&mut xs, &mut ys, &mut zs).is_ok() {
        let horizontal_noop = xs
            .iter()
            .zip(&original_xs)
            .chain(ys.iter().zip(&original_ys))
            .all(|(a, b)| (a - b).abs() < NOOP_PROBE_TOLERANCE);
        // With vdatum shifts enabled, a vertical displacement means the
        // transform still matters even when the horizontal part is inert.
        let vertical_noop =
            !opts.apply_vdatum_shift || zs.iter().all(|z| z.abs() < NOOP_PROBE_TOLERANCE);
        if horizontal_noop && vertical_noop {
            debug!("short-circuiting DEM coordinate transformation, apparent no-op");
            return Ok(None);
        }
    }
    Ok(Some(transform))
}

/// Reading-order 2x2 bilinear interpolation. When nodata corrupts the quad,
/// the first valid sample in reading order wins outright; `None` when all
/// four are nodata.
pub(crate) fn bilinear_from_quad(samples: [f64; 4], dx: f64, dy: f64, nodata: Option<f64>) -> Option<f64> {
    if let Some(nodata) = nodata {
        let mut first_valid = None;
        let mut found_nodata = false;
        for &sample in &samples {
            if is_nodata(nodata, sample) {
                found_nodata = true;
            } else if first_valid.is_none() {
                first_valid = Some(sample);
            }
        }
        if found_nodata {
            // Arbitrary but load-bearing precedence: reading order of the
            // quad, no distance tie-break.
            return first_valid;
        }
    }

    let dx1 = 1.0 - dx;
    let dy1 = 1.0 - dy;
    let top = samples[0] * dx1 + samples[1] * dx;
    let bottom = samples[2] * dx1 + samples[3] * dx;
    Some(top * dy1 + bottom * dy)
}

/// 4x4 cubic B-spline convolution; nodata samples are skipped and the kernel
/// renormalized. `None` once every contributing weight is gone.
pub(crate) fn cubic_from_window(samples: &[f64; 16], dx: f64, dy: f64, nodata: Option<f64>) -> Option<f64> {
    let mut sum = 0.0;
    let mut weight_sum = 0.0;
    for ky in 0..4 {
        for kx in 0..4 {
            let value = samples[ky * 4 + kx];
            if let Some(nodata) = nodata {
                if is_nodata(nodata, value) {
                    continue;
                }
            }
            let weight = cubic_spline_kernel((kx as f64 - 1.0) - dx)
                * cubic_spline_kernel((ky as f64 - 1.0) - dy);
            sum += value * weight;
            weight_sum += weight;
        }
    }
    if weight_sum == 0.0 { None } else { Some(sum / weight_sum) }
}

/// Cubic B-spline resampling kernel.
pub(crate) fn cubic_spline_kernel(x: f64) -> f64 {
    if x > 2.0 {
        return 0.0;
    }
    let xm1 = x - 1.0;
    let xp1 = x + 1.0;
    let xp2 = x + 2.0;
    let a = if xp2 <= 0.0 { 0.0 } else { xp2 * xp2 * xp2 };
    let b = if xp1 <= 0.0 { 0.0 } else { xp1 * xp1 * xp1 };
    let c = if x <= 0.0 { 0.0 } else { x * x * x };
    let d = if xm1 <= 0.0 { 0.0 } else { xm1 * xm1 * xm1 };
    0.16666666666666666667 * (a - 4.0 * b + 6.0 * c - 4.0 * d)
}

/// Nodata comparison tolerant of the usual float drift in nodata tags.
pub(crate) fn is_nodata(nodata: f64, value: f64) -> bool {
    value == nodata || (value - nodata).abs() < 1e-10 * nodata.abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bilinear_interior() {
        let samples = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(bilinear_from_quad(samples, 0.0, 0.0, None), Some(10.0));
        assert_eq!(bilinear_from_quad(samples, 1.0, 0.0, None), Some(20.0));
        assert_eq!(bilinear_from_quad(samples, 0.5, 0.5, None), Some(25.0));
    }

    #[test]
    fn test_bilinear_nodata_reading_order_precedence() {
        let nodata = Some(-9999.0);
        // First sample invalid: second in reading order wins, regardless of
        // the interpolation weights.
        assert_eq!(
            bilinear_from_quad([-9999.0, 20.0, 30.0, 40.0], 0.1, 0.1, nodata),
            Some(20.0)
        );
        // Any nodata in the quad short-circuits to the first valid sample.
        assert_eq!(
            bilinear_from_quad([10.0, 20.0, 30.0, -9999.0], 0.9, 0.9, nodata),
            Some(10.0)
        );
        assert_eq!(
            bilinear_from_quad([-9999.0; 4], 0.5, 0.5, nodata),
            None
        );
    }

    #[test]
    fn test_cubic_kernel_partition_of_unity() {
        // The B-spline kernel weights over a 4-tap window sum to 1 for any
        // interior phase.
        for &phase in &[0.0, 0.25, 0.5, 0.75, 0.99] {
            let total: f64 = (0..4)
                .map(|k| cubic_spline_kernel((k as f64 - 1.0) - phase))
                .sum();
            assert!((total - 1.0).abs() < 1e-12, "phase {phase}: {total}");
        }
    }

    #[test]
    fn test_cubic_constant_field_is_preserved() {
        let samples = [42.0; 16];
        let value = cubic_from_window(&samples, 0.3, 0.7, None).unwrap();
        assert!((value - 42.0).abs() < 1e-12);
    }

    #[test]
    fn test_cubic_all_nodata() {
        let samples = [-1.0; 16];
        assert_eq!(cubic_from_window(&samples, 0.5, 0.5, Some(-1.0)), None);
    }

    #[test]
    fn test_is_nodata_tolerance() {
        assert!(is_nodata(-32768.0, -32768.0));
        assert!(is_nodata(-32768.0, -32768.0000000001));
        assert!(!is_nodata(-32768.0, -32767.0));
        assert!(is_nodata(0.0, 0.0));
        assert!(!is_nodata(0.0, 1e-300));
    }
}
