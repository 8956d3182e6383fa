//! Transformer lifecycle and the array transform entry points.

use std::collections::HashMap;
use std::path::PathBuf;

use rpt_core::{
    Footprint, GeoTransform, RpcError, RpcEvaluator, RpcModel, TransformOptions, parse_config_bool,
};

use crate::dem::DemSource;
use crate::error::{Result, TransformerError};
use crate::inverse::SolverTuning;

/// Default pixel error threshold for the iterative solver.
pub const DEFAULT_PIX_ERR_THRESHOLD: f64 = 0.1;

/// Sentinel written into the coordinate arrays for failed points.
pub const INVALID_COORDINATE: f64 = f64::INFINITY;

/// Transform direction, resolved once per call from the requested direction
/// and the transformer's stored reversed flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    GroundToImage,
    ImageToGround,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Direction::GroundToImage => Direction::ImageToGround,
            Direction::ImageToGround => Direction::GroundToImage,
        }
    }
}

/// The representative ground/image point pair used to seed the inverse
/// solver; never returned as an answer.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ReferencePoint {
    pub long: f64,
    pub lat: f64,
    pub height: f64,
    pub pixel: f64,
    pub line: f64,
}

/// An RPC geolocation transformer with optional DEM height correction.
///
/// Owns its elevation dataset, cache and footprint exclusively; concurrent
/// consumers should clone with [`RpcTransformer::create_similar`] instead of
/// sharing one instance.
#[derive(Debug)]
pub struct RpcTransformer {
    pub(crate) model: RpcModel,
    pub(crate) evaluator: RpcEvaluator,
    pub(crate) reversed: bool,
    pub(crate) pix_err_threshold: f64,
    pub(crate) opts: TransformOptions,
    pub(crate) dem: Option<DemSource>,
    pub(crate) footprint: Option<Footprint>,
    pub(crate) tuning: SolverTuning,
    pub(crate) reference: ReferencePoint,
    /// Inverse of the local affine approximation around the reference
    /// point; seeds and steps the inverse solver.
    pub(crate) pixel_line_to_long_lat: GeoTransform,
    pub(crate) max_iterations: usize,
    pub(crate) row_optimization: bool,
    pub(crate) inverse_verbose: bool,
    pub(crate) inverse_log: Option<PathBuf>,
}

impl RpcTransformer {
    /// Create a transformer from a model, a direction flag, a pixel error
    /// threshold and an option map (`RPC_HEIGHT`, `RPC_DEM`, ...).
    ///
    /// A non-positive `pix_err_threshold` falls back to
    /// [`DEFAULT_PIX_ERR_THRESHOLD`]; `RPC_PIXEL_ERROR_THRESHOLD` overrides
    /// the argument entirely.
    pub fn new(
        model: RpcModel,
        reversed: bool,
        pix_err_threshold: f64,
        options: &HashMap<String, String>,
    ) -> Result<Self> {
        let opts = TransformOptions::from_map(options)?;
        Self::from_options(model, reversed, pix_err_threshold, opts)
    }

    pub(crate) fn from_options(
        model: RpcModel,
        reversed: bool,
        pix_err_threshold: f64,
        opts: TransformOptions,
    ) -> Result<Self> {
        let pix_err_threshold = match opts.pixel_error_threshold {
            Some(threshold) => threshold,
            None if pix_err_threshold > 0.0 => pix_err_threshold,
            None => DEFAULT_PIX_ERR_THRESHOLD,
        };

        let evaluator = RpcEvaluator::new(&model);

        let footprint = match &opts.footprint {
            Some(text) => Some(Footprint::parse(text).map_err(RpcError::from)?),
            None => None,
        };

        let dem = match &opts.dem_path {
            Some(path) => Some(DemSource::open(path, &opts, &model)?),
            None => None,
        };

        let mut transformer = Self {
            model,
            evaluator,
            reversed,
            pix_err_threshold,
            max_iterations: opts.max_iterations,
            dem,
            footprint,
            tuning: SolverTuning::default(),
            reference: ReferencePoint::default(),
            pixel_line_to_long_lat: GeoTransform::IDENTITY,
            row_optimization: env_flag("RPC_DEM_OPTIM", true),
            inverse_verbose: env_flag("RPC_INVERSE_VERBOSE", false),
            inverse_log: std::env::var_os("RPC_INVERSE_LOG").map(PathBuf::from),
            opts,
        };
        transformer.establish_reference()?;
        Ok(transformer)
    }

    /// Transform the parallel coordinate arrays in place. Returns true only
    /// when every point succeeded; per-point outcomes land in `success`, and
    /// failed points' coordinates are set to [`INVALID_COORDINATE`].
    ///
    /// `zs` is height above ground for ground-to-image calls and the
    /// user-supplied height for image-to-ground calls; it is never written.
    pub fn transform(
        &mut self,
        xs: &mut [f64],
        ys: &mut [f64],
        zs: &[f64],
        success: &mut [bool],
        direction: Direction,
    ) -> bool {
        assert!(
            xs.len() == ys.len() && xs.len() == zs.len() && xs.len() == success.len(),
            "parallel coordinate arrays must have equal lengths"
        );

        let effective = if self.reversed { direction.reversed() } else { direction };
        match effective {
            Direction::GroundToImage => self.transform_ground_to_image(xs, ys, zs, success),
            Direction::ImageToGround => self.transform_image_to_ground(xs, ys, zs, success),
        }
    }

    fn transform_ground_to_image(
        &mut self,
        xs: &mut [f64],
        ys: &mut [f64],
        zs: &[f64],
        success: &mut [bool],
    ) -> bool {
        if let Some(result) = self.try_transform_row_with_dem(xs, ys, zs, success) {
            return result;
        }

        let mut all_ok = true;
        for i in 0..xs.len() {
            match self.ground_to_image_point(xs[i], ys[i], zs[i]) {
                Some((pixel, line)) => {
                    xs[i] = pixel;
                    ys[i] = line;
                    success[i] = true;
                }
                None => {
                    all_ok = false;
                    success[i] = false;
                    xs[i] = INVALID_COORDINATE;
                    ys[i] = INVALID_COORDINATE;
                }
            }
        }
        all_ok
    }

    fn transform_image_to_ground(
        &mut self,
        xs: &mut [f64],
        ys: &mut [f64],
        zs: &[f64],
        success: &mut [bool],
    ) -> bool {
        let mut all_ok = true;
        for i in 0..xs.len() {
            let solved = self.inverse_transform_point(xs[i], ys[i], zs[i]);
            // The solver may land on a plausible-looking answer outside the
            // fitted domain; the footprint is the guard for that case.
            let accepted = solved.filter(|&(long, lat)| {
                self.footprint.as_ref().is_none_or(|footprint| footprint.contains(long, lat))
            });
            match accepted {
                Some((long, lat)) => {
                    xs[i] = long;
                    ys[i] = lat;
                    success[i] = true;
                }
                None => {
                    all_ok = false;
                    success[i] = false;
                    xs[i] = INVALID_COORDINATE;
                    ys[i] = INVALID_COORDINATE;
                }
            }
        }
        all_ok
    }

    /// The per-point ground-to-image path: footprint test, elevation lookup,
    /// forward projection.
    pub(crate) fn ground_to_image_point(&mut self, long: f64, lat: f64, z: f64) -> Option<(f64, f64)> {
        if let Some(footprint) = &self.footprint {
            if !footprint.contains(long, lat) {
                return None;
            }
        }
        let (height, _, _) = self.height_above_ellipsoid(long, lat);
        let height = height?;
        Some(self.model.project(&self.evaluator, long, lat, z + height))
    }

    /// Composed ground height at a coordinate: vertical datum shift plus the
    /// configured offset plus the scaled DEM value. Also reports the DEM
    /// pixel/line that was probed, for the solver's snap fallback.
    pub(crate) fn height_above_ellipsoid(&mut self, long: f64, lat: f64) -> (Option<f64>, f64, f64) {
        match &mut self.dem {
            None => (Some(self.opts.height_offset), 0.0, 0.0),
            Some(dem) => {
                let lookup = dem.lookup(long, lat);
                let height = lookup.value.map(|value| {
                    lookup.vdatum_shift + self.opts.height_offset + value * self.opts.height_scale
                });
                (height, lookup.dem_pixel, lookup.dem_line)
            }
        }
    }

    /// Establish the reference point and the local affine approximation used
    /// to seed the inverse solver.
    fn establish_reference(&mut self) -> Result<()> {
        let mut ref_long = 0.0;
        let mut ref_lat = 0.0;
        let mut ref_pixel = -1.0;
        let mut ref_line = -1.0;

        if self.model.long_min != -180.0 || self.model.long_max != 180.0 {
            ref_long = (self.model.long_min + self.model.long_max) * 0.5;
            ref_lat = (self.model.lat_min + self.model.lat_max) * 0.5;
            (ref_pixel, ref_line) = self.seed_ground_to_image(ref_long, ref_lat);
        }

        // Fall back to the normalization offsets when there are no usable
        // bounds or the result looks daft.
        if ref_pixel < 0.0 || ref_line < 0.0 || ref_pixel > 100_000.0 || ref_line > 100_000.0 {
            ref_long = self.model.long_off;
            ref_lat = self.model.lat_off;
            (ref_pixel, ref_line) = self.seed_ground_to_image(ref_long, ref_lat);
        }

        let ref_height = self.height_above_ellipsoid(ref_long, ref_lat).0.unwrap_or(0.0);
        self.reference = ReferencePoint {
            long: ref_long,
            lat: ref_lat,
            height: ref_height,
            pixel: ref_pixel,
            line: ref_line,
        };

        // Finite differences around the reference point give the local
        // affine from long/lat to pixel/line; its inverse drives the solver.
        const DELTA: f64 = 1e-4;
        let (pixel_d_long, line_d_long) =
            self.model.project(&self.evaluator, ref_long + DELTA, ref_lat, ref_height);
        let (pixel_d_lat, line_d_lat) =
            self.model.project(&self.evaluator, ref_long, ref_lat + DELTA, ref_height);

        let mut gt = [0.0; 6];
        gt[1] = (pixel_d_long - ref_pixel) / DELTA;
        gt[4] = (line_d_long - ref_line) / DELTA;
        gt[2] = (pixel_d_lat - ref_pixel) / DELTA;
        gt[5] = (line_d_lat - ref_line) / DELTA;
        gt[0] = ref_pixel - gt[1] * ref_long - gt[2] * ref_lat;
        gt[3] = ref_line - gt[4] * ref_long - gt[5] * ref_lat;

        self.pixel_line_to_long_lat = GeoTransform(gt)
            .invert()
            .ok_or(TransformerError::DegenerateReference)?;
        Ok(())
    }

    /// Ground-to-image projection for the construction seed: the full path
    /// with footprint and elevation first, then the plain polynomial at
    /// height zero when that fails.
    fn seed_ground_to_image(&mut self, long: f64, lat: f64) -> (f64, f64) {
        match self.ground_to_image_point(long, lat, 0.0) {
            Some((pixel, line)) => (pixel, line),
            None => self.model.project(&self.evaluator, long, lat, 0.0),
        }
    }

    /// Clone the transformer for a decimated overview: line/sample offsets
    /// and scales divided by the given ratios, all options carried over.
    pub fn create_similar(&self, ratio_x: f64, ratio_y: f64) -> Result<Self> {
        let mut model = self.model.clone();
        if ratio_x != 1.0 || ratio_y != 1.0 {
            model.line_off /= ratio_y;
            model.line_scale /= ratio_y;
            model.samp_off /= ratio_x;
            model.samp_scale /= ratio_x;
        }
        let mut opts = self.opts.clone();
        opts.pixel_error_threshold = Some(self.pix_err_threshold);
        let mut clone = Self::from_options(model, self.reversed, self.pix_err_threshold, opts)?;
        clone.tuning = self.tuning.clone();
        clone.row_optimization = self.row_optimization;
        Ok(clone)
    }

    pub fn model(&self) -> &RpcModel {
        &self.model
    }

    pub fn options(&self) -> &TransformOptions {
        &self.opts
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    pub fn pixel_error_threshold(&self) -> f64 {
        self.pix_err_threshold
    }

    pub fn tuning(&self) -> &SolverTuning {
        &self.tuning
    }

    /// Override the solver's empirical heuristics.
    pub fn set_tuning(&mut self, tuning: SolverTuning) {
        self.tuning = tuning;
    }

    /// Enable or disable the whole-row DEM optimization (on by default,
    /// also overridable through the `RPC_DEM_OPTIM` environment switch at
    /// construction).
    pub fn set_row_optimization(&mut self, enabled: bool) {
        self.row_optimization = enabled;
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => parse_config_bool(&value),
        Err(_) => default,
    }
}
