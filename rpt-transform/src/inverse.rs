//! Iterative image-to-ground solver.
//!
//! The forward polynomial cannot be inverted algebraically, so this runs a
//! fixed-point iteration seeded by the local affine approximation around the
//! reference point, with the elevation sampler consulted at every step.

use std::fs;

use tracing::debug;

use crate::transformer::RpcTransformer;

/// Tuning knobs for the two empirical convergence heuristics. Both are
/// escape hatches for DEM-coupled iterations, not provably convergent
/// strategies; tests may disable or tighten them.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverTuning {
    /// Damp double sign-flip oscillations by restarting from the
    /// error-weighted mean of the two latest guesses.
    pub oscillation_damping: bool,
    /// Error magnitude in pixels under which an iteration counts as "almost
    /// converged" for the boost heuristic.
    pub boost_error_threshold: f64,
    /// Consecutive almost-converged iterations before the boost kicks in.
    pub boost_after_consecutive: usize,
    /// Step multiplier applied once the boost kicks in.
    pub boost_factor: f64,
}

impl Default for SolverTuning {
    fn default() -> Self {
        Self {
            oscillation_damping: true,
            boost_error_threshold: 2.0,
            boost_after_consecutive: 5,
            boost_factor: 10.0,
        }
    }
}

impl RpcTransformer {
    /// Solve pixel/line (+ height above ground) for longitude/latitude.
    /// `None` marks a per-point failure: an elevation lookup failed past the
    /// first iteration, or the iteration budget ran out.
    pub(crate) fn inverse_transform_point(
        &mut self,
        pixel: f64,
        line: f64,
        user_height: f64,
    ) -> Option<(f64, f64)> {
        // Initial approximation from the local affine around the reference
        // point.
        let (mut long, mut lat) = self.pixel_line_to_long_lat.apply(pixel, line);

        if self.inverse_verbose {
            debug!("computing inverse transform for (pixel,line)=({pixel},{line})");
        }
        let mut trace = self.open_iteration_trace();

        let max_iterations = self.iteration_budget();
        let mut last_long = 0.0;
        let mut last_lat = 0.0;
        let mut last_delta_x = 0.0;
        let mut last_delta_y = 0.0;
        let mut last_delta_valid = false;
        let mut consecutive_small_error = 0usize;
        let mut delta_x = 0.0;
        let mut delta_y = 0.0;

        for iteration in 0..max_iterations {
            let (height, dem_pixel, dem_line) = self.height_above_ellipsoid(long, lat);
            let dem_height = match height {
                Some(height) => height,
                None if iteration == 0 => {
                    self.first_iteration_height_fallback(pixel, line, long, lat, dem_pixel, dem_line)
                }
                None => {
                    debug!(
                        "iteration {iteration} for (pixel,line)=({pixel},{line}): \
                         no elevation value at {long} {lat}, giving up"
                    );
                    return None;
                }
            };

            let (back_pixel, back_line) =
                self.model.project(&self.evaluator, long, lat, user_height + dem_height);
            delta_x = back_pixel - pixel;
            delta_y = back_line - line;

            if self.inverse_verbose {
                debug!(
                    "iter {iteration}: delta=({delta_x:.2},{delta_y:.2}), long={long}, lat={lat}, height={}",
                    user_height + dem_height
                );
            }
            if let Some(writer) = trace.as_mut() {
                let _ = writer.write_record([
                    iteration.to_string(),
                    format!("{long:.12}"),
                    format!("{lat:.12}"),
                    (user_height + dem_height).to_string(),
                    format!("POINT({long:.12} {lat:.12})"),
                    delta_x.to_string(),
                    delta_y.to_string(),
                ]);
            }

            let error = delta_x.abs().max(delta_y.abs());
            if self.pix_err_threshold > 0.0 && error < self.pix_err_threshold {
                if self.inverse_verbose {
                    debug!("converged after {} iterations", iteration + 1);
                }
                return Some((long, lat));
            }

            if self.dem.is_some()
                && self.tuning.oscillation_damping
                && last_delta_valid
                && delta_x * last_delta_x < 0.0
                && delta_y * last_delta_y < 0.0
            {
                // Sign flips on both axes can oscillate forever against a
                // DEM; restart from the error-weighted mean of the two
                // latest guesses instead of stepping.
                if self.inverse_verbose {
                    debug!("oscillation detected, taking the mean of the two previous guesses");
                }
                let new_long = (delta_x.abs() * last_long + last_delta_x.abs() * long)
                    / (delta_x.abs() + last_delta_x.abs());
                let new_lat = (delta_y.abs() * last_lat + last_delta_y.abs() * lat)
                    / (delta_y.abs() + last_delta_y.abs());
                long = new_long;
                lat = new_lat;
                last_delta_valid = false;
                consecutive_small_error = 0;
                continue;
            }

            let mut boost = 1.0;
            if self.dem.is_some()
                && consecutive_small_error >= self.tuning.boost_after_consecutive
                && error < self.tuning.boost_error_threshold
            {
                // Almost converged for a while but stuck: overshoot on
                // purpose to escape the local minimum.
                boost = self.tuning.boost_factor;
                if self.inverse_verbose {
                    debug!("applying boost factor {boost}");
                }
            }
            if error < self.tuning.boost_error_threshold {
                consecutive_small_error += 1;
            } else {
                consecutive_small_error = 0;
            }

            // Newton-style step through the inverse affine gradient; both
            // pixel deltas contribute to both axes.
            let gradient = &self.pixel_line_to_long_lat.0;
            let new_long = long - delta_x * gradient[1] * boost - delta_y * gradient[2] * boost;
            let new_lat = lat - delta_x * gradient[4] * boost - delta_y * gradient[5] * boost;

            last_long = long;
            last_lat = lat;
            long = new_long;
            lat = new_lat;
            last_delta_x = delta_x;
            last_delta_y = delta_y;
            last_delta_valid = true;
        }

        if self.pix_err_threshold <= 0.0 {
            // A non-positive threshold means "spend the whole budget", not
            // "demand exact convergence": the final guess stands.
            return Some((long, lat));
        }

        debug!(
            "no convergence after {max_iterations} iterations for (pixel,line)=({pixel},{line}): \
             got ({long},{lat}), offset ({delta_x},{delta_y})"
        );
        None
    }

    /// Height substitute when the very first guess samples outside the DEM:
    /// snap to the nearest in-extent cell, falling back to the reference
    /// point's height when even that has no value.
    fn first_iteration_height_fallback(
        &mut self,
        pixel: f64,
        line: f64,
        long: f64,
        lat: f64,
        dem_pixel: f64,
        dem_line: f64,
    ) -> f64 {
        if let Some(dem) = &mut self.dem {
            let (width, height) = dem.raster_size;
            let mut snapped_pixel = dem_pixel;
            let mut snapped_line = dem_line;
            if snapped_pixel >= width as f64 {
                snapped_pixel = width as f64 - 0.5;
            } else if snapped_pixel < 0.0 {
                snapped_pixel = 0.5;
            }
            if snapped_line >= height as f64 {
                snapped_line = height as f64 - 0.5;
            } else if snapped_line < 0.0 {
                snapped_line = 0.5;
            }
            if let Some(value) = dem.interpolate(snapped_pixel, snapped_line) {
                debug!(
                    "iteration 0 for (pixel,line)=({pixel},{line}): no elevation value at \
                     {long} {lat}; using elevation {value} at DEM (pixel,line)=\
                     ({snapped_pixel},{snapped_line}) instead"
                );
                return value;
            }
        }
        debug!(
            "iteration 0 for (pixel,line)=({pixel},{line}): no elevation value at {long} {lat}; \
             using the reference point elevation {} instead",
            self.reference.height
        );
        self.reference.height
    }

    pub(crate) fn iteration_budget(&self) -> usize {
        if self.max_iterations > 0 {
            self.max_iterations
        } else if self.dem.is_some() {
            20
        } else {
            10
        }
    }

    fn open_iteration_trace(&self) -> Option<csv::Writer<fs::File>> {
        let path = self.inverse_log.as_ref()?;

        // Sidecar schema file in the CSVT convention.
        let schema_path = path.with_extension("csvt");
        if let Err(error) = fs::write(&schema_path, "Integer,Real,Real,Real,String,Real,Real\n") {
            debug!("cannot write iteration trace schema {}: {error}", schema_path.display());
        }

        match csv::Writer::from_path(path) {
            Ok(mut writer) => {
                let _ = writer.write_record([
                    "iter", "long", "lat", "height", "WKT", "error_pixel_x", "error_pixel_y",
                ]);
                Some(writer)
            }
            Err(error) => {
                debug!("cannot open iteration trace {}: {error}", path.display());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuning_defaults_match_documented_heuristics() {
        let tuning = SolverTuning::default();
        assert!(tuning.oscillation_damping);
        assert_eq!(tuning.boost_error_threshold, 2.0);
        assert_eq!(tuning.boost_after_consecutive, 5);
        assert_eq!(tuning.boost_factor, 10.0);
    }
}
