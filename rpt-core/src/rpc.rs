//! The RPC sensor model and its forward (ground to image) projection.

use std::collections::HashMap;

use crate::diag;
use crate::error::{MetadataError, Result};
use crate::poly::{self, RpcEvaluator};

/// RPC (Rational Polynomial Coefficients) sensor model in the RPC00B
/// vocabulary: normalization offsets and scales plus four sets of 20 cubic
/// polynomial coefficients.
///
/// Immutable once built; the transformer derives everything else from it.
#[derive(Debug, Clone)]
pub struct RpcModel {
    pub line_off: f64,
    pub samp_off: f64,
    pub lat_off: f64,
    pub long_off: f64,
    pub height_off: f64,
    pub line_scale: f64,
    pub samp_scale: f64,
    pub lat_scale: f64,
    pub long_scale: f64,
    pub height_scale: f64,
    pub line_num_coeff: [f64; 20],
    pub line_den_coeff: [f64; 20],
    pub samp_num_coeff: [f64; 20],
    pub samp_den_coeff: [f64; 20],
    /// RMS bias error in meters per horizontal axis (NaN when unknown).
    pub err_bias: f64,
    /// RMS random error in meters per horizontal axis (NaN when unknown).
    pub err_rand: f64,
    /// Validity bounding box in degrees; defaults to the whole globe when the
    /// metadata does not carry one.
    pub long_min: f64,
    pub lat_min: f64,
    pub long_max: f64,
    pub lat_max: f64,
}

impl RpcModel {
    /// Build a model from RPC00B metadata. Coefficient vectors are accepted
    /// either as 20 space-separated values under the base key or as the
    /// individual `_1` .. `_20` keys.
    pub fn from_metadata(metadata: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            line_off: parse_required(metadata, "LINE_OFF")?,
            samp_off: parse_required(metadata, "SAMP_OFF")?,
            lat_off: parse_required(metadata, "LAT_OFF")?,
            long_off: parse_required(metadata, "LONG_OFF")?,
            height_off: parse_required(metadata, "HEIGHT_OFF")?,
            line_scale: parse_required(metadata, "LINE_SCALE")?,
            samp_scale: parse_required(metadata, "SAMP_SCALE")?,
            lat_scale: parse_required(metadata, "LAT_SCALE")?,
            long_scale: parse_required(metadata, "LONG_SCALE")?,
            height_scale: parse_required(metadata, "HEIGHT_SCALE")?,
            line_num_coeff: parse_coeff_array(metadata, "LINE_NUM_COEFF")?,
            line_den_coeff: parse_coeff_array(metadata, "LINE_DEN_COEFF")?,
            samp_num_coeff: parse_coeff_array(metadata, "SAMP_NUM_COEFF")?,
            samp_den_coeff: parse_coeff_array(metadata, "SAMP_DEN_COEFF")?,
            err_bias: parse_or(metadata, "ERR_BIAS", f64::NAN)?,
            err_rand: parse_or(metadata, "ERR_RAND", f64::NAN)?,
            long_min: parse_or(metadata, "MIN_LONG", -180.0)?,
            lat_min: parse_or(metadata, "MIN_LAT", -90.0)?,
            long_max: parse_or(metadata, "MAX_LONG", 180.0)?,
            lat_max: parse_or(metadata, "MAX_LAT", 90.0)?,
        })
    }

    /// Turn the model back into its metadata vocabulary. Values are formatted
    /// with Rust's shortest round-trip representation, so a parse of the
    /// output reconstructs the exact same model.
    pub fn to_metadata(&self) -> HashMap<String, String> {
        let mut md = HashMap::new();
        if self.err_bias.is_finite() {
            md.insert("ERR_BIAS".to_string(), self.err_bias.to_string());
        }
        if self.err_rand.is_finite() {
            md.insert("ERR_RAND".to_string(), self.err_rand.to_string());
        }
        md.insert("LINE_OFF".to_string(), self.line_off.to_string());
        md.insert("SAMP_OFF".to_string(), self.samp_off.to_string());
        md.insert("LAT_OFF".to_string(), self.lat_off.to_string());
        md.insert("LONG_OFF".to_string(), self.long_off.to_string());
        md.insert("HEIGHT_OFF".to_string(), self.height_off.to_string());
        md.insert("LINE_SCALE".to_string(), self.line_scale.to_string());
        md.insert("SAMP_SCALE".to_string(), self.samp_scale.to_string());
        md.insert("LAT_SCALE".to_string(), self.lat_scale.to_string());
        md.insert("LONG_SCALE".to_string(), self.long_scale.to_string());
        md.insert("HEIGHT_SCALE".to_string(), self.height_scale.to_string());
        md.insert("MIN_LONG".to_string(), self.long_min.to_string());
        md.insert("MIN_LAT".to_string(), self.lat_min.to_string());
        md.insert("MAX_LONG".to_string(), self.long_max.to_string());
        md.insert("MAX_LAT".to_string(), self.lat_max.to_string());
        md.insert("LINE_NUM_COEFF".to_string(), join_coeffs(&self.line_num_coeff));
        md.insert("LINE_DEN_COEFF".to_string(), join_coeffs(&self.line_den_coeff));
        md.insert("SAMP_NUM_COEFF".to_string(), join_coeffs(&self.samp_num_coeff));
        md.insert("SAMP_DEN_COEFF".to_string(), join_coeffs(&self.samp_den_coeff));
        md
    }

    /// Forward projection of a ground coordinate to (pixel, line) in the
    /// top-left-corner-origin convention. Closed form, no iteration.
    pub fn project(&self, evaluator: &RpcEvaluator, long: f64, lat: f64, height: f64) -> (f64, f64) {
        // Avoid dateline discontinuities by wrapping the longitude difference
        // into (-270, 270].
        let mut diff_long = long - self.long_off;
        if diff_long < -270.0 {
            diff_long += 360.0;
        } else if diff_long > 270.0 {
            diff_long -= 360.0;
        }

        let norm_long = diff_long / self.long_scale;
        let norm_lat = (lat - self.lat_off) / self.lat_scale;
        let norm_height = (height - self.height_off) / self.height_scale;

        // Normalized magnitudes are supposed to stay below 1; allow some
        // margin before warning.
        if diag::normalized_warnings_open() {
            let mut warned = false;
            for (axis, value) in [
                ("longitude", norm_long),
                ("latitude", norm_lat),
                ("height", norm_height),
            ] {
                if value.abs() > 1.5 {
                    diag::warn_normalized_value(axis, long, lat, height, value);
                    warned = true;
                }
            }
            if warned {
                diag::note_normalized_warning();
            }
        }

        let terms = poly::compute_terms(norm_long, norm_lat, norm_height);
        let [line_num, line_den, samp_num, samp_den] = evaluator.evaluate(&terms);

        // RPCs use the center-of-upper-left-pixel origin; the half-pixel
        // shift converts to the top-left-corner origin.
        let pixel = samp_num / samp_den * self.samp_scale + self.samp_off + 0.5;
        let line = line_num / line_den * self.line_scale + self.line_off + 0.5;
        (pixel, line)
    }
}

fn parse_required(metadata: &HashMap<String, String>, key: &str) -> Result<f64> {
    let value = metadata
        .get(key)
        .ok_or_else(|| MetadataError::MissingParameter(key.to_string()))?;
    parse_value(key, value)
}

fn parse_or(metadata: &HashMap<String, String>, key: &str, default: f64) -> Result<f64> {
    match metadata.get(key) {
        Some(value) => parse_value(key, value),
        None => Ok(default),
    }
}

fn parse_value(key: &str, value: &str) -> Result<f64> {
    Ok(value
        .trim()
        .parse()
        .map_err(|_| MetadataError::InvalidParameter(key.to_string()))?)
}

fn parse_coeff_array(metadata: &HashMap<String, String>, prefix: &str) -> Result<[f64; 20]> {
    let mut coeffs = [0.0; 20];

    if let Some(value) = metadata.get(prefix) {
        let tokens: Vec<&str> = value.split_whitespace().collect();
        if tokens.len() != 20 {
            return Err(MetadataError::WrongCoefficientCount {
                key: prefix.to_string(),
                count: tokens.len(),
            }
            .into());
        }
        for (coeff, token) in coeffs.iter_mut().zip(&tokens) {
            *coeff = token
                .parse()
                .map_err(|_| MetadataError::InvalidParameter(prefix.to_string()))?;
        }
        return Ok(coeffs);
    }

    for (i, coeff) in coeffs.iter_mut().enumerate() {
        let key = format!("{}_{}", prefix, i + 1);
        let value = metadata
            .get(&key)
            .ok_or_else(|| MetadataError::MissingParameter(key.clone()))?;
        *coeff = value
            .trim()
            .parse()
            .map_err(|_| MetadataError::InvalidParameter(key.clone()))?;
    }
    Ok(coeffs)
}

fn join_coeffs(coeffs: &[f64; 20]) -> String {
    coeffs
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Model whose numerators and denominators are the constant 1, so every
    /// ground point lands on the sample/line offsets.
    pub(crate) fn identity_model() -> RpcModel {
        let mut num = [0.0; 20];
        num[0] = 1.0;
        let mut den = [0.0; 20];
        den[0] = 1.0;
        RpcModel {
            line_off: 5000.0,
            samp_off: 5000.0,
            lat_off: 40.0,
            long_off: -105.0,
            height_off: 2000.0,
            line_scale: 5000.0,
            samp_scale: 5000.0,
            lat_scale: 1.0,
            long_scale: 1.0,
            height_scale: 500.0,
            line_num_coeff: num,
            line_den_coeff: den,
            samp_num_coeff: num,
            samp_den_coeff: den,
            err_bias: f64::NAN,
            err_rand: f64::NAN,
            long_min: -180.0,
            lat_min: -90.0,
            long_max: 180.0,
            lat_max: 90.0,
        }
    }

    /// Model where the sample tracks longitude and the line tracks latitude
    /// linearly, so the projection is exactly invertible.
    pub(crate) fn linear_model() -> RpcModel {
        let mut model = identity_model();
        model.samp_num_coeff = [0.0; 20];
        model.samp_num_coeff[1] = 1.0; // normalized longitude
        model.line_num_coeff = [0.0; 20];
        model.line_num_coeff[2] = 1.0; // normalized latitude
        model
    }

    #[test]
    fn test_forward_at_offsets_lands_on_sample_line_offsets() {
        // Normalized inputs are all zero, both polynomials evaluate to
        // exactly 1, so the result is the offset plus the half-pixel shift.
        let model = identity_model();
        let evaluator = RpcEvaluator::new(&model);
        let (pixel, line) = model.project(&evaluator, -105.0, 40.0, 2000.0);
        assert_eq!(pixel, 5000.5);
        assert_eq!(line, 5000.5);
    }

    #[test]
    fn test_forward_linear_model() {
        let model = linear_model();
        let evaluator = RpcEvaluator::new(&model);
        let (pixel, line) = model.project(&evaluator, -104.5, 40.25, 2000.0);
        assert!((pixel - (0.5 * 5000.0 + 5000.0 + 0.5)).abs() < 1e-9);
        assert!((line - (0.25 * 5000.0 + 5000.0 + 0.5)).abs() < 1e-9);
    }

    #[test]
    fn test_antimeridian_continuity() {
        // A model centered near the dateline: two descriptions of nearly the
        // same ground point, split across it, must land within a pixel.
        let mut model = linear_model();
        model.long_off = 179.8;
        model.samp_scale = 100.0;
        let evaluator = RpcEvaluator::new(&model);

        let (east_pixel, east_line) = model.project(&evaluator, 179.999, 40.0, 2000.0);
        let (west_pixel, west_line) = model.project(&evaluator, -179.999, 40.0, 2000.0);
        assert!((east_pixel - west_pixel).abs() < 1.0);
        assert!((east_line - west_line).abs() < 1.0);
    }

    #[test]
    fn test_metadata_roundtrip() {
        let mut model = linear_model();
        model.err_bias = 0.25;
        model.long_min = -105.5;
        model.long_max = -104.5;
        model.lat_min = 39.5;
        model.lat_max = 40.5;

        let md = model.to_metadata();
        let restored = RpcModel::from_metadata(&md).unwrap();

        assert_eq!(restored.line_off, model.line_off);
        assert_eq!(restored.long_min, model.long_min);
        assert_eq!(restored.err_bias, model.err_bias);
        assert!(restored.err_rand.is_nan());
        assert_eq!(restored.samp_num_coeff, model.samp_num_coeff);
        assert_eq!(restored.line_den_coeff, model.line_den_coeff);
    }

    #[test]
    fn test_metadata_individual_coefficient_keys() {
        let model = linear_model();
        let mut md = model.to_metadata();
        let joined = md.remove("SAMP_NUM_COEFF").unwrap();
        for (i, token) in joined.split_whitespace().enumerate() {
            md.insert(format!("SAMP_NUM_COEFF_{}", i + 1), token.to_string());
        }

        let restored = RpcModel::from_metadata(&md).unwrap();
        assert_eq!(restored.samp_num_coeff, model.samp_num_coeff);
    }

    #[test]
    fn test_metadata_missing_parameter() {
        let mut md = identity_model().to_metadata();
        md.remove("LAT_OFF");
        let err = RpcModel::from_metadata(&md).unwrap_err();
        assert_eq!(err.to_string(), "RPC metadata error: Missing RPC parameter: LAT_OFF");
    }

    #[test]
    fn test_metadata_wrong_coefficient_count() {
        let mut md = identity_model().to_metadata();
        md.insert("LINE_NUM_COEFF".to_string(), "1 2 3".to_string());
        let err = RpcModel::from_metadata(&md).unwrap_err();
        assert!(err
            .to_string()
            .contains("LINE_NUM_COEFF must hold 20 coefficients, got 3"));
    }

    #[test]
    fn test_bounding_box_defaults_to_globe() {
        let mut md = identity_model().to_metadata();
        md.remove("MIN_LONG");
        md.remove("MIN_LAT");
        md.remove("MAX_LONG");
        md.remove("MAX_LAT");

        let model = RpcModel::from_metadata(&md).unwrap();
        assert_eq!(model.long_min, -180.0);
        assert_eq!(model.lat_min, -90.0);
        assert_eq!(model.long_max, 180.0);
        assert_eq!(model.lat_max, 90.0);
    }

    #[test]
    fn test_degenerate_denominator_yields_non_finite() {
        let mut model = identity_model();
        model.samp_den_coeff = [0.0; 20];
        let evaluator = RpcEvaluator::new(&model);
        let (pixel, _) = model.project(&evaluator, -105.0, 40.0, 2000.0);
        assert!(!pixel.is_finite());
    }
}
