//! Transformer options, parsed from a key/value map.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{Result, RpcError};

/// DEM resampling kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DemInterpolation {
    Near,
    #[default]
    Bilinear,
    Cubic,
}

impl DemInterpolation {
    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("near") {
            Some(DemInterpolation::Near)
        } else if value.eq_ignore_ascii_case("bilinear") {
            Some(DemInterpolation::Bilinear)
        } else if value.eq_ignore_ascii_case("cubic") {
            Some(DemInterpolation::Cubic)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DemInterpolation::Near => "near",
            DemInterpolation::Bilinear => "bilinear",
            DemInterpolation::Cubic => "cubic",
        }
    }
}

/// Recognized transformer options. `max_iterations` of zero means "pick the
/// default for the configuration" (10 without a DEM, 20 with one).
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOptions {
    pub height_offset: f64,
    pub height_scale: f64,
    pub dem_path: Option<String>,
    pub dem_interpolation: DemInterpolation,
    pub dem_missing_value: Option<f64>,
    pub dem_srs: Option<String>,
    pub apply_vdatum_shift: bool,
    pub pixel_error_threshold: Option<f64>,
    pub max_iterations: usize,
    pub footprint: Option<String>,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            height_offset: 0.0,
            height_scale: 1.0,
            dem_path: None,
            dem_interpolation: DemInterpolation::default(),
            dem_missing_value: None,
            dem_srs: None,
            apply_vdatum_shift: true,
            pixel_error_threshold: None,
            max_iterations: 0,
            footprint: None,
        }
    }
}

impl TransformOptions {
    pub fn from_map(options: &HashMap<String, String>) -> Result<Self> {
        let mut opts = Self::default();

        if let Some(value) = options.get("RPC_HEIGHT") {
            opts.height_offset = parse_f64("RPC_HEIGHT", value)?;
        }
        if let Some(value) = options.get("RPC_HEIGHT_SCALE") {
            opts.height_scale = parse_f64("RPC_HEIGHT_SCALE", value)?;
        }
        if let Some(value) = options.get("RPC_DEM") {
            opts.dem_path = Some(value.clone());
        }
        if let Some(value) = options.get("RPC_DEMINTERPOLATION") {
            opts.dem_interpolation = DemInterpolation::parse(value).unwrap_or_else(|| {
                debug!("unknown DEM interpolation {value}, defaulting to bilinear");
                DemInterpolation::Bilinear
            });
        }
        if let Some(value) = options.get("RPC_DEM_MISSING_VALUE") {
            opts.dem_missing_value = Some(parse_f64("RPC_DEM_MISSING_VALUE", value)?);
        }
        if let Some(value) = options.get("RPC_DEM_SRS") {
            opts.dem_srs = Some(value.clone());
        }
        if let Some(value) = options.get("RPC_DEM_APPLY_VDATUM_SHIFT") {
            opts.apply_vdatum_shift = parse_config_bool(value);
        }
        if let Some(value) = options.get("RPC_PIXEL_ERROR_THRESHOLD") {
            opts.pixel_error_threshold = Some(parse_f64("RPC_PIXEL_ERROR_THRESHOLD", value)?);
        }
        if let Some(value) = options.get("RPC_MAX_ITERATIONS") {
            let iterations: i64 = value.trim().parse().map_err(|_| RpcError::InvalidOption {
                key: "RPC_MAX_ITERATIONS".to_string(),
                message: format!("not an integer: {value}"),
            })?;
            opts.max_iterations = iterations.max(0) as usize;
        }
        if let Some(value) = options.get("RPC_FOOTPRINT") {
            opts.footprint = Some(value.clone());
        }

        Ok(opts)
    }

    /// Rebuild the option map, e.g. to construct a scaled clone of a
    /// transformer from the same configuration.
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("RPC_HEIGHT".to_string(), self.height_offset.to_string());
        map.insert("RPC_HEIGHT_SCALE".to_string(), self.height_scale.to_string());
        if let Some(path) = &self.dem_path {
            map.insert("RPC_DEM".to_string(), path.clone());
            map.insert(
                "RPC_DEMINTERPOLATION".to_string(),
                self.dem_interpolation.as_str().to_string(),
            );
            if let Some(missing) = self.dem_missing_value {
                map.insert("RPC_DEM_MISSING_VALUE".to_string(), missing.to_string());
            }
            if let Some(srs) = &self.dem_srs {
                map.insert("RPC_DEM_SRS".to_string(), srs.clone());
            }
            map.insert(
                "RPC_DEM_APPLY_VDATUM_SHIFT".to_string(),
                if self.apply_vdatum_shift { "TRUE" } else { "FALSE" }.to_string(),
            );
        }
        if let Some(threshold) = self.pixel_error_threshold {
            map.insert("RPC_PIXEL_ERROR_THRESHOLD".to_string(), threshold.to_string());
        }
        map.insert("RPC_MAX_ITERATIONS".to_string(), self.max_iterations.to_string());
        if let Some(footprint) = &self.footprint {
            map.insert("RPC_FOOTPRINT".to_string(), footprint.clone());
        }
        map
    }
}

/// Truthiness in the loose config style: NO/FALSE/OFF/0 are false, anything
/// else is true.
pub fn parse_config_bool(value: &str) -> bool {
    !(value.eq_ignore_ascii_case("no")
        || value.eq_ignore_ascii_case("false")
        || value.eq_ignore_ascii_case("off")
        || value.trim() == "0")
}

fn parse_f64(key: &str, value: &str) -> Result<f64> {
    value.trim().parse().map_err(|_| RpcError::InvalidOption {
        key: key.to_string(),
        message: format!("not a number: {value}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let opts = TransformOptions::from_map(&HashMap::new()).unwrap();
        assert_eq!(opts.height_offset, 0.0);
        assert_eq!(opts.height_scale, 1.0);
        assert_eq!(opts.dem_interpolation, DemInterpolation::Bilinear);
        assert!(opts.apply_vdatum_shift);
        assert_eq!(opts.max_iterations, 0);
        assert!(opts.pixel_error_threshold.is_none());
    }

    #[test]
    fn test_parse_full_set() {
        let opts = TransformOptions::from_map(&map(&[
            ("RPC_HEIGHT", "1000"),
            ("RPC_HEIGHT_SCALE", "2.5"),
            ("RPC_DEM", "/data/dem.tif"),
            ("RPC_DEMINTERPOLATION", "cubic"),
            ("RPC_DEM_MISSING_VALUE", "-32768"),
            ("RPC_DEM_APPLY_VDATUM_SHIFT", "NO"),
            ("RPC_PIXEL_ERROR_THRESHOLD", "0.05"),
            ("RPC_MAX_ITERATIONS", "40"),
        ]))
        .unwrap();

        assert_eq!(opts.height_offset, 1000.0);
        assert_eq!(opts.height_scale, 2.5);
        assert_eq!(opts.dem_path.as_deref(), Some("/data/dem.tif"));
        assert_eq!(opts.dem_interpolation, DemInterpolation::Cubic);
        assert_eq!(opts.dem_missing_value, Some(-32768.0));
        assert!(!opts.apply_vdatum_shift);
        assert_eq!(opts.pixel_error_threshold, Some(0.05));
        assert_eq!(opts.max_iterations, 40);
    }

    #[test]
    fn test_unknown_interpolation_falls_back_to_bilinear() {
        let opts =
            TransformOptions::from_map(&map(&[("RPC_DEMINTERPOLATION", "lanczos")])).unwrap();
        assert_eq!(opts.dem_interpolation, DemInterpolation::Bilinear);
    }

    #[test]
    fn test_malformed_number_is_an_error() {
        let err = TransformOptions::from_map(&map(&[("RPC_HEIGHT", "tall")])).unwrap_err();
        assert!(matches!(err, RpcError::InvalidOption { .. }));
    }

    #[test]
    fn test_negative_max_iterations_means_default() {
        let opts = TransformOptions::from_map(&map(&[("RPC_MAX_ITERATIONS", "-3")])).unwrap();
        assert_eq!(opts.max_iterations, 0);
    }

    #[test]
    fn test_roundtrip_through_map() {
        let opts = TransformOptions {
            height_offset: 12.0,
            height_scale: 0.5,
            dem_path: Some("dem.vrt".to_string()),
            dem_interpolation: DemInterpolation::Near,
            dem_missing_value: Some(0.0),
            dem_srs: Some("EPSG:4979".to_string()),
            apply_vdatum_shift: false,
            pixel_error_threshold: Some(0.2),
            max_iterations: 15,
            footprint: Some("POLYGON((0 0,1 0,1 1,0 1,0 0))".to_string()),
        };
        let restored = TransformOptions::from_map(&opts.to_map()).unwrap();
        assert_eq!(restored, opts);
    }

    #[test]
    fn test_config_bool() {
        assert!(parse_config_bool("YES"));
        assert!(parse_config_bool("true"));
        assert!(parse_config_bool("1"));
        assert!(!parse_config_bool("NO"));
        assert!(!parse_config_bool("off"));
        assert!(!parse_config_bool("0"));
    }
}
