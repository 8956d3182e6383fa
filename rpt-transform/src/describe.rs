//! Persisted transformer description.
//!
//! A description carries everything needed to reconstruct a transformer with
//! identical behavior, without going back to the original metadata source:
//! the full RPC vocabulary, the direction flag, the DEM configuration, the
//! solver thresholds and the footprint.

use std::collections::BTreeMap;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use rpt_core::{DemInterpolation, RpcModel, TransformOptions};

use crate::error::Result;
use crate::transformer::RpcTransformer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformerDescription {
    pub reversed: bool,
    pub pixel_error_threshold: f64,
    pub height_offset: f64,
    pub height_scale: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dem_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dem_interpolation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dem_missing_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dem_apply_vdatum_shift: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dem_srs: Option<String>,
    #[serde(default)]
    pub max_iterations: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footprint: Option<String>,
    /// The RPC00B metadata vocabulary, coefficients included.
    pub metadata: BTreeMap<String, String>,
}

impl TransformerDescription {
    /// The description as a generic hierarchical key-value tree.
    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

impl RpcTransformer {
    /// Export the transformer's full configuration for persistence.
    pub fn describe(&self) -> TransformerDescription {
        let opts = self.options();
        let has_dem = opts.dem_path.is_some();
        TransformerDescription {
            reversed: self.is_reversed(),
            pixel_error_threshold: self.pixel_error_threshold(),
            height_offset: opts.height_offset,
            height_scale: opts.height_scale,
            dem_path: opts.dem_path.clone(),
            dem_interpolation: has_dem.then(|| opts.dem_interpolation.as_str().to_string()),
            dem_missing_value: if has_dem { opts.dem_missing_value } else { None },
            dem_apply_vdatum_shift: has_dem.then_some(opts.apply_vdatum_shift),
            dem_srs: opts.dem_srs.clone(),
            max_iterations: opts.max_iterations,
            footprint: opts.footprint.clone(),
            metadata: self.model().to_metadata().into_iter().collect(),
        }
    }

    /// Reconstruct a transformer from a persisted description.
    pub fn from_description(description: &TransformerDescription) -> Result<Self> {
        let metadata: HashMap<String, String> = description
            .metadata
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let model = RpcModel::from_metadata(&metadata)?;

        let opts = TransformOptions {
            height_offset: description.height_offset,
            height_scale: description.height_scale,
            dem_path: description.dem_path.clone(),
            dem_interpolation: description
                .dem_interpolation
                .as_deref()
                .and_then(DemInterpolation::parse)
                .unwrap_or_default(),
            dem_missing_value: description.dem_missing_value,
            dem_srs: description.dem_srs.clone(),
            apply_vdatum_shift: description.dem_apply_vdatum_shift.unwrap_or(true),
            pixel_error_threshold: Some(description.pixel_error_threshold),
            max_iterations: description.max_iterations,
            footprint: description.footprint.clone(),
        };

        Self::from_options(
            model,
            description.reversed,
            description.pixel_error_threshold,
            opts,
        )
    }
}
