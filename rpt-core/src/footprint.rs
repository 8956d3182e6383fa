//! Validity footprint: a ground-space polygon outside which the sensor
//! model's extrapolated answers are not trusted.

use std::fmt;

use geo::{Geometry, Point, PreparedGeometry, Relate};

use crate::error::FootprintError;

/// A footprint polygon with a prepared-geometry acceleration structure for
/// repeated point-in-polygon tests.
pub struct Footprint {
    text: String,
    prepared: PreparedGeometry<'static, Geometry<f64>>,
}

impl fmt::Debug for Footprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Footprint").field("text", &self.text).finish_non_exhaustive()
    }
}

impl Footprint {
    /// Parse a footprint from WKT, or from GeoJSON when the text starts with
    /// `{`.
    pub fn parse(text: &str) -> Result<Self, FootprintError> {
        let geometry = if text.trim_start().starts_with('{') {
            parse_geojson(text)?
        } else {
            parse_wkt(text)?
        };
        Ok(Self {
            text: text.to_string(),
            prepared: PreparedGeometry::from(geometry),
        })
    }

    /// The original footprint text, as handed in.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the footprint contains the given ground coordinate.
    pub fn contains(&self, long: f64, lat: f64) -> bool {
        self.prepared.relate(&Point::new(long, lat)).is_contains()
    }
}

fn parse_wkt(text: &str) -> Result<Geometry<f64>, FootprintError> {
    let parsed: wkt::Wkt<f64> = text
        .parse()
        .map_err(|e| FootprintError::Wkt(format!("{e}")))?;
    Geometry::try_from(parsed).map_err(|e| FootprintError::Wkt(format!("{e:?}")))
}

fn parse_geojson(text: &str) -> Result<Geometry<f64>, FootprintError> {
    let parsed: geojson::GeoJson = text
        .parse()
        .map_err(|e: geojson::Error| FootprintError::GeoJson(e.to_string()))?;
    let geometry = match parsed {
        geojson::GeoJson::Geometry(g) => g,
        geojson::GeoJson::Feature(feature) => feature
            .geometry
            .ok_or_else(|| FootprintError::GeoJson("feature has no geometry".to_string()))?,
        geojson::GeoJson::FeatureCollection(_) => {
            return Err(FootprintError::GeoJson(
                "expected a geometry, got a feature collection".to_string(),
            ));
        }
    };
    Geometry::try_from(geometry).map_err(|e| FootprintError::GeoJson(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE_WKT: &str = "POLYGON((-106 39,-104 39,-104 41,-106 41,-106 39))";

    #[test]
    fn test_wkt_containment() {
        let footprint = Footprint::parse(SQUARE_WKT).unwrap();
        assert!(footprint.contains(-105.0, 40.0));
        assert!(!footprint.contains(-100.0, 40.0));
        assert!(!footprint.contains(-105.0, 45.0));
    }

    #[test]
    fn test_geojson_containment() {
        let text = r#"{"type":"Polygon","coordinates":[[[-106,39],[-104,39],[-104,41],[-106,41],[-106,39]]]}"#;
        let footprint = Footprint::parse(text).unwrap();
        assert!(footprint.contains(-105.0, 40.0));
        assert!(!footprint.contains(0.0, 0.0));
    }

    #[test]
    fn test_text_is_preserved() {
        let footprint = Footprint::parse(SQUARE_WKT).unwrap();
        assert_eq!(footprint.text(), SQUARE_WKT);
    }

    #[test]
    fn test_invalid_wkt_is_an_error() {
        assert!(Footprint::parse("POLYGON((broken").is_err());
    }

    #[test]
    fn test_invalid_geojson_is_an_error() {
        assert!(Footprint::parse("{\"type\":\"Nonsense\"}").is_err());
    }
}
