//! Affine geotransform helpers shared by the sensor model seeding and
//! elevation raster access.

use nalgebra::Matrix2;

/// Six-coefficient affine transform in raster convention:
/// `x = c[0] + px*c[1] + py*c[2]`, `y = c[3] + px*c[4] + py*c[5]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    pub const IDENTITY: GeoTransform = GeoTransform([0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);

    /// Apply the transform to a coordinate pair.
    #[inline]
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let c = &self.0;
        (c[0] + x * c[1] + y * c[2], c[3] + x * c[4] + y * c[5])
    }

    /// Invert the affine. Returns `None` when the linear part is singular.
    pub fn invert(&self) -> Option<GeoTransform> {
        let c = &self.0;
        let inv = Matrix2::new(c[1], c[2], c[4], c[5]).try_inverse()?;
        Some(GeoTransform([
            -(inv[(0, 0)] * c[0] + inv[(0, 1)] * c[3]),
            inv[(0, 0)],
            inv[(0, 1)],
            -(inv[(1, 0)] * c[0] + inv[(1, 1)] * c[3]),
            inv[(1, 0)],
            inv[(1, 1)],
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_apply() {
        let (x, y) = GeoTransform::IDENTITY.apply(12.5, -3.0);
        assert_eq!(x, 12.5);
        assert_eq!(y, -3.0);
    }

    #[test]
    fn test_invert_roundtrip() {
        // North-up raster transform with a slight shear.
        let gt = GeoTransform([-180.0, 0.1, 0.001, 90.0, -0.002, -0.1]);
        let inv = gt.invert().unwrap();

        let (x, y) = gt.apply(123.0, 456.0);
        let (px, py) = inv.apply(x, y);
        assert!((px - 123.0).abs() < 1e-9);
        assert!((py - 456.0).abs() < 1e-9);
    }

    #[test]
    fn test_invert_singular() {
        let gt = GeoTransform([0.0, 1.0, 2.0, 0.0, 2.0, 4.0]);
        assert!(gt.invert().is_none());
    }
}
