use thiserror::Error;

/// Errors surfaced at transformer construction or reconstitution. Per-point
/// transform failures are reported through the success-flag array instead of
/// this type.
#[derive(Error, Debug)]
pub enum TransformerError {
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error(transparent)]
    Core(#[from] rpt_core::RpcError),

    #[error("Elevation raster {0} has no raster bands")]
    DemWithoutBands(String),

    #[error("Elevation raster {0} has no invertible geotransform")]
    DemGeoTransform(String),

    #[error("Cannot invert the pixel/line approximation around the reference point")]
    DegenerateReference,

    #[error("Invalid transformer description: {0}")]
    Description(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TransformerError>;
