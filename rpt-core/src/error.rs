use thiserror::Error;

/// Common errors for the sensor-model core
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("RPC metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Footprint error: {0}")]
    Footprint(#[from] FootprintError),

    #[error("Invalid value for option {key}: {message}")]
    InvalidOption { key: String, message: String },

    #[error("Geotransform is not invertible")]
    DegenerateGeoTransform,
}

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Missing RPC parameter: {0}")]
    MissingParameter(String),

    #[error("Failed to parse RPC parameter: {0}")]
    InvalidParameter(String),

    #[error("{key} must hold 20 coefficients, got {count}")]
    WrongCoefficientCount { key: String, count: usize },
}

#[derive(Error, Debug)]
pub enum FootprintError {
    #[error("Failed to parse footprint WKT: {0}")]
    Wkt(String),

    #[error("Failed to parse footprint GeoJSON: {0}")]
    GeoJson(String),
}

pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_error_display() {
        let err = MetadataError::MissingParameter("LINE_OFF".to_string());
        assert_eq!(err.to_string(), "Missing RPC parameter: LINE_OFF");

        let err = MetadataError::WrongCoefficientCount {
            key: "LINE_NUM_COEFF".to_string(),
            count: 19,
        };
        assert_eq!(err.to_string(), "LINE_NUM_COEFF must hold 20 coefficients, got 19");
    }

    #[test]
    fn test_rpc_error_from_metadata_error() {
        let err: RpcError = MetadataError::InvalidParameter("LAT_OFF".to_string()).into();
        assert!(matches!(err, RpcError::Metadata(_)));
    }

    #[test]
    fn test_rpc_error_from_footprint_error() {
        let err: RpcError = FootprintError::Wkt("bad token".to_string()).into();
        assert!(matches!(err, RpcError::Footprint(_)));
    }

    #[test]
    fn test_invalid_option_display() {
        let err = RpcError::InvalidOption {
            key: "RPC_HEIGHT".to_string(),
            message: "not a number: abc".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid value for option RPC_HEIGHT: not a number: abc"
        );
    }
}
