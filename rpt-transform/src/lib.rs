mod batch;
mod cache;
mod dem;
mod describe;
mod error;
mod inverse;
mod transformer;

pub use describe::TransformerDescription;
pub use error::{Result, TransformerError};
pub use inverse::SolverTuning;
pub use transformer::{DEFAULT_PIX_ERR_THRESHOLD, Direction, INVALID_COORDINATE, RpcTransformer};

// Re-export from rpt-core for convenience
pub use rpt_core::{DemInterpolation, Footprint, RpcModel, TransformOptions};
