pub mod diag;
pub mod error;
pub mod footprint;
pub mod geotransform;
pub mod options;
pub mod poly;
pub mod rpc;

pub use error::{FootprintError, MetadataError, Result, RpcError};
pub use footprint::Footprint;
pub use geotransform::GeoTransform;
pub use options::{DemInterpolation, TransformOptions, parse_config_bool};
pub use poly::RpcEvaluator;
pub use rpc::RpcModel;
