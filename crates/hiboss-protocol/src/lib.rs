pub mod frames;
pub mod methods;
pub mod params;

pub use frames::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
