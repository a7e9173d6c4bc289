pub mod error;
pub mod hashing;
pub mod schema;
pub mod store;

pub use error::{Result, StoreError};
pub use store::{NewEnvelope, RegisterAgentInput, Store};
