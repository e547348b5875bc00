pub mod aggregate;
pub mod config;
pub mod dtx;
pub mod ec_class;
pub mod erasure_code;
pub mod membership;
pub mod object_client;
pub mod recx;
pub mod rpc;
pub mod store;
pub mod testkit;
pub mod types;

mod error;
pub use error::{AggError, AggResult};
