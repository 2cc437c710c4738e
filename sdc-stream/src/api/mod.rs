//! HTTP API handlers for sdc-stream

pub mod health;
pub mod invocations;
pub mod model;

pub use health::health_routes;
pub use invocations::invoke;
pub use model::model_info;
