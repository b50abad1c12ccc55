//! HTTP API for qrtrace-si

pub mod health;
pub mod index;
pub mod webhook;

pub use health::health_routes;
pub use index::index_routes;
pub use webhook::webhook_routes;
