//! HTTP query surface
//!
//! JSON over axum. Reads come straight from the store; every write goes
//! through the resolution pipeline.

pub mod entities;
pub mod health;
pub mod maintenance;
pub mod queues;

pub use entities::entity_routes;
pub use health::health_routes;
pub use maintenance::maintenance_routes;
pub use queues::queue_routes;
