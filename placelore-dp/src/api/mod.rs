//! HTTP API handlers for placelore-dp

pub mod discovery;
pub mod health;
pub mod queue;
pub mod sse;

pub use discovery::discovery_routes;
pub use health::health_routes;
pub use queue::queue_routes;
pub use sse::event_stream;
