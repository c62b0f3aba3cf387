//! HTTP and websocket relay in front of the printer registry.

pub mod api;
pub mod models;
pub mod relay;

pub use api::create_router;
