//! HTTP boundary for the LANVan upload pipeline.
//!
//! Translates requests into the coordinator's inbound shape:
//! - Batch admission of file descriptors
//! - Chunk streaming per session
//! - Session status, abort, and visible file listing

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
