//! Ripstream Web - HTTP streaming surface

#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![warn(clippy::too_many_lines)]
//!
//! axum router over the engine registry: ranged file streaming with
//! open/close accounting, session creation with statistics, and media
//! probing through an injected prober.

pub mod errors;
pub mod handlers;
pub mod lease;
pub mod server;

// Re-export main types
pub use errors::ApiError;
pub use lease::{LeasedStream, StreamLease};
pub use server::{AppState, ServerError, build_router, run_server};
