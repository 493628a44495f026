//! API layer
//!
//! HTTP handlers for:
//! - Client JSON API (for reading apps)
//! - ActivityPub (for federation)
//! - Well-known discovery
//! - Metrics (Prometheus)

mod activitypub;
mod client;
mod dto;
pub mod metrics;
mod wellknown;

pub use dto::*;

pub use activitypub::activitypub_router;
pub use client::json_api_router;
pub use metrics::metrics_router;
pub use wellknown::wellknown_router;
