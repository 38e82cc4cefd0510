//! WebSocket gateway for voice sessions.
//!
//! Each connection owns one [`voxlane_pipeline::SessionPipeline`]; the
//! gateway resolves providers from config, checks tokens on privileged
//! commands and relays pipeline frames back to the client.

pub mod auth;
pub mod capabilities;
pub mod connection;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod state;

pub use auth::TokenVerifier;
pub use capabilities::{Capabilities, RecognizerFactory};
pub use server::{router, serve, start_gateway};
pub use state::GatewayState;
