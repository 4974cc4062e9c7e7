//! Agentmesh Gateway - HTTP surface over the control plane

pub mod auth;
pub mod rate;
pub mod server;

pub use auth::ResolvedAuth;
pub use rate::RateGuard;
pub use server::{start_gateway, AppState, GatewaySettings};
