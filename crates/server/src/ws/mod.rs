//! WebSocket surface of the session core.
//!
//! `/v1/session` upgrades to the waypoint-session.v1 protocol. The
//! caller's identity is resolved from the upgrade request headers; the
//! socket loop in [`handler`] then drives the shared [`gateway`].

pub mod gateway;
pub mod handler;
pub mod protocol;

use std::sync::Arc;

use axum::{routing::get, Router};

use crate::auth::jwt::JwtAccessTokenService;
use crate::ws::gateway::SessionGateway;

pub const HEARTBEAT_INTERVAL_MS: u32 = 15_000;
pub const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub const MAX_FRAME_BYTES: u32 = 262_144;
/// Depth of each connection's bounded outbound queue. A peer that cannot
/// drain this many frames is disconnected rather than buffered without
/// limit.
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

#[derive(Clone)]
pub struct GatewayState {
    pub gateway: Arc<SessionGateway>,
    pub jwt_service: Arc<JwtAccessTokenService>,
}

pub fn router(gateway: Arc<SessionGateway>, jwt_service: Arc<JwtAccessTokenService>) -> Router {
    let state = GatewayState { gateway, jwt_service };
    Router::new().route("/v1/session", get(handler::ws_upgrade)).with_state(state)
}
