// waypoint-server: session core and WebSocket gateway for collaborative maps.

pub mod auth;
pub mod cache;
pub mod config;
pub mod cors;
pub mod db;
pub mod error;
pub mod participants;
pub mod permissions;
pub mod registry;
pub mod rooms;
pub mod store;
pub mod ws;
