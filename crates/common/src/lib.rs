// waypoint-common: shared types and the wire protocol for the Waypoint workspace

pub mod protocol;
pub mod types;
