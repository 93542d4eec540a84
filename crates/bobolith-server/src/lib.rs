//! Bobolith appliance server.
//!
//! Appliances hold a WebSocket open to `/ws/{appliance_id}` and ping over
//! it. The server answers, tracks each appliance's reachability
//! (`UP`, `UNRESPONSIVE`, `DOWN`) and stores it in the appliance directory.

pub mod api;
pub mod behavior;
pub mod config;
pub mod directory;
pub mod error;
pub mod heartbeat;
pub mod routing;
pub mod server;
pub mod session;
