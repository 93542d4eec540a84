//! HTTP and WebSocket surface.

mod appliances;
mod health;
mod router;
mod ws;

pub use router::{create_router, AppState};
