//! remtask_agent: serves this host's process list, performance figures and
//! terminate requests to remtask clients over WebSocket.

pub mod config;
pub mod inventory;
pub mod state;
pub mod tls;
pub mod types;
pub mod ws;

use axum::{routing::get, Router};

pub use state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}
