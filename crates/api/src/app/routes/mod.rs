use axum::{
    routing::{delete, get, post},
    Router,
};

pub mod events;
pub mod runs;
pub mod system;

/// Router for everything under `/v1`.
pub fn router() -> Router {
    Router::new()
        .route("/events", post(events::emit_event))
        .route("/runs/:id", get(runs::get_run))
        .route("/dead-letters", get(runs::list_dead_letters))
        .route("/dead-letters/:id", delete(runs::discard_dead_letter))
        .route("/dead-letters/:id/replay", post(runs::replay_dead_letter))
        .route("/stats", get(system::stats))
}
