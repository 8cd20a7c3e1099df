pub mod handlers;
pub mod pages;

use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn create_router(state: AppState) -> Router {
    let media_route = format!(
        "{}/{{filename}}",
        state.config.media.url_prefix.trim_end_matches('/')
    );

    Router::new()
        .route("/", get(handlers::root_handler))
        .route("/rfid_event", post(handlers::rfid_event))
        .route("/reload_rfid_map", post(handlers::reload_rfid_map))
        .route("/current_tag", get(handlers::current_tag))
        .route("/current_image", get(handlers::current_image))
        .route("/select", get(handlers::select_page).post(handlers::select_media))
        .route("/display", get(handlers::display_page))
        .route(&media_route, get(handlers::serve_media))
        .with_state(state)
}
