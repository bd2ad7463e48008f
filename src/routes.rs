// routes.rs
use std::time::Duration;

use axum::{
    routing::{delete, get, post},
    Router,
};
use http::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    Method,
};
use tower_http::cors::{Any, CorsLayer};

use crate::handlers;
use crate::state::AppState;

pub fn create_routes(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    let admin = Router::new()
        .route("/login", post(handlers::login))
        .route("/logout", post(handlers::logout))
        .route("/session", get(handlers::get_session))
        .route("/message", post(handlers::update_message))
        .route("/options", post(handlers::add_option))
        .route("/options/{id}", delete(handlers::delete_option))
        .route("/reset", post(handlers::reset_votes));

    let api = Router::new()
        .route("/options", get(handlers::get_options))
        .route("/message", get(handlers::get_message))
        .route("/results", get(handlers::get_results))
        .route("/locations", get(handlers::get_locations))
        .route("/events", get(handlers::events))
        .route("/vote", post(handlers::vote))
        .nest("/admin", admin);

    Router::new()
        .nest("/api", api)
        .layer(cors)
        .with_state(state)
}
