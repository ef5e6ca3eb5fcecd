use axum::{routing::delete, routing::get, routing::patch, routing::post, routing::put, Router};

use crate::http::handlers;
use crate::AppState;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn auth() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(handlers::signup))
        .route("/auth/login", post(handlers::login))
        .route("/auth/refresh", post(handlers::refresh_token))
        .route("/auth/revoke", post(handlers::revoke_token))
        .route("/auth/me", get(handlers::get_current_user))
}

pub fn rules() -> Router<AppState> {
    Router::new()
        .route("/rules", post(handlers::create_rule))
        .route("/rules", get(handlers::list_rules))
        .route("/rules/:id", patch(handlers::update_rule))
        .route("/rules/:id", delete(handlers::delete_rule))
}

pub fn notifications() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(handlers::list_notifications))
        .route("/notifications/unread", get(handlers::unread_notifications))
        .route(
            "/notifications/:id/read",
            post(handlers::mark_notification_read),
        )
}

pub fn preferences() -> Router<AppState> {
    Router::new()
        .route("/preferences", get(handlers::get_preferences))
        .route("/preferences", put(handlers::update_preferences))
}

pub fn observations() -> Router<AppState> {
    Router::new().route("/observations", post(handlers::ingest_observation))
}
