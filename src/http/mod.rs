use axum::Router;

use crate::AppState;

mod auth;
mod error;
mod handlers;
mod routes;

pub use auth::{AuthUser, FeedToken};
pub use error::AppError;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::health())
        .merge(routes::auth())
        .merge(routes::rules())
        .merge(routes::notifications())
        .merge(routes::preferences())
        .merge(routes::observations())
        .with_state(state)
}
