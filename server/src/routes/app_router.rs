use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_cookies::CookieManagerLayer;
use tower_http::cors::CorsLayer;

use crate::auth::require_auth;
use crate::request_tracing;
use crate::server_config::cfg;
use crate::ServerState;

pub struct AppRouter;

impl AppRouter {
    pub fn create(state: ServerState) -> Router {
        let cors = {
            let origins: Vec<HeaderValue> = cfg
                .dashboard
                .cors_origin_list()
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_headers([header::CONTENT_TYPE])
                .allow_credentials(true)
        };

        let api = Router::new()
            .nest("/sync", super::sync::router())
            .nest("/emails", super::emails::router())
            .nest("/analytics", super::analytics::router())
            .nest("/categories", super::categories::router())
            .nest("/actions", super::actions::router())
            .nest("/action-items", super::action_items::router())
            .nest("/alerts", super::alerts::router())
            .nest("/rules", super::rules::router())
            .nest("/expenses", super::expenses::router())
            .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

        Router::new()
            .route("/", get(|| async { "Mailscope server" }))
            .nest("/api/auth", super::auth::router())
            .nest("/api", api)
            .layer(request_tracing::propagate_request_id_layer())
            .layer(request_tracing::tracing_layer())
            .layer(request_tracing::request_id_layer())
            .layer(cors)
            .layer(CookieManagerLayer::new())
            .with_state(state)
            .fallback(handler_404)
    }
}

pub async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Route does not exist")
}
