use axum::{
    extract::Request,
    http::{header, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod repositories;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::AppError;
pub use services::AppState;

/// CSP middleware adds Content-Security-Policy header to all responses
async fn csp_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    response
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    let api = Router::new()
        .nest("/announcements", announcement_routes())
        .nest("/notifications", notification_routes())
        .nest("/admin", admin_routes())
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest("/api/v1", api)
        .with_state(app_state)
        .layer(cors)
        .layer(middleware::from_fn(csp_middleware))
        .layer(CompressionLayer::new())
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn announcement_routes() -> Router<Arc<AppState>> {
    use handlers::announcements as h;

    Router::new()
        .route("/", get(h::list_announcements).post(h::create_announcement))
        .route(
            "/{id}",
            get(h::get_announcement)
                .patch(h::update_announcement)
                .delete(h::delete_announcement),
        )
        .route("/{id}/archive", post(h::archive_announcement))
        .route("/{id}/read", post(h::mark_announcement_read))
        .route("/{id}/like", post(h::toggle_like))
        .route("/{id}/comment", post(h::add_comment))
        .route("/{id}/comments/{comment_id}/replies", post(h::add_reply))
        .route("/{id}/stats", get(h::announcement_stats))
}

fn notification_routes() -> Router<Arc<AppState>> {
    use handlers::notifications as h;

    Router::new()
        .route("/", get(h::list_notifications))
        .route("/unread-count", get(h::unread_count))
        .route("/read-all", patch(h::mark_all_read))
        .route("/send", post(h::send_notification))
        .route("/{id}/read", patch(h::mark_read))
        .route("/{id}", axum::routing::delete(h::delete_notification))
}

fn admin_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/notifications/sweep",
            post(handlers::admin::sweep_notifications),
        )
        .route_layer(middleware::from_fn(
            middlewares::auth::admin_guard_middleware,
        ))
}
