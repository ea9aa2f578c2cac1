//! HTTP routing configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::StatusCode,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::app::AppState;

use super::handlers::{
    brand_item_count_handler, create_brand_handler, create_creation_handler, delete_brand_handler,
    delete_creation_handler, deliver_item_handler, get_brand_handler, get_creation_handler,
    get_item_handler, get_trade_handler, get_user_handler, get_user_items_handler,
    health_check_handler, list_brands_handler, list_creations_handler, list_items_handler,
    list_trades_handler, liveness_handler, metrics_handler, order_item_handler, readiness_handler,
    register_user_handler, trade_in_creation_handler, update_brand_handler,
    update_creation_handler,
};

/// Create the application router. Requests exceeding `request_timeout`
/// get `408 Request Timeout`.
pub fn create_router(app_state: Arc<AppState>, request_timeout: Duration) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ));

    let user_routes = Router::new()
        .route("/register", post(register_user_handler))
        .route("/{id}", get(get_user_handler))
        .route("/{id}/items", get(get_user_items_handler));

    let brand_routes = Router::new()
        .route("/", post(create_brand_handler).get(list_brands_handler))
        .route(
            "/{id}",
            get(get_brand_handler).put(update_brand_handler).delete(delete_brand_handler),
        )
        .route("/{id}/items/count", get(brand_item_count_handler));

    let creation_routes = Router::new()
        .route("/", post(create_creation_handler).get(list_creations_handler))
        .route(
            "/{id}",
            get(get_creation_handler).put(update_creation_handler).delete(delete_creation_handler),
        );

    let trade_routes = Router::new()
        .route("/", post(trade_in_creation_handler).get(list_trades_handler))
        .route("/{id}", get(get_trade_handler));

    let item_routes = Router::new()
        .route("/", get(list_items_handler))
        .route("/order", post(order_item_handler))
        .route("/deliver", post(deliver_item_handler))
        .route("/{contract}/{token}", get(get_item_handler));

    let api_routes = Router::new()
        .nest("/users", user_routes)
        .nest("/brands", brand_routes)
        .nest("/creations", creation_routes)
        .nest("/trades", trade_routes)
        .nest("/items", item_routes);

    let health_routes = Router::new()
        .route("/", get(health_check_handler))
        .route("/live", get(liveness_handler))
        .route("/ready", get(readiness_handler));

    Router::new()
        .nest("/api", api_routes)
        .nest("/health", health_routes)
        .route("/metrics", get(metrics_handler))
        .layer(middleware)
        .with_state(app_state)
}
