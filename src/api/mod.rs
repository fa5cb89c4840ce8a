//! Public Read API (§4.M): a stateless router over Redis/Postgres under
//! `/public/v1`. No user-scoped context is required for market data.

pub mod envelope;
pub mod public;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use public::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/public/v1/candles/:exchange/:symbol/:timeframe", get(public::get_candles))
        .route("/public/v1/symbols", get(public::get_symbols))
        .route("/public/v1/signals/:exchange/:symbol", get(public::get_signals))
        .route("/public/v1/alerts/:exchange", get(public::get_alerts))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
