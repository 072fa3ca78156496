use std::{net::SocketAddr, sync::Arc};

use app_api::App;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    routing::get,
    Form, Json, Router,
};
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{EventPayload, UpdateBatch},
};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{info, warn};

mod app_state;
pub mod config;

pub use app_state::AppState;
use config::Settings;

const CLIENT_SCRIPT: &str = include_str!("../static/relay.js");

pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.max_body_bytes;
    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .route("/", get(render_page).post(handle_event));
    match script_route(&state.client_script_url) {
        Some(path) => router = router.route(path, get(client_script)),
        None => info!(
            url = %state.client_script_url,
            "client script is hosted elsewhere; not serving the bundled copy"
        ),
    }
    router
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
}

/// Path to serve the bundled client script on, when the page points at this
/// server for it.
fn script_route(url: &str) -> Option<&str> {
    let reserved = matches!(url, "/" | "/healthz");
    let plain = url
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '-' | '_'));
    (url.starts_with('/') && !url.contains("//") && !reserved && plain).then_some(url)
}

/// Serves `app` until the listener fails.
pub async fn serve(app: App, settings: &Settings) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(app, settings));
    let router = build_router(state);

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, title = %settings.title, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn client_script() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/javascript; charset=utf-8")], CLIENT_SCRIPT)
}

async fn render_page(State(state): State<Arc<AppState>>) -> Html<String> {
    let app = state.app.lock().await;
    Html(app.render_page(&state.client_script_url))
}

async fn handle_event(
    State(state): State<Arc<AppState>>,
    Form(payload): Form<EventPayload>,
) -> Result<Json<UpdateBatch>, (StatusCode, Json<ApiError>)> {
    let mut app = state.app.lock().await;
    let updates = app.handle_event(&payload).map_err(|e| {
        warn!(
            widget = %payload.id,
            event = %payload.event,
            code = ?e.code,
            message = %e.message,
            "event rejected"
        );
        (status_for(e.code), Json(e))
    })?;
    info!(
        widget = %payload.id,
        event = %payload.event,
        updates = updates.len(),
        "event handled"
    );
    Ok(Json(updates))
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
