pub mod appresult;
pub mod auth;
pub mod chat;
pub mod config;
pub mod connections;
pub mod db;
pub mod feed;
pub mod profiles;
pub mod session;

use axum::{extract::FromRef, http::{header, HeaderValue, Method}, Router};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};

pub use appresult::{AppError, AppResult};
use config::Config;
use db::Store;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: Store,
}

pub fn app(store: Store, config: &Config) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(config.session_minutes)));

    let router = Router::new()
        .merge(auth::router())
        .nest("/p", profiles::router())
        .nest("/c", connections::router())
        .nest("/m", chat::router())

        .with_state(AppState { store })
        .layer(session_layer);

    match cors_layer(&config.allowed_origins) {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE])
            .allow_credentials(true)
    )
}
