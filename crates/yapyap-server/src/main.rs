mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    http::{HeaderMap, HeaderValue, Method, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use yapyap_api::mailer::{DisabledMailer, Mailer, SendGridMailer};
use yapyap_api::media::{CloudinaryStore, DisabledMediaStore, MediaStore};
use yapyap_api::middleware::{authenticate, token_from_headers};
use yapyap_api::{ApiError, AppState, AppStateInner, routes};
use yapyap_gateway::{Dispatcher, connection};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "yapyap=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(yapyap_db::Database::open(&config.db_path)?);

    let mailer: Arc<dyn Mailer> = match &config.sendgrid {
        Some(sg) => Arc::new(SendGridMailer::new(sg.api_key.clone(), sg.from.clone())?),
        None => {
            warn!("SENDGRID_API_KEY / SENDGRID_EMAIL not set, OTP emails will not be sent");
            Arc::new(DisabledMailer)
        }
    };
    let media: Arc<dyn MediaStore> = match &config.cloudinary {
        Some(c) => Arc::new(CloudinaryStore::new(
            c.cloud_name.clone(),
            c.api_key.clone(),
            c.api_secret.clone(),
        )?),
        None => {
            warn!("Cloudinary not configured, media uploads will fail");
            Arc::new(DisabledMediaStore)
        }
    };

    let state: AppState = Arc::new(AppStateInner {
        db,
        dispatcher: Dispatcher::new(),
        auth: config.auth.clone(),
        mailer,
        media,
    });

    let ws_route = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state.clone());

    let app = routes::router(state)
        .merge(ws_route)
        .layer(cors_layer(config.frontend_url.as_deref())?)
        .layer(TraceLayer::new_for_http());

    info!("Yapyap server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Cookies need an explicit origin with credentials; without a configured
/// frontend anything goes.
fn cors_layer(frontend_url: Option<&str>) -> anyhow::Result<CorsLayer> {
    let Some(origin) = frontend_url else {
        return Ok(CorsLayer::permissive());
    };

    Ok(CorsLayer::new()
        .allow_origin(origin.trim_end_matches('/').parse::<HeaderValue>()?)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]))
}

/// Authenticate from the session cookie (or Bearer header) before upgrading.
async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = token_from_headers(&headers) else {
        return ApiError::unauthorized("Not authenticated").into_response();
    };
    let claims = match authenticate(&state, &token).await {
        Ok(claims) => claims,
        Err(e) => return e.into_response(),
    };

    let dispatcher = state.dispatcher.clone();
    let db = state.db.clone();
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, dispatcher, db, claims.sub, claims.username)
    })
}
