//! turbopush demo server.
//!
//! Serves a hub endpoint and a couple of routes that push rendered message
//! fragments to every connected client.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use turbopush_server::{
    config::ServerConfig, hub_routes, string_argument, AppState, CookieTempDataProvider,
    HubCallerContext, HubHandler, HubMethodError, MiniJinjaViewEngine, ProblemResponse,
    RenderingServices, RequestState, TurboStreamResponse,
};
use turbopush_shared::Destination;

const MESSAGE_VIEW: &str = "_Message";

/// Hub methods exposed to browsers.
struct ChatHub;

#[async_trait]
impl HubHandler for ChatHub {
    async fn invoke(
        &self,
        caller: &HubCallerContext,
        method: &str,
        arguments: Vec<Value>,
    ) -> Result<(), HubMethodError> {
        match method {
            "SendMessage" => {
                let text = string_argument(method, &arguments, 0)?;
                caller.send_partial_view(Destination::All, MESSAGE_VIEW, text).await?;
            }
            "JoinRoom" => {
                let room = string_argument(method, &arguments, 0)?;
                caller.groups().add_to_group(caller.connection_id(), room).await;
            }
            "LeaveRoom" => {
                let room = string_argument(method, &arguments, 0)?;
                caller.groups().remove_from_group(caller.connection_id(), room).await;
            }
            "SendToRoom" => {
                let room = string_argument(method, &arguments, 0)?;
                let text = string_argument(method, &arguments, 1)?;
                caller
                    .send_partial_view(Destination::group(room), MESSAGE_VIEW, text)
                    .await?;
            }
            _ => return Err(HubMethodError::UnknownMethod(method.to_string())),
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    text: String,
}

/// Push a message fragment to every hub client from a plain HTTP request.
async fn broadcast_message(
    State(state): State<AppState>,
    request: RequestState,
    Query(query): Query<MessageQuery>,
) -> Result<StatusCode, ProblemResponse> {
    state
        .dispatcher
        .send_partial_view_from_request(&request, Destination::All, Some(MESSAGE_VIEW), query.text)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// Return the fragment in the response body instead of pushing it.
async fn preview_message(
    mut request: RequestState,
    Query(query): Query<MessageQuery>,
) -> Result<TurboStreamResponse, ProblemResponse> {
    Ok(request
        .turbo_stream_partial_view(None, Value::String(query.text))
        .await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "turbopush_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!("Loading views from {}", config.views_dir.display());

    let services = RenderingServices::new(
        Arc::new(MiniJinjaViewEngine::from_dir(&config.views_dir)),
        Arc::new(CookieTempDataProvider::new(config.tempdata_cookie.clone())),
    );
    let state = AppState::new(services, Arc::new(ChatHub));

    let app = Router::new()
        .route("/messages/broadcast", get(broadcast_message))
        .route("/messages/preview", get(preview_message))
        .merge(hub_routes(&config.hub_path))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("Starting server on {}, hub at {}", config.bind_addr, config.hub_path);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
