//! turbopush server: render view fragments and push them to connected
//! clients as Turbo Stream elements.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod hub;
pub mod render;
pub mod response;
pub mod state;
pub mod tempdata;
pub mod views;

use axum::{routing::get, Router};

pub use context::{
    ConnectionContext, FragmentRequest, HttpMetadata, Origin, RenderingContext, RequestState,
    RouteData, ViewData,
};
pub use dispatch::{Dispatcher, PushConnection, RenderingServices};
pub use hub::{string_argument, HubCallerContext, HubHandler, HubMethodError, HubRegistry};
pub use render::FragmentRenderer;
pub use response::{ProblemResponse, TurboStreamPartialView, TurboStreamResponse};
pub use state::AppState;
pub use tempdata::{CookieTempDataProvider, TempData, TempDataProvider};
pub use views::{MiniJinjaViewEngine, ViewEngine, ViewLookup};

/// Routes for the hub websocket endpoint.
pub fn hub_routes(path: &str) -> Router<AppState> {
    Router::new().route(path, get(hub::ws_handler))
}
