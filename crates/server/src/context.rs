//! Ambient request state and the rendering context built from it.
//!
//! A fragment can be rendered from two places: an HTTP handler that already
//! holds a [`RequestState`], or a hub method running on a connection that only
//! remembers the [`HttpMetadata`] of its upgrade request. Both paths produce
//! the same [`RenderingContext`].

use std::collections::BTreeMap;
use std::convert::Infallible;

use axum::extract::{FromRef, FromRequestParts, MatchedPath, RawPathParams};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method, Uri};
use serde::Serialize;
use serde_json::Value;
use turbopush_shared::{ConnectionId, DispatchError};

use crate::dispatch::RenderingServices;
use crate::render::FragmentRenderer;
use crate::response::TurboStreamPartialView;
use crate::tempdata::{TempData, TempDataProvider};

const CONTROLLER_KEY: &str = "controller";
const ACTION_KEY: &str = "action";

/// Route values of the request that selected the handler.
///
/// `controller` and `action` are derived from the literal segments of the
/// matched route and drive view lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RouteData(BTreeMap<String, String>);

impl RouteData {
    /// Derive route values from a matched route template such as
    /// `/messages/{id}/preview` and its captured parameters.
    pub fn from_matched_path<I, K, V>(matched: &str, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let literals: Vec<&str> = matched
            .split('/')
            .filter(|segment| {
                !segment.is_empty()
                    && !segment.starts_with('{')
                    && !segment.starts_with(':')
                    && !segment.starts_with('*')
            })
            .collect();

        let controller = literals.first().copied().unwrap_or("home");
        let action = match literals.len() {
            0 | 1 => "index",
            n => literals[n - 1],
        };

        let mut values: BTreeMap<String, String> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        values.insert(CONTROLLER_KEY.to_string(), controller.to_string());
        values.insert(ACTION_KEY.to_string(), action.to_string());
        Self(values)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn controller(&self) -> Option<&str> {
        self.get(CONTROLLER_KEY)
    }

    pub fn action(&self) -> Option<&str> {
        self.get(ACTION_KEY)
    }
}

/// The parts of an HTTP request that outlive it: kept per request and, for
/// hub connections, captured from the websocket upgrade.
#[derive(Debug, Clone)]
pub struct HttpMetadata {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub route: RouteData,
}

impl HttpMetadata {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, route: RouteData) -> Self {
        Self {
            method,
            uri,
            headers,
            route,
        }
    }

    async fn from_parts<S: Send + Sync>(parts: &mut Parts, state: &S) -> Self {
        let matched = parts
            .extensions
            .get::<MatchedPath>()
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());

        let params: Vec<(String, String)> = match RawPathParams::from_request_parts(parts, state).await {
            Ok(raw) => raw
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            Err(_) => Vec::new(),
        };

        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
            route: RouteData::from_matched_path(&matched, params),
        }
    }
}

impl<S> FromRequestParts<S> for HttpMetadata
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts, state).await)
    }
}

/// Model plus any additional values handed to a view.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ViewData {
    pub model: Value,
    pub entries: BTreeMap<String, Value>,
}

impl ViewData {
    pub fn with_model(model: Value) -> Self {
        Self {
            model,
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }
}

/// Ambient state of an in-flight HTTP request, available to handlers as an
/// extractor.
#[derive(Debug, Clone)]
pub struct RequestState {
    pub http: HttpMetadata,
    pub view_data: ViewData,
    pub temp_data: TempData,
    renderer: Option<FragmentRenderer>,
}

impl RequestState {
    pub fn new(http: HttpMetadata, temp_data: TempData) -> Self {
        Self {
            http,
            view_data: ViewData::default(),
            temp_data,
            renderer: None,
        }
    }

    /// Attach the renderer partial views returned from this request use.
    pub fn with_renderer(mut self, renderer: FragmentRenderer) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn renderer(&self) -> Option<&FragmentRenderer> {
        self.renderer.as_ref()
    }

    pub fn route(&self) -> &RouteData {
        &self.http.route
    }

    /// Respond with a partial view rendered as a Turbo Stream.
    ///
    /// `None` selects the view named after the current action.
    pub fn turbo_stream_partial_view(
        &mut self,
        view_name: Option<&str>,
        model: Value,
    ) -> TurboStreamPartialView {
        self.view_data.model = model;
        TurboStreamPartialView::new(view_name.map(str::to_string), self.clone())
    }
}

impl<S> FromRequestParts<S> for RequestState
where
    S: Send + Sync,
    RenderingServices: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let services = RenderingServices::from_ref(state);
        let http = HttpMetadata::from_parts(parts, state).await;
        let temp_data = services.temp_data.load(&http);
        let renderer = FragmentRenderer::new(services.view_engine.clone());
        Ok(Self::new(http, temp_data).with_renderer(renderer))
    }
}

/// What a hub connection knows about itself.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub connection_id: ConnectionId,
    http: Option<HttpMetadata>,
}

impl ConnectionContext {
    pub fn new(connection_id: ConnectionId, http: Option<HttpMetadata>) -> Self {
        Self {
            connection_id,
            http,
        }
    }

    /// The upgrade request that opened this connection, if any.
    pub fn http_metadata(&self) -> Option<&HttpMetadata> {
        self.http.as_ref()
    }
}

/// Where a dispatch was triggered from.
#[derive(Debug, Clone, Copy)]
pub enum Origin<'a> {
    Request(&'a RequestState),
    Connection(&'a ConnectionContext),
}

/// One render-then-deliver call.
#[derive(Debug, Clone)]
pub struct FragmentRequest<'a> {
    pub view_name: Option<&'a str>,
    pub model: Value,
    pub origin: Origin<'a>,
}

impl<'a> FragmentRequest<'a> {
    pub fn from_request(state: &'a RequestState, view_name: Option<&'a str>, model: Value) -> Self {
        Self {
            view_name,
            model,
            origin: Origin::Request(state),
        }
    }

    pub fn from_connection(
        connection: &'a ConnectionContext,
        view_name: &'a str,
        model: Value,
    ) -> Self {
        Self {
            view_name: Some(view_name),
            model,
            origin: Origin::Connection(connection),
        }
    }
}

/// Everything a view engine needs to render one view.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderingContext {
    pub view_name: String,
    pub route: RouteData,
    pub view_data: ViewData,
    pub temp_data: TempData,
}

impl RenderingContext {
    /// Build from an in-flight request, reusing its route values, view data
    /// and temp data with `model` substituted.
    pub fn from_request(
        state: &RequestState,
        view_name: Option<&str>,
        model: Value,
    ) -> Result<Self, DispatchError> {
        let view_name = match view_name {
            Some(name) => non_empty_view_name(name)?,
            None => state
                .route()
                .action()
                .ok_or(DispatchError::InvalidArgument { name: "view_name" })?,
        };

        let mut view_data = state.view_data.clone();
        view_data.model = model;

        Ok(Self {
            view_name: view_name.to_string(),
            route: state.route().clone(),
            view_data,
            temp_data: state.temp_data.clone(),
        })
    }

    /// Build from a hub connection. The connection must have been opened by an
    /// HTTP upgrade; its route values are reused and everything else starts
    /// empty apart from freshly loaded temp data.
    pub fn from_connection(
        connection: &ConnectionContext,
        view_name: &str,
        model: Value,
        temp_data: &dyn TempDataProvider,
    ) -> Result<Self, DispatchError> {
        let view_name = non_empty_view_name(view_name)?;
        let http = connection
            .http_metadata()
            .ok_or(DispatchError::NoAssociatedRequest)?;

        Ok(Self {
            view_name: view_name.to_string(),
            route: http.route.clone(),
            view_data: ViewData::with_model(model),
            temp_data: temp_data.load(http),
        })
    }
}

fn non_empty_view_name(name: &str) -> Result<&str, DispatchError> {
    if name.trim().is_empty() {
        Err(DispatchError::InvalidArgument { name: "view_name" })
    } else {
        Ok(name)
    }
}
