//! HTTP responses carrying Turbo Stream fragments, and problem responses for
//! dispatch failures.

use std::future::IntoFuture;

use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::future::BoxFuture;
use turbopush_shared::{DispatchError, ProblemDetails, RenderedFragment, TURBO_STREAM_CONTENT_TYPE};

use crate::context::{RenderingContext, RequestState};
use crate::render::FragmentRenderer;

/// A partial view to be rendered as the body of the current response.
///
/// The content type is always [`TURBO_STREAM_CONTENT_TYPE`]. Awaiting the view
/// renders it with the renderer captured by the [`RequestState`] extractor.
#[derive(Debug, Clone)]
pub struct TurboStreamPartialView {
    view_name: Option<String>,
    state: RequestState,
    status: StatusCode,
}

impl TurboStreamPartialView {
    pub(crate) fn new(view_name: Option<String>, state: RequestState) -> Self {
        Self {
            view_name,
            state,
            status: StatusCode::OK,
        }
    }

    pub fn content_type(&self) -> &'static str {
        TURBO_STREAM_CONTENT_TYPE
    }

    pub fn view_name(&self) -> Option<&str> {
        self.view_name.as_deref()
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub async fn execute(self, renderer: &FragmentRenderer) -> Result<TurboStreamResponse, DispatchError> {
        let model = self.state.view_data.model.clone();
        let context = RenderingContext::from_request(&self.state, self.view_name.as_deref(), model)?;
        let fragment = renderer.render(&context).await?;

        Ok(TurboStreamResponse {
            status: self.status,
            fragment,
        })
    }
}

impl IntoFuture for TurboStreamPartialView {
    type Output = Result<TurboStreamResponse, DispatchError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            let renderer = self
                .state
                .renderer()
                .cloned()
                .ok_or(DispatchError::InvalidArgument { name: "renderer" })?;
            self.execute(&renderer).await
        })
    }
}

#[derive(Debug, Clone)]
pub struct TurboStreamResponse {
    status: StatusCode,
    fragment: RenderedFragment,
}

impl TurboStreamResponse {
    pub fn fragment(&self) -> &RenderedFragment {
        &self.fragment
    }
}

impl IntoResponse for TurboStreamResponse {
    fn into_response(self) -> Response {
        (
            self.status,
            [(CONTENT_TYPE, HeaderValue::from_static(TURBO_STREAM_CONTENT_TYPE))],
            self.fragment.into_string(),
        )
            .into_response()
    }
}

/// A [`DispatchError`] rendered as `application/problem+json`.
#[derive(Debug)]
pub struct ProblemResponse(pub DispatchError);

impl From<DispatchError> for ProblemResponse {
    fn from(err: DispatchError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        tracing::error!("Dispatch failed: {}", self.0);

        let problem = ProblemDetails::from(&self.0);
        let status =
            StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(problem)).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{HttpMetadata, RouteData};
    use crate::tempdata::TempData;
    use crate::views::MiniJinjaViewEngine;
    use axum::http::{HeaderMap, Method, Uri};
    use serde_json::json;
    use std::sync::Arc;

    fn state(matched: &str) -> RequestState {
        let http = HttpMetadata::new(
            Method::POST,
            Uri::from_static("/"),
            HeaderMap::new(),
            RouteData::from_matched_path(matched, Vec::<(String, String)>::new()),
        );
        RequestState::new(http, TempData::default())
    }

    fn renderer() -> FragmentRenderer {
        let engine = MiniJinjaViewEngine::from_sources([
            ("messages/create.html", "<turbo-stream action=\"append\">{{ model }}</turbo-stream>"),
            ("shared/_Row.html", "<li>{{ model }}</li>"),
        ])
        .unwrap();
        FragmentRenderer::new(Arc::new(engine))
    }

    #[tokio::test]
    async fn response_has_fixed_content_type() {
        let mut state = state("/messages/create");
        let view = state.turbo_stream_partial_view(None, json!("hello"));
        assert_eq!(view.content_type(), TURBO_STREAM_CONTENT_TYPE);

        let response = view.execute(&renderer()).await.unwrap().into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/html; turbo-stream; charset=utf-8"
        );
    }

    #[tokio::test]
    async fn default_view_follows_action_name() {
        let mut state = state("/messages/create");
        let view = state.turbo_stream_partial_view(None, json!("hello"));
        assert_eq!(view.view_name(), None);
        assert_eq!(state.view_data.model, json!("hello"));

        let response = view.execute(&renderer()).await.unwrap();
        assert_eq!(
            response.fragment().as_str(),
            "<turbo-stream action=\"append\">hello</turbo-stream>"
        );
    }

    #[tokio::test]
    async fn named_view_and_status() {
        let mut state = state("/messages/create");
        let view = state
            .turbo_stream_partial_view(Some("_Row"), json!(7))
            .with_status(StatusCode::CREATED);

        let response = view.execute(&renderer()).await.unwrap().into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn awaiting_view_uses_captured_renderer() {
        let mut state = state("/messages/create").with_renderer(renderer());
        let response = state
            .turbo_stream_partial_view(None, json!("hi"))
            .await
            .unwrap()
            .into_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            TURBO_STREAM_CONTENT_TYPE
        );
    }

    #[tokio::test]
    async fn awaiting_view_without_renderer_fails() {
        let mut state = state("/messages/create");
        let err = state
            .turbo_stream_partial_view(None, json!("hi"))
            .await
            .unwrap_err();

        assert_eq!(err, DispatchError::InvalidArgument { name: "renderer" });
    }

    #[test]
    fn problem_response_uses_problem_json() {
        let response = ProblemResponse(DispatchError::InvalidArgument { name: "model" }).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/problem+json"
        );
    }
}
