//! Render-then-deliver coordination.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use turbopush_shared::{Destination, DispatchError, RenderedFragment};

use crate::context::{ConnectionContext, FragmentRequest, Origin, RenderingContext, RequestState};
use crate::render::FragmentRenderer;
use crate::tempdata::TempDataProvider;
use crate::views::ViewEngine;

/// Something that can hand a fragment to the clients behind a destination.
#[async_trait]
pub trait PushConnection: Send + Sync {
    /// Resolves once the transport has accepted the fragment, not when a
    /// client has consumed it.
    async fn deliver(
        &self,
        destination: &Destination,
        fragment: &RenderedFragment,
    ) -> Result<(), DispatchError>;
}

/// Rendering dependencies, built once at startup and never mutated.
#[derive(Clone)]
pub struct RenderingServices {
    pub view_engine: Arc<dyn ViewEngine>,
    pub temp_data: Arc<dyn TempDataProvider>,
}

impl RenderingServices {
    pub fn new(view_engine: Arc<dyn ViewEngine>, temp_data: Arc<dyn TempDataProvider>) -> Self {
        Self {
            view_engine,
            temp_data,
        }
    }
}

pub struct Dispatcher {
    services: RenderingServices,
    renderer: FragmentRenderer,
    push: Arc<dyn PushConnection>,
}

impl Dispatcher {
    pub fn new(services: RenderingServices, push: Arc<dyn PushConnection>) -> Self {
        let renderer = FragmentRenderer::new(services.view_engine.clone());
        Self {
            services,
            renderer,
            push,
        }
    }

    pub fn services(&self) -> &RenderingServices {
        &self.services
    }

    /// Render `request` and deliver the result to `destination`.
    ///
    /// The first failure is returned as-is; nothing is retried and nothing is
    /// delivered if rendering fails.
    pub async fn dispatch(
        &self,
        request: FragmentRequest<'_>,
        destination: Destination,
    ) -> Result<(), DispatchError> {
        destination.validate()?;

        let context = match request.origin {
            Origin::Request(state) => {
                RenderingContext::from_request(state, request.view_name, request.model)?
            }
            Origin::Connection(connection) => {
                let view_name = request
                    .view_name
                    .ok_or(DispatchError::InvalidArgument { name: "view_name" })?;
                RenderingContext::from_connection(
                    connection,
                    view_name,
                    request.model,
                    self.services.temp_data.as_ref(),
                )?
            }
        };

        let fragment = self.renderer.render(&context).await?;

        tracing::debug!(
            "Delivering view {} ({} bytes) to {}",
            context.view_name,
            fragment.as_str().len(),
            destination
        );
        self.push.deliver(&destination, &fragment).await
    }

    /// Dispatch from an HTTP handler. `None` renders the view named after the
    /// current action.
    pub async fn send_partial_view_from_request<M: Serialize>(
        &self,
        state: &RequestState,
        destination: Destination,
        view_name: Option<&str>,
        model: M,
    ) -> Result<(), DispatchError> {
        let model = to_model(model)?;
        self.dispatch(FragmentRequest::from_request(state, view_name, model), destination)
            .await
    }

    /// Dispatch from a hub method. A view name is always required here.
    pub async fn send_partial_view_from_connection<M: Serialize>(
        &self,
        connection: &ConnectionContext,
        destination: Destination,
        view_name: &str,
        model: M,
    ) -> Result<(), DispatchError> {
        let model = to_model(model)?;
        self.dispatch(
            FragmentRequest::from_connection(connection, view_name, model),
            destination,
        )
        .await
    }
}

fn to_model<M: Serialize>(model: M) -> Result<Value, DispatchError> {
    serde_json::to_value(model).map_err(|_| DispatchError::InvalidArgument { name: "model" })
}
