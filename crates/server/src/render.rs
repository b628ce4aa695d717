//! Turns a rendering context into a fragment.

use std::sync::Arc;

use turbopush_shared::{DispatchError, RenderedFragment};

use crate::context::RenderingContext;
use crate::views::ViewEngine;

#[derive(Clone)]
pub struct FragmentRenderer {
    engine: Arc<dyn ViewEngine>,
}

impl FragmentRenderer {
    pub fn new(engine: Arc<dyn ViewEngine>) -> Self {
        Self { engine }
    }

    /// Locate the view for `context` and render it in full.
    ///
    /// The markup is passed through untouched.
    pub async fn render(&self, context: &RenderingContext) -> Result<RenderedFragment, DispatchError> {
        let view = self
            .engine
            .find_view(&context.route, &context.view_name)
            .ensure_found(&context.view_name)?;

        tracing::debug!("Rendering view {} as {}", context.view_name, view);
        let markup = self.engine.render(&view, context).await?;

        Ok(RenderedFragment::new(markup))
    }
}

impl std::fmt::Debug for FragmentRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentRenderer").finish_non_exhaustive()
    }
}
