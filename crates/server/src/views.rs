//! View lookup and the template engine seam.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use minijinja::{Environment, ErrorKind};
use serde::Serialize;
use turbopush_shared::DispatchError;

use crate::context::{RenderingContext, RouteData};

const VIEW_EXTENSION: &str = ".html";
const SHARED_LOCATION: &str = "shared";

/// Outcome of resolving a view name against the view locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewLookup {
    Found(String),
    NotFound { searched: Vec<String> },
}

impl ViewLookup {
    pub fn ensure_found(self, name: &str) -> Result<String, DispatchError> {
        match self {
            ViewLookup::Found(path) => Ok(path),
            ViewLookup::NotFound { searched } => Err(DispatchError::ViewNotFound {
                name: name.to_string(),
                searched,
            }),
        }
    }
}

/// Candidate paths for `name`, most specific first.
///
/// A name that already looks like a path (contains `/` or ends in `.html`)
/// is used as-is; otherwise the controller folder is tried before `shared`.
pub fn view_locations(route: &RouteData, name: &str) -> Vec<String> {
    if name.contains('/') || name.ends_with(VIEW_EXTENSION) {
        let path = name.trim_start_matches('/');
        if path.ends_with(VIEW_EXTENSION) {
            return vec![path.to_string()];
        }
        return vec![format!("{path}{VIEW_EXTENSION}")];
    }

    let mut locations = Vec::with_capacity(2);
    if let Some(controller) = route.controller() {
        locations.push(format!("{controller}/{name}{VIEW_EXTENSION}"));
    }
    locations.push(format!("{SHARED_LOCATION}/{name}{VIEW_EXTENSION}"));
    locations
}

/// The template engine used to render fragments.
#[async_trait]
pub trait ViewEngine: Send + Sync {
    /// Resolve `name` to a view, scoped to the current route.
    fn find_view(&self, route: &RouteData, name: &str) -> ViewLookup;

    /// Render a previously found view. Output is returned in full.
    async fn render(&self, view: &str, context: &RenderingContext) -> Result<String, DispatchError>;
}

/// Values exposed to templates.
#[derive(Serialize)]
struct TemplateContext<'a> {
    model: &'a serde_json::Value,
    view_data: &'a std::collections::BTreeMap<String, serde_json::Value>,
    temp_data: &'a crate::tempdata::TempData,
    route: &'a RouteData,
}

impl<'a> From<&'a RenderingContext> for TemplateContext<'a> {
    fn from(context: &'a RenderingContext) -> Self {
        Self {
            model: &context.view_data.model,
            view_data: &context.view_data.entries,
            temp_data: &context.temp_data,
            route: &context.route,
        }
    }
}

/// [`ViewEngine`] backed by minijinja.
#[derive(Clone)]
pub struct MiniJinjaViewEngine {
    env: Arc<Environment<'static>>,
}

impl MiniJinjaViewEngine {
    /// Load views lazily from files under `root`.
    pub fn from_dir(root: impl AsRef<Path>) -> Self {
        let mut env = Environment::new();
        env.set_loader(minijinja::path_loader(root));
        Self { env: Arc::new(env) }
    }

    /// Build from in-memory `(path, source)` pairs.
    pub fn from_sources<I, N, S>(sources: I) -> Result<Self, minijinja::Error>
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: Into<String>,
    {
        let mut env = Environment::new();
        for (name, source) in sources {
            env.add_template_owned(name.into(), source.into())?;
        }
        Ok(Self { env: Arc::new(env) })
    }
}

#[async_trait]
impl ViewEngine for MiniJinjaViewEngine {
    fn find_view(&self, route: &RouteData, name: &str) -> ViewLookup {
        let searched = view_locations(route, name);
        for location in &searched {
            match self.env.get_template(location) {
                Ok(_) => return ViewLookup::Found(location.clone()),
                Err(e) if e.kind() == ErrorKind::TemplateNotFound => continue,
                // The view exists but does not compile; let render report it.
                Err(_) => return ViewLookup::Found(location.clone()),
            }
        }
        ViewLookup::NotFound { searched }
    }

    async fn render(&self, view: &str, context: &RenderingContext) -> Result<String, DispatchError> {
        let render_error = |message: String| DispatchError::RenderError {
            name: context.view_name.clone(),
            message,
        };

        let values = serde_json::to_value(TemplateContext::from(context))
            .map_err(|e| render_error(e.to_string()))?;
        let env = self.env.clone();
        let path = view.to_string();

        tokio::task::spawn_blocking(move || -> Result<String, minijinja::Error> {
            env.get_template(&path)?.render(values)
        })
        .await
        .map_err(|e| render_error(e.to_string()))?
        .map_err(|e| render_error(e.to_string()))
    }
}
