//! # Client Runtime
//!
//! The browser-side counterpart of the hydration protocol: read the embedded
//! payload, reconstruct the route context, and prime the session's resource
//! cache so the first render observes already-resolved data without issuing a
//! single network call.
//!
//! After the first in-app navigation the bypass ends: the full phase sequence
//! (data → meta → enter) runs again, but the data phase fetches the route's
//! companion endpoint (`/-/data` + path) instead of re-running the server
//! loader locally. All of it goes through the session's [`ResourceCache`],
//! keyed by `(path, phase)`, so unrelated navigations never collide, and a
//! second visit to the same path starts a fresh fetch (the first visit's
//! entry was evicted by its single read).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::context::{ContextInitializer, HeadConfig, HookFlags, RouteContext, RouteModule};
use crate::framework::error::{LoaderError, PipelineError, ResourceError};
use crate::framework::hydration::HydrationPayload;
use crate::framework::resource::{acquire_settled, ResourceCache, ResourceKey};
use crate::routes::{data_path, RouteProjection};
use crate::state::JsonMap;

/// Fixed prefix of server-action endpoints.
pub const ACTION_ENDPOINT_PREFIX: &str = "/-/action";

/// Endpoint path for a named server action.
pub fn action_path(name: &str) -> String {
    format!("{ACTION_ENDPOINT_PREFIX}/{name}")
}

/// The client's network seam. The real implementation wraps the platform
/// fetch; tests use [`MockFetcher`](crate::framework::mock::MockFetcher).
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_json(&self, path: &str) -> Result<Value, ResourceError>;
}

// =============================================================================
// 1. THE SESSION
// =============================================================================

/// One page session: the hydrated context plus the caches that persist across
/// navigations until the page itself is torn down.
pub struct ClientSession {
    cache: ResourceCache,
    fetcher: Arc<dyn Fetcher>,
    routes: Vec<RouteProjection>,
    context: RouteContext,
}

/// Reconstruct a session from a server-rendered document's payload.
///
/// The client context initializer's contribution is merged before the first
/// render; the rebuilt context has `first_render == true` and starts past the
/// data/meta/enter phases, since the server already ran them.
pub fn hydrate(
    payload: HydrationPayload,
    initializer: Option<&dyn ContextInitializer>,
    fetcher: Arc<dyn Fetcher>,
) -> ClientSession {
    let routes = payload.routes;
    let context = payload.context.into_context(initializer);
    info!(routes = routes.len(), layout = %context.layout, "client session hydrated");
    ClientSession { cache: ResourceCache::new(), fetcher, routes, context }
}

impl ClientSession {
    pub fn context(&self) -> &RouteContext {
        &self.context
    }

    pub fn routes(&self) -> &[RouteProjection] {
        &self.routes
    }

    /// Navigate within the session. Ends the first-render bypass: this and
    /// every later navigation runs data → meta → enter in full, with the data
    /// phase hitting the route's data endpoint through the cache.
    ///
    /// `module` is the navigated route's loaded module (for its meta/enter
    /// hooks); `None` for routes without one.
    pub async fn navigate(
        &mut self,
        path: &str,
        module: Option<Arc<dyn RouteModule>>,
    ) -> Result<&RouteContext, PipelineError> {
        let route = self
            .routes
            .iter()
            .find(|route| route.path == path)
            .ok_or_else(|| PipelineError::RouteNotFound(path.to_string()))?
            .clone();

        // The catalog projection does not carry hook flags; they come from
        // the loaded module, and a route without one has no hooks to run.
        let hooks = module.as_deref().map(RouteModule::hooks).unwrap_or_default();
        let loader = NavigationLoader {
            path: path.to_string(),
            cache: self.cache.clone(),
            fetcher: Arc::clone(&self.fetcher),
            module,
            hooks,
        };

        debug!(%path, "navigating");
        let mut next = RouteContext::for_navigation(
            route.layout.clone(),
            loader.hooks,
            route.client_only,
            self.context.state.clone(),
        );
        next.resolve_data(Some(&loader)).await?;
        next.resolve_meta(Some(&loader)).await?;
        next.enter(Some(&loader)).await?;

        self.context.finish();
        self.context = next;
        Ok(&self.context)
    }

    /// Fetch a named server action's result through the cache, memoized in
    /// `action_data` for the duration of the current navigation.
    pub async fn server_action(&mut self, name: &str) -> Result<Value, ResourceError> {
        let path = action_path(name);
        if let Some(cached) = self.context.action_data.get(&path) {
            return Ok(cached.clone());
        }
        let fetcher = Arc::clone(&self.fetcher);
        let value = acquire_settled(&self.cache, ResourceKey::raw(path.clone()), move || {
            let fetcher = Arc::clone(&fetcher);
            let path = path.clone();
            async move { fetcher.fetch_json(&path).await }
        })
        .await?;
        self.context.action_data.insert(action_path(name), value.clone());
        Ok(value)
    }
}

// =============================================================================
// 2. NAVIGATION PHASES
// =============================================================================

/// Drives the post-navigation phases through the session cache.
///
/// Implements [`RouteModule`] so the context's own phase machine runs the
/// show. The difference from the server is only *where* the results come
/// from: the data endpoint for `get_data`, the loaded module's hooks (behind
/// `(path, phase)` cache keys) for `get_meta`/`on_enter`.
struct NavigationLoader {
    path: String,
    cache: ResourceCache,
    fetcher: Arc<dyn Fetcher>,
    module: Option<Arc<dyn RouteModule>>,
    hooks: HookFlags,
}

#[async_trait]
impl RouteModule for NavigationLoader {
    fn hooks(&self) -> HookFlags {
        self.hooks
    }

    async fn get_data(&self, _context: &RouteContext) -> Result<JsonMap, LoaderError> {
        let endpoint = data_path(&self.path);
        let fetcher = Arc::clone(&self.fetcher);
        let value = acquire_settled(
            &self.cache,
            ResourceKey::scoped(&self.path, "getData"),
            move || {
                let fetcher = Arc::clone(&fetcher);
                let endpoint = endpoint.clone();
                async move { fetcher.fetch_json(&endpoint).await }
            },
        )
        .await
        .map_err(LoaderError::Resource)?;
        as_object(value, "getData")
    }

    async fn get_meta(&self, context: &RouteContext) -> Result<HeadConfig, LoaderError> {
        let Some(module) = self.module.clone() else {
            return Ok(HeadConfig::default());
        };
        let snapshot = context.clone();
        let value = acquire_settled(
            &self.cache,
            ResourceKey::scoped(&self.path, "updateMeta"),
            move || {
                let module = Arc::clone(&module);
                let snapshot = snapshot.clone();
                async move {
                    let head = module
                        .get_meta(&snapshot)
                        .await
                        .map_err(|e| ResourceError::Producer(e.to_string()))?;
                    serde_json::to_value(head)
                        .map_err(|e| ResourceError::Decode(e.to_string()))
                }
            },
        )
        .await
        .map_err(LoaderError::Resource)?;
        serde_json::from_value(value)
            .map_err(|e| LoaderError::Resource(ResourceError::Decode(e.to_string())))
    }

    async fn on_enter(&self, context: &RouteContext) -> Result<JsonMap, LoaderError> {
        let Some(module) = self.module.clone() else {
            return Ok(JsonMap::new());
        };
        let snapshot = context.clone();
        let value = acquire_settled(
            &self.cache,
            ResourceKey::scoped(&self.path, "onEnter"),
            move || {
                let module = Arc::clone(&module);
                let snapshot = snapshot.clone();
                async move {
                    let data = module
                        .on_enter(&snapshot)
                        .await
                        .map_err(|e| ResourceError::Producer(e.to_string()))?;
                    Ok(Value::Object(data))
                }
            },
        )
        .await
        .map_err(LoaderError::Resource)?;
        as_object(value, "onEnter")
    }
}

fn as_object(value: Value, phase: &'static str) -> Result<JsonMap, LoaderError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(LoaderError::hook(
            phase,
            format!("expected a JSON object, got {other}"),
        )),
    }
}
