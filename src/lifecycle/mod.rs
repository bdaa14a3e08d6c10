//! # Request Pipeline
//!
//! Ties the subsystems together for one server-rendered response:
//!
//! ```text
//! resolve route → create context → data → meta → enter
//!   → render (all-ready | shell-ready) → serialize hydration payload
//!   → assemble shell → stream the document
//! ```
//!
//! Every request gets its own [`RouteContext`] and its own [`ResourceCache`];
//! nothing here is shared across requests except the immutable catalog and
//! the pre-split shell templates.
//!
//! Hook failures recorded on the context do not abort the response: the page
//! renders its error state at status 200. Only renderer failures and protocol
//! errors produce an error response, and those go through
//! [`RenderPipeline::error_response`], which is deliberately opaque outside
//! development mode.

pub mod tracing;

use std::error::Error as _;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;
// `::` avoids ambiguity with the `tracing` submodule below.
use ::tracing::{info, info_span, Instrument};

use crate::context::{ContextInitializer, RouteContext};
use crate::framework::error::{PipelineError, RenderError};
use crate::framework::hydration::{ContextProjection, HydrationPayload};
use crate::framework::render::{all_ready, shell_ready, BodyStream, Renderer};
use crate::framework::resource::ResourceCache;
use crate::framework::shell::{assemble, ShellTemplates};
use crate::routes::RouteCatalog;
use crate::state::JsonMap;

/// One response, ready for the Host to flush.
pub struct RenderedResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: BoxStream<'static, Result<Bytes, RenderError>>,
}

impl std::fmt::Debug for RenderedResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderedResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// The server-side entry point: immutable per-process wiring, driven once per
/// request.
pub struct RenderPipeline {
    templates: ShellTemplates,
    catalog: RouteCatalog,
    dev: bool,
}

impl RenderPipeline {
    pub fn new(templates: ShellTemplates, catalog: RouteCatalog) -> Self {
        Self { templates, catalog, dev: false }
    }

    /// Development mode: error responses carry the full failure chain instead
    /// of an opaque status page.
    pub fn development(mut self) -> Self {
        self.dev = true;
        self
    }

    pub fn catalog(&self) -> &RouteCatalog {
        &self.catalog
    }

    /// Serve one page request.
    ///
    /// `renderer` is the rendering engine for this request's component tree;
    /// `initializer` the optional per-project context initializer.
    pub async fn handle(
        &self,
        path: &str,
        renderer: Box<dyn Renderer>,
        initializer: Option<&dyn ContextInitializer>,
    ) -> Result<RenderedResponse, PipelineError> {
        let span = info_span!("request", %path);
        self.respond(path, renderer, initializer).instrument(span).await
    }

    async fn respond(
        &self,
        path: &str,
        mut renderer: Box<dyn Renderer>,
        initializer: Option<&dyn ContextInitializer>,
    ) -> Result<RenderedResponse, PipelineError> {
        let route = self
            .catalog
            .resolve(path)
            .ok_or_else(|| PipelineError::RouteNotFound(path.to_string()))?;
        let module = route.module();

        let mut context = RouteContext::create(route, initializer).await?;
        context.resolve_data(module.as_deref()).await?;
        context.resolve_meta(module.as_deref()).await?;
        context.enter(module.as_deref()).await?;
        context.begin_render()?;

        let cache = ResourceCache::new();
        let body: BodyStream = if context.streaming && !context.server_only {
            shell_ready(renderer, context.clone(), cache.clone()).await?
        } else {
            let chunk = all_ready(renderer.as_mut(), &context, &cache).await?;
            let (tx, rx) = mpsc::channel(1);
            let _ = tx.send(Ok(chunk)).await;
            rx
        };

        context.mark_serialized()?;
        let hydration = if context.server_only {
            // Server-only documents never activate on the client, so no
            // payload ships with them.
            String::new()
        } else {
            HydrationPayload {
                context: ContextProjection::from_context(&context),
                routes: self.catalog.projections(),
            }
            .to_script()?
        };

        let pair = self.templates.select(context.server_only).clone();
        let head = context.head.clone();
        info!(
            streaming = context.streaming,
            degraded = context.error.is_some(),
            pending_resources = cache.len(),
            "response assembled"
        );
        context.finish();

        Ok(RenderedResponse {
            status: 200,
            content_type: "text/html",
            body: assemble(pair, head, hydration, Some(body)).boxed(),
        })
    }

    /// Serve one data-refresh request (`/-/data` + route path): run the
    /// route's data phase on a fresh context and answer with the resolved map.
    pub async fn data(
        &self,
        route_path: &str,
        initializer: Option<&dyn ContextInitializer>,
    ) -> Result<JsonMap, PipelineError> {
        let route = self
            .catalog
            .resolve(route_path)
            .ok_or_else(|| PipelineError::RouteNotFound(route_path.to_string()))?;
        let module = route.module();

        let mut context = RouteContext::create(route, initializer).await?;
        context.resolve_data(module.as_deref()).await?;
        let outcome = match context.error.take() {
            // Unlike the page path there is nothing to degrade into here:
            // the caller asked for the data and the data failed.
            Some(error) => Err(PipelineError::Loader(error)),
            None => Ok(std::mem::take(&mut context.data)),
        };
        context.finish();
        outcome
    }

    /// Turn a pipeline failure into a response the Host can flush.
    ///
    /// Development mode renders the full error chain; production answers with
    /// an opaque status page so internals never leak.
    pub fn error_response(&self, error: &PipelineError) -> RenderedResponse {
        let status = match error {
            PipelineError::RouteNotFound(_) => 404,
            _ => 500,
        };
        let body = if self.dev {
            let mut chain = format!("<h1>{status}</h1><pre>{}", escape(&error.to_string()));
            let mut source = error.source();
            while let Some(cause) = source {
                chain.push_str(&format!("\ncaused by: {}", escape(&cause.to_string())));
                source = cause.source();
            }
            chain.push_str("</pre>");
            chain
        } else if status == 404 {
            "<h1>Not Found</h1>".to_string()
        } else {
            "<h1>Internal Server Error</h1>".to_string()
        };

        RenderedResponse {
            status,
            content_type: "text/html",
            body: stream::once(async move { Ok(Bytes::from(body)) }).boxed(),
        }
    }
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{HeadConfig, HookFlags, RouteModule};
    use crate::framework::error::LoaderError;
    use crate::framework::mock::MockRenderer;
    use crate::framework::resource::ResourceKey;
    use crate::framework::shell::collect_document;
    use crate::routes::RouteSpec;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    const TEMPLATE: &str = concat!(
        "<html><head><title>app</title></head><body>",
        "<!-- hydration -->",
        "<div id=\"root\"><!-- element --></div>",
        "<script type=\"module\" src=\"/mount.js\"></script>",
        "</body></html>",
    );

    struct CountModule;

    #[async_trait]
    impl RouteModule for CountModule {
        fn hooks(&self) -> HookFlags {
            HookFlags { get_data: true, get_meta: true, on_enter: false }
        }
        async fn get_data(&self, _context: &RouteContext) -> Result<JsonMap, LoaderError> {
            let mut map = JsonMap::new();
            map.insert("count".into(), json!(1));
            Ok(map)
        }
        async fn get_meta(&self, context: &RouteContext) -> Result<HeadConfig, LoaderError> {
            let count = context.data.get("count").cloned().unwrap_or(json!(0));
            Ok(HeadConfig::titled(format!("Count {count}")))
        }
    }

    fn pipeline(specs: Vec<RouteSpec>) -> RenderPipeline {
        RenderPipeline::new(
            ShellTemplates::split(TEMPLATE).unwrap(),
            RouteCatalog::from_specs(specs),
        )
    }

    #[tokio::test]
    async fn buffered_request_renders_the_full_document() {
        let pipeline = pipeline(vec![RouteSpec::new("/pages/count.tsx", "/count", "count")
            .with_module(Arc::new(CountModule))]);
        let renderer = MockRenderer::new().markup("<p>counted</p>");

        let response = pipeline.handle("/count", Box::new(renderer), None).await.unwrap();
        assert_eq!(response.status, 200);
        let document = collect_document(response.body).await.unwrap();

        assert!(document.contains("<title>Count 1</title>"));
        assert!(document.contains("<p>counted</p>"));
        // The payload carries the resolved data for hydration.
        let payload = HydrationPayload::from_document(&document).unwrap();
        assert_eq!(payload.context.data.unwrap().get("count"), Some(&json!(1)));
        assert_eq!(payload.routes.len(), 1);
    }

    #[tokio::test]
    async fn server_only_routes_ship_without_payload_or_activation() {
        let pipeline = pipeline(vec![RouteSpec::new("/pages/report.tsx", "/report", "report")
            .server_only(true)]);
        let renderer = MockRenderer::new().markup("<p>static</p>");

        let response = pipeline.handle("/report", Box::new(renderer), None).await.unwrap();
        let document = collect_document(response.body).await.unwrap();
        assert!(!document.contains("window.route"));
        assert!(!document.contains("type=\"module\""));
        assert!(document.contains("<p>static</p>"));
    }

    #[tokio::test]
    async fn streaming_route_flushes_shell_before_resources_settle() {
        let pipeline = pipeline(vec![RouteSpec::new("/pages/feed.tsx", "/feed", "feed")
            .streaming(true)]);
        let renderer = MockRenderer::new().markup("<div id=\"shell\">").boundary(
            ResourceKey::scoped("/feed", "items"),
            json!(["a", "b"]),
            std::time::Duration::from_millis(20),
            "<p>loading</p>",
            "<ul>{}</ul>",
        );

        let response = pipeline.handle("/feed", Box::new(renderer), None).await.unwrap();
        let document = collect_document(response.body).await.unwrap();

        let placeholder_at = document.find("<p>loading</p>").unwrap();
        let resolved_at = document.find("<ul>[\"a\",\"b\"]</ul>").unwrap();
        assert!(placeholder_at < resolved_at, "shell precedes streamed content");
    }

    #[tokio::test]
    async fn data_endpoint_runs_only_the_data_phase() {
        let pipeline = pipeline(vec![RouteSpec::new("/pages/count.tsx", "/count", "count")
            .with_module(Arc::new(CountModule))]);
        let data = pipeline.data("/count", None).await.unwrap();
        assert_eq!(data.get("count"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn unknown_paths_map_to_not_found() {
        let pipeline = pipeline(vec![]);
        let err = pipeline
            .handle("/nope", Box::new(MockRenderer::new()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::RouteNotFound(_)));
        assert_eq!(pipeline.error_response(&err).status, 404);
    }

    #[tokio::test]
    async fn production_error_pages_are_opaque() {
        let prod = pipeline(vec![]);
        let dev = pipeline(vec![]).development();
        let err = PipelineError::Render(RenderError::Render("secret detail".into()));

        let opaque = collect_document(prod.error_response(&err).body).await.unwrap();
        assert!(!opaque.contains("secret detail"));

        let verbose = collect_document(dev.error_response(&err).body).await.unwrap();
        assert!(verbose.contains("secret detail"));
    }
}
