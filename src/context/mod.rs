//! # Route Context Lifecycle
//!
//! One [`RouteContext`] exists per request on the server and per page load on
//! the client. It carries all render-time state (resolved data, head
//! metadata, the observable state store, action results) through a strict
//! phase machine:
//!
//! ```text
//! created → dataResolved → metaResolved → entered → rendering → serialized → terminal
//! ```
//!
//! Phase order is never reordered. The only sanctioned shortcut is the
//! first-render hydration bypass: a context rebuilt from a hydration payload
//! starts at `entered`, because the server already ran the data/meta/enter
//! hooks and shipped their results.
//!
//! # Failure semantics
//! Hook failures are *not* fatal. They are caught per-phase, recorded in
//! [`RouteContext::error`], and the machine still advances so a partial page
//! can render an error state. Only the renderer itself failing aborts the
//! response (see [`crate::framework::error::RenderError`]).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::framework::error::{LoaderError, PipelineError};
use crate::routes::RouteDef;
use crate::state::{JsonMap, StateStore};

// =============================================================================
// 1. PHASES
// =============================================================================

/// Lifecycle position of a [`RouteContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    DataResolved,
    MetaResolved,
    Entered,
    Rendering,
    Serialized,
    Terminal,
}

// =============================================================================
// 2. HOOKS
// =============================================================================

/// Which lifecycle hooks a route module provides.
///
/// Mirrored onto the context and shipped to the client, which uses the flags
/// to decide what to re-run after a navigation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookFlags {
    pub get_data: bool,
    pub get_meta: bool,
    pub on_enter: bool,
}

/// A route's loadable module: lifecycle hooks plus static route overrides.
///
/// # Architecture Note
/// The hooks have provided defaults so a module only implements what it
/// declares in [`hooks`](Self::hooks), the same provided-method pattern the
/// entity hooks in this codebase have always used. The pipeline consults the
/// flags before invoking a hook, so the defaults are never observable.
#[async_trait]
pub trait RouteModule: Send + Sync {
    /// Which hooks this module actually implements.
    fn hooks(&self) -> HookFlags {
        HookFlags::default()
    }

    /// Statically-known default data, seeded into `data` at construction.
    fn default_data(&self) -> Option<JsonMap> {
        None
    }

    /// Route fields exported by the module. At catalog-resolution time the
    /// module's `layout` wins over the declarative definition; for `path` and
    /// `name` the declarative value wins.
    fn layout(&self) -> Option<&str> {
        None
    }
    fn path(&self) -> Option<&str> {
        None
    }
    fn name(&self) -> Option<&str> {
        None
    }

    /// Capability flags exported by the module.
    fn streaming(&self) -> Option<bool> {
        None
    }
    fn client_only(&self) -> Option<bool> {
        None
    }
    fn server_only(&self) -> Option<bool> {
        None
    }

    /// Data phase: the result is merged into `context.data`.
    async fn get_data(&self, _context: &RouteContext) -> Result<JsonMap, LoaderError> {
        Ok(JsonMap::new())
    }

    /// Meta phase: the result replaces `context.head`. Runs strictly after
    /// the data phase, since head metadata often derives from data.
    async fn get_meta(&self, _context: &RouteContext) -> Result<HeadConfig, LoaderError> {
        Ok(HeadConfig::default())
    }

    /// Enter phase: the result is merged into `context.data`. Skipped on the
    /// client's first render; re-run on every later in-app navigation.
    async fn on_enter(&self, _context: &RouteContext) -> Result<JsonMap, LoaderError> {
        Ok(JsonMap::new())
    }
}

/// Optional per-project context initializer, applied once at construction.
///
/// # Architecture Note
/// The system this replaces let projects graft arbitrary properties onto a
/// shared context prototype at runtime. Here extension is composition: a
/// `state()` factory, an async `init`, and a one-shot extension map with a
/// typed accessor ([`RouteContext::extension`]) instead of dynamic property
/// definition.
#[async_trait]
pub trait ContextInitializer: Send + Sync {
    /// Factory for the initial observable state.
    fn state(&self) -> Option<JsonMap> {
        None
    }

    /// Extra fields merged into the context's extension map. The reserved
    /// `data` and `state` keys are ignored.
    fn extensions(&self) -> JsonMap {
        JsonMap::new()
    }

    /// Async initialization, run to completion before the first phase.
    async fn init(&self, _context: &mut RouteContext) -> Result<(), LoaderError> {
        Ok(())
    }
}

// =============================================================================
// 3. HEAD METADATA
// =============================================================================

/// Document head description: title plus meta tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub meta: Vec<MetaTag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaTag {
    pub name: String,
    pub content: String,
}

impl HeadConfig {
    pub fn titled(title: impl Into<String>) -> Self {
        Self { title: Some(title.into()), meta: Vec::new() }
    }

    pub fn meta(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.meta.push(MetaTag { name: name.into(), content: content.into() });
        self
    }

    /// Apply this head description to one chunk of markup.
    ///
    /// Idempotent and side-effect-free per chunk: the title swap only touches
    /// a chunk that carries a `<title>` element, and the meta block is only
    /// injected ahead of a `</head>` that does not already carry it. Chunks
    /// without head markup pass through untouched, which is what lets the
    /// shell assembler run every body chunk through the same transformation.
    pub fn transform(&self, chunk: &str) -> String {
        let mut out = chunk.to_string();

        if let Some(title) = &self.title {
            if let (Some(open), Some(close)) = (out.find("<title>"), out.find("</title>")) {
                if open < close {
                    let replacement = format!("<title>{}</title>", escape_html(title));
                    out.replace_range(open..close + "</title>".len(), &replacement);
                }
            }
        }

        if !self.meta.is_empty() {
            if let Some(at) = out.find("</head>") {
                let block: String = self
                    .meta
                    .iter()
                    .map(|tag| {
                        format!(
                            "<meta name=\"{}\" content=\"{}\">",
                            escape_html(&tag.name),
                            escape_html(&tag.content)
                        )
                    })
                    .collect();
                if !out.contains(&block) {
                    out.insert_str(at, &block);
                }
            }
        }

        out
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

// =============================================================================
// 4. THE CONTEXT
// =============================================================================

/// Per-request (server) or per-page-load (client) render state.
///
/// Exclusively owned by its request or page session. The renderer receives a
/// reference and never outlives the context; once the response finishes the
/// context reaches [`Phase::Terminal`] and must not be reused.
#[derive(Debug, Clone)]
pub struct RouteContext {
    /// Resolved route data, merged by the data and enter phases.
    pub data: JsonMap,
    /// Head metadata, assigned by the meta phase.
    pub head: HeadConfig,
    /// Observable application state reachable by descendant components.
    pub state: StateStore,
    /// Ephemeral per-navigation server-action results.
    pub action_data: JsonMap,
    /// True until the first client navigation completes.
    pub first_render: bool,
    /// First hook failure recorded during the lifecycle, if any.
    pub error: Option<LoaderError>,
    /// Layout name framing this route's content.
    pub layout: String,
    /// Hook flags mirrored from the route definition.
    pub hooks: HookFlags,
    pub streaming: bool,
    pub client_only: bool,
    pub server_only: bool,
    phase: Phase,
    extensions: JsonMap,
}

impl RouteContext {
    /// Construct a context for a server-side request, seeding `data` from the
    /// route's static default and applying the optional initializer.
    pub async fn create(
        route: &RouteDef,
        initializer: Option<&dyn ContextInitializer>,
    ) -> Result<Self, LoaderError> {
        let mut context = Self {
            data: route.default_data().unwrap_or_default(),
            head: HeadConfig::default(),
            state: StateStore::default(),
            action_data: JsonMap::new(),
            first_render: true,
            error: None,
            layout: route.layout.clone(),
            hooks: route.hooks,
            streaming: route.streaming,
            client_only: route.client_only,
            server_only: route.server_only,
            phase: Phase::Created,
            extensions: JsonMap::new(),
        };

        if let Some(initializer) = initializer {
            if let Some(state) = initializer.state() {
                context.state = StateStore::new(state);
            }
            context.merge_extensions(initializer.extensions());
            initializer.init(&mut context).await?;
        }

        debug!(path = %route.path, layout = %context.layout, "route context created");
        Ok(context)
    }

    /// Reconstruct a context from hydrated parts on the client.
    ///
    /// The lifecycle starts at [`Phase::Entered`]: the server already executed
    /// the data/meta/enter hooks and shipped their results, so the first
    /// render bypasses them entirely.
    #[allow(clippy::too_many_arguments)]
    pub fn hydrated(
        data: Option<JsonMap>,
        head: Option<HeadConfig>,
        state: JsonMap,
        action_data: JsonMap,
        layout: String,
        hooks: HookFlags,
        client_only: bool,
        initializer: Option<&dyn ContextInitializer>,
    ) -> Self {
        let mut context = Self {
            data: data.unwrap_or_default(),
            head: head.unwrap_or_default(),
            state: StateStore::new(state),
            action_data,
            first_render: true,
            error: None,
            layout,
            hooks,
            streaming: false,
            client_only,
            server_only: false,
            phase: Phase::Entered,
            extensions: JsonMap::new(),
        };
        if let Some(initializer) = initializer {
            if let Some(state) = initializer.state() {
                // Client-contributed state keys fill in around the hydrated ones.
                context.state.update(|map| {
                    for (key, value) in state {
                        map.entry(key).or_insert(value);
                    }
                });
            }
            context.merge_extensions(initializer.extensions());
        }
        context
    }

    /// Construct a context for a client-side navigation after the first
    /// render: the full phase sequence runs again from [`Phase::Created`],
    /// but `state` persists across navigations within the page session.
    pub fn for_navigation(
        layout: String,
        hooks: HookFlags,
        client_only: bool,
        state: StateStore,
    ) -> Self {
        Self {
            data: JsonMap::new(),
            head: HeadConfig::default(),
            state,
            action_data: JsonMap::new(),
            first_render: false,
            error: None,
            layout,
            hooks,
            streaming: false,
            client_only,
            server_only: false,
            phase: Phase::Created,
            extensions: JsonMap::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Typed accessor for project extension fields.
    pub fn extension(&self, key: &str) -> Option<&Value> {
        self.extensions.get(key)
    }

    fn merge_extensions(&mut self, extra: JsonMap) {
        for (key, value) in extra {
            // `data` and `state` are core fields, never extension slots.
            if key != "data" && key != "state" {
                self.extensions.insert(key, value);
            }
        }
    }

    fn expect_phase(&self, expected: Phase) -> Result<(), PipelineError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(PipelineError::Phase { expected, found: self.phase })
        }
    }

    fn record_error(&mut self, phase: &'static str, error: LoaderError) {
        warn!(%phase, %error, "lifecycle hook failed, continuing");
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle phases
    // -------------------------------------------------------------------------

    /// Data phase: run the route's `get_data` hook and merge its result.
    /// Hook failure is recorded, not returned; the phase still advances.
    pub async fn resolve_data(
        &mut self,
        module: Option<&dyn RouteModule>,
    ) -> Result<(), PipelineError> {
        self.expect_phase(Phase::Created)?;
        if self.hooks.get_data {
            if let Some(module) = module {
                match module.get_data(self).await {
                    Ok(result) => {
                        debug!(keys = result.len(), "data phase resolved");
                        self.data.extend(result);
                    }
                    Err(error) => self.record_error("getData", error),
                }
            }
        }
        self.phase = Phase::DataResolved;
        Ok(())
    }

    /// Meta phase: run `get_meta` and assign the result to `head`.
    pub async fn resolve_meta(
        &mut self,
        module: Option<&dyn RouteModule>,
    ) -> Result<(), PipelineError> {
        self.expect_phase(Phase::DataResolved)?;
        if self.hooks.get_meta {
            if let Some(module) = module {
                match module.get_meta(self).await {
                    Ok(head) => self.head = head,
                    Err(error) => self.record_error("getMeta", error),
                }
            }
        }
        self.phase = Phase::MetaResolved;
        Ok(())
    }

    /// Enter phase: run `on_enter` and merge its result into `data`.
    /// On failure, `data` is left exactly as the data phase produced it.
    pub async fn enter(&mut self, module: Option<&dyn RouteModule>) -> Result<(), PipelineError> {
        self.expect_phase(Phase::MetaResolved)?;
        if self.hooks.on_enter {
            if let Some(module) = module {
                match module.on_enter(self).await {
                    Ok(result) => self.data.extend(result),
                    Err(error) => self.record_error("onEnter", error),
                }
            }
        }
        self.phase = Phase::Entered;
        Ok(())
    }

    /// Hand the context to the renderer.
    pub fn begin_render(&mut self) -> Result<(), PipelineError> {
        self.expect_phase(Phase::Entered)?;
        self.phase = Phase::Rendering;
        Ok(())
    }

    /// Server only: mark the context serialized into the hydration payload.
    pub fn mark_serialized(&mut self) -> Result<(), PipelineError> {
        self.expect_phase(Phase::Rendering)?;
        self.phase = Phase::Serialized;
        Ok(())
    }

    /// Release the context. Any phase may terminate (responses can fail at
    /// any point); a terminal context must never be reused.
    pub fn finish(&mut self) {
        self.phase = Phase::Terminal;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::RouteSpec;
    use serde_json::json;
    use std::sync::Arc;

    struct CountedModule;

    #[async_trait]
    impl RouteModule for CountedModule {
        fn hooks(&self) -> HookFlags {
            HookFlags { get_data: true, get_meta: true, on_enter: true }
        }

        async fn get_data(&self, _context: &RouteContext) -> Result<JsonMap, LoaderError> {
            let mut map = JsonMap::new();
            map.insert("count".into(), json!(1));
            Ok(map)
        }

        async fn get_meta(&self, context: &RouteContext) -> Result<HeadConfig, LoaderError> {
            // Meta derives from data, which is why phase order matters.
            let count = context.data.get("count").cloned().unwrap_or(json!(0));
            Ok(HeadConfig::titled(format!("count {count}")))
        }

        async fn on_enter(&self, _context: &RouteContext) -> Result<JsonMap, LoaderError> {
            Err(LoaderError::hook("onEnter", "denied"))
        }
    }

    fn route() -> RouteDef {
        RouteSpec::new("/pages/count.tsx", "/count", "count")
            .with_module(Arc::new(CountedModule))
            .into_def()
    }

    #[tokio::test]
    async fn phases_run_in_order_and_meta_sees_data() {
        let route = route();
        let module = route.module();
        let mut context = RouteContext::create(&route, None).await.unwrap();
        assert_eq!(context.phase(), Phase::Created);

        context.resolve_data(module.as_deref()).await.unwrap();
        assert_eq!(context.phase(), Phase::DataResolved);
        assert_eq!(context.data.get("count"), Some(&json!(1)));

        context.resolve_meta(module.as_deref()).await.unwrap();
        assert_eq!(context.head.title.as_deref(), Some("count 1"));
    }

    #[tokio::test]
    async fn on_enter_failure_keeps_data_and_advances() {
        let route = route();
        let module = route.module();
        let mut context = RouteContext::create(&route, None).await.unwrap();
        context.resolve_data(module.as_deref()).await.unwrap();
        context.resolve_meta(module.as_deref()).await.unwrap();

        let data_before = context.data.clone();
        context.enter(module.as_deref()).await.unwrap();

        assert_eq!(context.phase(), Phase::Entered);
        assert_eq!(context.data, data_before, "failed enter must not touch data");
        assert!(matches!(context.error, Some(LoaderError::Hook { phase: "onEnter", .. })));

        // Rendering still proceeds.
        context.begin_render().unwrap();
        assert_eq!(context.phase(), Phase::Rendering);
    }

    #[tokio::test]
    async fn out_of_order_phase_is_a_protocol_error() {
        let route = route();
        let mut context = RouteContext::create(&route, None).await.unwrap();
        let err = context.enter(None).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Phase { expected: Phase::MetaResolved, found: Phase::Created }
        ));
    }

    #[tokio::test]
    async fn initializer_seeds_state_and_extensions() {
        struct Init;

        #[async_trait]
        impl ContextInitializer for Init {
            fn state(&self) -> Option<JsonMap> {
                let mut map = JsonMap::new();
                map.insert("theme".into(), json!("dark"));
                Some(map)
            }

            fn extensions(&self) -> JsonMap {
                let mut map = JsonMap::new();
                map.insert("api".into(), json!("/api/v1"));
                map.insert("data".into(), json!("must not clobber"));
                map
            }

            async fn init(&self, context: &mut RouteContext) -> Result<(), LoaderError> {
                context.data.insert("booted".into(), json!(true));
                Ok(())
            }
        }

        let route = route();
        let context = RouteContext::create(&route, Some(&Init)).await.unwrap();
        assert_eq!(context.state.get("theme"), Some(json!("dark")));
        assert_eq!(context.extension("api"), Some(&json!("/api/v1")));
        assert_eq!(context.extension("data"), None, "core keys are reserved");
        assert_eq!(context.data.get("booted"), Some(&json!(true)));
    }

    #[test]
    fn head_transform_is_idempotent() {
        let head = HeadConfig::titled("Hello & Co").meta("description", "a <test>");
        let chunk = "<html><head><title>placeholder</title></head><body>";
        let once = head.transform(chunk);
        let twice = head.transform(&once);
        assert_eq!(once, twice);
        assert!(once.contains("<title>Hello &amp; Co</title>"));
        assert!(once.contains("content=\"a &lt;test&gt;\""));
    }

    #[test]
    fn head_transform_passes_plain_chunks_through() {
        let head = HeadConfig::titled("x");
        assert_eq!(head.transform("<p>body chunk</p>"), "<p>body chunk</p>");
    }
}
