//! # Route Catalog Resolver
//!
//! Builds the ordered, deduplicated list of [`RouteDef`]s the pipeline serves,
//! either from explicit declarative [`RouteSpec`]s or by deriving `path` and
//! `name` from discovered module identifiers (`/pages/users/[id].tsx` style).
//!
//! Merge precedence when a declarative definition and a module export overlap:
//! the declarative field wins, **except** `layout`, where the module's value
//! wins when present. Capability flags and lifecycle hooks always come from
//! the resolved module unless the definition pins them.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::context::{HookFlags, RouteModule};
use crate::state::JsonMap;

/// Root prefix stripped from module identifiers during derivation.
const PAGES_PREFIX: &str = "/pages";

/// Reserved name for the route whose derived name collapses to nothing.
const CATCH_ALL_NAME: &str = "catch-all";

/// Fixed prefix of the companion data-refresh endpoint.
pub const DATA_ENDPOINT_PREFIX: &str = "/-/data";

/// Path of the data-refresh endpoint for a route path.
///
/// The client's post-navigation data phase fetches this instead of re-running
/// `get_data` locally.
pub fn data_path(route_path: &str) -> String {
    format!("{DATA_ENDPOINT_PREFIX}{route_path}")
}

// =============================================================================
// 1. DECLARATIVE DEFINITIONS
// =============================================================================

/// A declarative route definition, before module resolution.
#[derive(Clone, Default)]
pub struct RouteSpec {
    pub id: String,
    pub path: String,
    pub name: String,
    pub layout: Option<String>,
    pub streaming: Option<bool>,
    pub client_only: Option<bool>,
    pub server_only: Option<bool>,
    pub module: Option<Arc<dyn RouteModule>>,
}

impl RouteSpec {
    pub fn new(id: impl Into<String>, path: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), path: path.into(), name: name.into(), ..Self::default() }
    }

    pub fn with_layout(mut self, layout: impl Into<String>) -> Self {
        self.layout = Some(layout.into());
        self
    }

    pub fn with_module(mut self, module: Arc<dyn RouteModule>) -> Self {
        self.module = Some(module);
        self
    }

    pub fn streaming(mut self, value: bool) -> Self {
        self.streaming = Some(value);
        self
    }

    pub fn client_only(mut self, value: bool) -> Self {
        self.client_only = Some(value);
        self
    }

    pub fn server_only(mut self, value: bool) -> Self {
        self.server_only = Some(value);
        self
    }

    /// Resolve this definition against its module's exports.
    pub fn into_def(self) -> RouteDef {
        let module = self.module;
        let exports = module.as_deref();

        // Module layout wins; everything else prefers the declarative field.
        let layout = exports
            .and_then(|m| m.layout().map(str::to_owned))
            .or(self.layout)
            .unwrap_or_else(|| "default".to_string());
        let path = if self.path.is_empty() {
            exports.and_then(|m| m.path().map(str::to_owned)).unwrap_or_default()
        } else {
            self.path
        };
        let name = if self.name.is_empty() {
            exports.and_then(|m| m.name().map(str::to_owned)).unwrap_or_default()
        } else {
            self.name
        };

        RouteDef {
            id: self.id,
            path,
            name,
            layout,
            hooks: exports.map(RouteModule::hooks).unwrap_or_default(),
            streaming: self
                .streaming
                .or_else(|| exports.and_then(RouteModule::streaming))
                .unwrap_or(false),
            client_only: self
                .client_only
                .or_else(|| exports.and_then(RouteModule::client_only))
                .unwrap_or(false),
            server_only: self
                .server_only
                .or_else(|| exports.and_then(RouteModule::server_only))
                .unwrap_or(false),
            module,
        }
    }
}

// =============================================================================
// 2. RESOLVED ROUTES
// =============================================================================

/// A fully-resolved route. Immutable after catalog construction.
#[derive(Clone)]
pub struct RouteDef {
    pub id: String,
    pub path: String,
    pub name: String,
    pub layout: String,
    pub hooks: HookFlags,
    pub streaming: bool,
    pub client_only: bool,
    pub server_only: bool,
    module: Option<Arc<dyn RouteModule>>,
}

impl RouteDef {
    /// The route's loadable module, if one resolved.
    pub fn module(&self) -> Option<Arc<dyn RouteModule>> {
        self.module.clone()
    }

    /// Statically-known default data exported by the module.
    pub fn default_data(&self) -> Option<JsonMap> {
        self.module.as_deref().and_then(RouteModule::default_data)
    }

    /// Serializable projection shipped to the client. Loader functions and
    /// hook closures are deliberately absent.
    pub fn projection(&self) -> RouteProjection {
        RouteProjection {
            id: self.id.clone(),
            path: self.path.clone(),
            name: self.name.clone(),
            layout: self.layout.clone(),
            client_only: self.client_only,
            server_only: self.server_only,
        }
    }
}

impl std::fmt::Debug for RouteDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteDef")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("name", &self.name)
            .field("layout", &self.layout)
            .field("streaming", &self.streaming)
            .field("client_only", &self.client_only)
            .field("server_only", &self.server_only)
            .finish()
    }
}

/// The catalog entry shape the hydration payload carries for each route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteProjection {
    pub id: String,
    pub path: String,
    pub name: String,
    pub layout: String,
    pub client_only: bool,
    pub server_only: bool,
}

// =============================================================================
// 3. THE CATALOG
// =============================================================================

/// Ordered, path-deduplicated collection of resolved routes.
#[derive(Clone, Default)]
pub struct RouteCatalog {
    routes: Vec<Arc<RouteDef>>,
}

impl RouteCatalog {
    /// Build from declarative definitions, in declaration order.
    pub fn from_specs(specs: Vec<RouteSpec>) -> Self {
        Self::collect(specs.into_iter().map(RouteSpec::into_def))
    }

    /// Build from discovered module identifiers, deriving `path` and `name`.
    ///
    /// Identifiers are visited in descending lexicographic order, which keeps
    /// literal segments ahead of parameterized ones when paths collide.
    pub fn from_modules(mut modules: Vec<(String, Arc<dyn RouteModule>)>) -> Self {
        modules.sort_by(|(a, _), (b, _)| b.cmp(a));
        Self::collect(modules.into_iter().map(|(id, module)| {
            let derived_path = derive_path(&id);
            let derived_name = derive_name(&id);
            let path =
                module.path().map(str::to_owned).unwrap_or(derived_path);
            let name = module.name().map(str::to_owned).unwrap_or(derived_name);
            RouteSpec { id, path, name, module: Some(module), ..RouteSpec::default() }.into_def()
        }))
    }

    fn collect(defs: impl Iterator<Item = RouteDef>) -> Self {
        let mut seen = HashSet::new();
        let mut routes = Vec::new();
        for def in defs {
            if !seen.insert(def.path.clone()) {
                debug!(path = %def.path, id = %def.id, "dropping duplicate route path");
                continue;
            }
            info!(path = %def.path, id = %def.id, name = %def.name, "route registered");
            routes.push(Arc::new(def));
        }
        Self { routes }
    }

    /// Exact-path lookup.
    pub fn resolve(&self, path: &str) -> Option<&Arc<RouteDef>> {
        self.routes.iter().find(|route| route.path == path)
    }

    pub fn routes(&self) -> &[Arc<RouteDef>] {
        &self.routes
    }

    /// The ordered projection list embedded in the hydration payload.
    pub fn projections(&self) -> Vec<RouteProjection> {
        self.routes.iter().map(|route| route.projection()).collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

// =============================================================================
// 4. PATH / NAME DERIVATION
// =============================================================================

fn param_regex() -> &'static Regex {
    static PARAM: OnceLock<Regex> = OnceLock::new();
    PARAM.get_or_init(|| Regex::new(r"\[([.\w]+\+?)\]").expect("static regex"))
}

fn wildcard_regex() -> &'static Regex {
    static WILDCARD: OnceLock<Regex> = OnceLock::new();
    WILDCARD.get_or_init(|| Regex::new(r":[.\w]+\+").expect("static regex"))
}

/// Strip the pages prefix and the file extension from a module identifier.
fn base_of(id: &str) -> &str {
    let base = id.strip_prefix(PAGES_PREFIX).unwrap_or(id);
    match base.rfind('.') {
        Some(dot) if dot > base.rfind('/').unwrap_or(0) => &base[..dot],
        _ => base,
    }
}

/// `path` derivation: bracket segments become parameters, a trailing `+`
/// parameter becomes a wildcard, an `index` leaf collapses to the parent.
fn derive_path(id: &str) -> String {
    let base = base_of(id);
    let path = param_regex().replace_all(base, ":$1");
    let path = wildcard_regex().replace(&path, "*");
    let path = if let Some(parent) = path.strip_suffix("/index") {
        format!("{parent}/")
    } else {
        path.into_owned()
    };
    if path.len() > 1 {
        path.trim_end_matches('/').to_string()
    } else {
        path
    }
}

/// `name` derivation: bracket segments removed, separators joined with `_`,
/// the empty name mapped to the reserved catch-all name.
fn derive_name(id: &str) -> String {
    let base = base_of(id);
    let name = param_regex().replace_all(base, "");
    let name = name.trim_matches('/').replace('/', "_");
    if name.is_empty() {
        CATCH_ALL_NAME.to_string()
    } else {
        name
    }
}
