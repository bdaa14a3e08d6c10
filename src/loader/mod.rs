//! # Module Loader Interface
//!
//! The bundler integration seam: the build tool asks the pipeline to resolve
//! a small fixed set of *logical* module names (the mount entry, the resource
//! cache, the route catalog, layouts, the context initializer) to source
//! text. A project may override any of them; modules that are split by
//! server/client target resolve to a placeholder (same export names, empty
//! values) on the target where the real module must not be bundled.
//!
//! The bundler itself is an external collaborator; this module only defines
//! the contract and a table-backed implementation of it.

use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

/// Logical module names the loader must resolve.
pub const LOGICAL_MODULES: [&str; 5] = ["mount", "resource", "routes", "layouts", "context"];

/// Which bundle a resolution is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleTarget {
    Server,
    Client,
}

/// What a logical module name resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleSource {
    /// Source text bundled with the pipeline.
    Bundled(String),
    /// A project-specific override file.
    ProjectOverride(PathBuf),
    /// Generated placeholder exports for the excluded target.
    Placeholder { exports: Vec<String> },
}

impl ModuleSource {
    /// Render a placeholder module: the same export names, empty values.
    pub fn placeholder_text(exports: &[String]) -> String {
        let mut out = String::new();
        for name in exports {
            if name == "default" {
                out.push_str("export default undefined\n");
            } else {
                out.push_str(&format!("export const {name} = undefined\n"));
            }
        }
        out
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ModuleError {
    #[error("unknown logical module `{0}`")]
    Unknown(String),
}

/// Resolves logical module names for a target bundle.
pub trait ModuleLoader: Send + Sync {
    fn resolve(&self, name: &str, target: ModuleTarget) -> Result<ModuleSource, ModuleError>;
}

/// Table-backed [`ModuleLoader`]: bundled defaults, per-project overrides,
/// and per-target exclusions.
#[derive(Default)]
pub struct VirtualModules {
    bundled: HashMap<String, String>,
    overrides: HashMap<String, PathBuf>,
    /// name → (excluded target, export names to stub out there).
    split: HashMap<String, (ModuleTarget, Vec<String>)>,
}

impl VirtualModules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bundle(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.bundled.insert(name.into(), source.into());
        self
    }

    pub fn override_with(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.overrides.insert(name.into(), path.into());
        self
    }

    /// Exclude `name` from `target`, stubbing the listed exports there.
    pub fn split(
        mut self,
        name: impl Into<String>,
        excluded: ModuleTarget,
        exports: Vec<String>,
    ) -> Self {
        self.split.insert(name.into(), (excluded, exports));
        self
    }
}

impl ModuleLoader for VirtualModules {
    fn resolve(&self, name: &str, target: ModuleTarget) -> Result<ModuleSource, ModuleError> {
        if !LOGICAL_MODULES.contains(&name)
            && !self.bundled.contains_key(name)
            && !self.overrides.contains_key(name)
        {
            return Err(ModuleError::Unknown(name.to_string()));
        }

        if let Some((excluded, exports)) = self.split.get(name) {
            if *excluded == target {
                debug!(%name, ?target, "resolving split module to placeholder");
                return Ok(ModuleSource::Placeholder { exports: exports.clone() });
            }
        }

        if let Some(path) = self.overrides.get(name) {
            debug!(%name, path = %path.display(), "resolving project override");
            return Ok(ModuleSource::ProjectOverride(path.clone()));
        }

        match self.bundled.get(name) {
            Some(source) => Ok(ModuleSource::Bundled(source.clone())),
            None => Err(ModuleError::Unknown(name.to_string())),
        }
    }
}
