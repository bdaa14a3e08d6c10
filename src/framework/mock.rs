//! # Mock Collaborators
//!
//! Test doubles for the two external collaborators the pipeline drives: the
//! Renderer and the client-side fetcher.
//!
//! [`MockRenderer`] runs a scripted render pass (markup chunks, suspending
//! resource reads, suspense boundaries with placeholders) against a real
//! [`ResourceCache`], which is exactly how a real renderer integrates.
//! [`MockFetcher`] answers data-endpoint fetches from a canned response table
//! and records every call, so tests can assert refetch behavior.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use super::error::{RenderError, ResourceError};
use super::render::{Pass, Renderer};
use super::resource::{Acquired, PendingResource, ResourceCache, ResourceKey};
use crate::client::Fetcher;
use crate::context::RouteContext;

// =============================================================================
// 1. SCRIPTED RENDERER
// =============================================================================

#[derive(Clone)]
enum Step {
    Markup(String),
    /// A blocking resource read: the pass suspends here until the value is
    /// ready, then renders `template` with `{}` replaced by the JSON value.
    Resource { key: ResourceKey, value: Value, delay: Duration, template: String },
    /// A suspense boundary: a pending resource emits `placeholder` and lets
    /// the pass continue; the resolved `template` chunk arrives later.
    Boundary {
        key: ResourceKey,
        value: Value,
        delay: Duration,
        placeholder: String,
        template: String,
    },
    Fail(String),
}

/// A renderer that follows a fixed script, suspending through the real cache.
pub struct MockRenderer {
    script: Vec<Step>,
    pos: usize,
}

impl MockRenderer {
    pub fn new() -> Self {
        Self { script: Vec::new(), pos: 0 }
    }

    pub fn markup(mut self, chunk: impl Into<String>) -> Self {
        self.script.push(Step::Markup(chunk.into()));
        self
    }

    /// A resource read the whole pass blocks on (no surrounding boundary).
    pub fn resource(mut self, key: ResourceKey, value: Value, template: impl Into<String>) -> Self {
        self.script.push(Step::Resource {
            key,
            value,
            delay: Duration::ZERO,
            template: template.into(),
        });
        self
    }

    pub fn resource_after(
        mut self,
        key: ResourceKey,
        value: Value,
        delay: Duration,
        template: impl Into<String>,
    ) -> Self {
        self.script.push(Step::Resource { key, value, delay, template: template.into() });
        self
    }

    /// A suspense boundary: the shell shows `placeholder` while the resource
    /// is pending, and `template` streams in once it settles.
    pub fn boundary(
        mut self,
        key: ResourceKey,
        value: Value,
        delay: Duration,
        placeholder: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        self.script.push(Step::Boundary {
            key,
            value,
            delay,
            placeholder: placeholder.into(),
            template: template.into(),
        });
        self
    }

    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.script.push(Step::Fail(message.into()));
        self
    }
}

impl Default for MockRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn producer(
    value: Value,
    delay: Duration,
) -> impl FnOnce() -> futures::future::BoxFuture<'static, Result<Value, ResourceError>> {
    move || {
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(value)
        })
    }
}

fn filled(template: &str, value: &Value) -> Bytes {
    let rendered = serde_json::to_string(value).unwrap_or_else(|_| "null".into());
    Bytes::from(template.replace("{}", &rendered))
}

impl Renderer for MockRenderer {
    fn pass(&mut self, _context: &RouteContext, cache: &ResourceCache) -> Pass {
        let mut emitted: Vec<Bytes> = Vec::new();
        let mut waiting: Option<PendingResource> = None;

        while self.pos < self.script.len() {
            match self.script[self.pos].clone() {
                Step::Markup(chunk) => {
                    emitted.push(Bytes::from(chunk));
                    self.pos += 1;
                }
                Step::Fail(message) => {
                    return Pass::Failed(RenderError::Render(message));
                }
                Step::Resource { key, value, delay, template } => {
                    match cache.acquire(key, producer(value, delay)) {
                        Acquired::Ready(resolved) => {
                            emitted.push(filled(&template, &resolved));
                            self.pos += 1;
                        }
                        Acquired::Pending(handle) => {
                            // A bare resource read blocks the whole pass.
                            return Pass::Suspended { emitted, handle };
                        }
                        Acquired::Failed(error) => {
                            return Pass::Failed(RenderError::Resource(error));
                        }
                    }
                }
                Step::Boundary { key, value, delay, placeholder, template } => {
                    match cache.acquire(key.clone(), producer(value.clone(), delay)) {
                        Acquired::Ready(resolved) => {
                            emitted.push(filled(&template, &resolved));
                            self.pos += 1;
                        }
                        Acquired::Pending(handle) => {
                            // Emit the placeholder, keep walking the tree, and
                            // queue the boundary's real content at the end of
                            // the script so a later pass streams it in.
                            emitted.push(Bytes::from(placeholder));
                            self.script.push(Step::Resource { key, value, delay, template });
                            if waiting.is_none() {
                                waiting = Some(handle);
                            }
                            self.pos += 1;
                        }
                        Acquired::Failed(error) => {
                            return Pass::Failed(RenderError::Resource(error));
                        }
                    }
                }
            }
        }

        match waiting {
            Some(handle) => Pass::Suspended { emitted, handle },
            None => Pass::Complete { emitted },
        }
    }
}

// =============================================================================
// 2. SCRIPTED FETCHER
// =============================================================================

/// Canned fetcher for client-side tests, with a call log.
#[derive(Default)]
pub struct MockFetcher {
    responses: Mutex<HashMap<String, Value>>,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, path: impl Into<String>, value: Value) -> Self {
        lock(&self.responses).insert(path.into(), value);
        self
    }

    /// Every path fetched so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch_json(&self, path: &str) -> Result<Value, ResourceError> {
        lock(&self.calls).push(path.to_string());
        lock(&self.responses)
            .get(path)
            .cloned()
            .ok_or(ResourceError::Status(404))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
