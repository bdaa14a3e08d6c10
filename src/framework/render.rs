//! # Render Strategies
//!
//! The suspend-and-retry driver between the Renderer and the Resource Cache.
//!
//! A renderer runs *passes*: one cooperative traversal of the component tree
//! that either runs to the end or interrupts itself when
//! [`ResourceCache::acquire`](super::resource::ResourceCache::acquire) hands
//! back a pending handle. There is no mid-tree resumption: the driver waits
//! for the handle to settle and re-invokes the pass from the top. A renderer
//! therefore keeps its own progress marker and never re-emits a chunk it
//! already produced in an earlier pass.
//!
//! Two strategies wrap that loop:
//!
//! - [`all_ready`] is buffered: drive every suspension to completion, emit
//!   one chunk. Used by default and always for server-only documents.
//! - [`shell_ready`] is streaming: hand the response off as soon as the shell
//!   (the first emitted chunk run) exists, pumping the remaining chunks
//!   through a channel as they become available.
//!
//! Both surface a render failure as an error value, never a truncated,
//! well-formed-looking stream.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::error::RenderError;
use super::resource::{PendingResource, ResourceCache};
use crate::context::RouteContext;

/// Outcome of one render pass.
#[derive(Debug)]
pub enum Pass {
    /// The pass ran to the end of the tree. `emitted` holds the chunks this
    /// pass produced beyond what earlier passes already emitted.
    Complete { emitted: Vec<Bytes> },
    /// The pass interrupted itself on an unsettled resource. Chunks finished
    /// before the interruption are handed over; the driver waits on `handle`
    /// and retries.
    Suspended { emitted: Vec<Bytes>, handle: PendingResource },
    /// The pass could not produce output. Fatal to the response.
    Failed(RenderError),
}

/// The rendering engine, seen from the pipeline.
///
/// Implementations own the component tree; the pipeline only needs the
/// generic suspend-and-retry capability, not data-fetching hooks.
pub trait Renderer: Send + 'static {
    fn pass(&mut self, context: &RouteContext, cache: &ResourceCache) -> Pass;
}

/// Body stream handed to the shell assembler: chunks in arrival order, or one
/// terminal error.
pub type BodyStream = mpsc::Receiver<Result<Bytes, RenderError>>;

/// Buffered strategy: wait for the entire tree, nested suspensions included,
/// then return the document body as a single chunk.
pub async fn all_ready(
    renderer: &mut dyn Renderer,
    context: &RouteContext,
    cache: &ResourceCache,
) -> Result<Bytes, RenderError> {
    let mut collected: Vec<Bytes> = Vec::new();
    let mut passes = 0u32;
    loop {
        passes += 1;
        match renderer.pass(context, cache) {
            Pass::Complete { emitted } => {
                collected.extend(emitted);
                debug!(passes, chunks = collected.len(), "render complete (all-ready)");
                return Ok(concat(collected));
            }
            Pass::Suspended { emitted, mut handle } => {
                collected.extend(emitted);
                handle.settled().await;
            }
            Pass::Failed(error) => {
                warn!(passes, %error, "render failed (all-ready)");
                return Err(error);
            }
        }
    }
}

/// Streaming strategy: return a chunk stream as soon as the shell has
/// rendered; the rest of the tree keeps rendering in a background task and its
/// chunks arrive on the stream in order.
///
/// A failure *before* the shell exists is returned as `Err`: nothing has
/// been flushed, the caller can still answer with a server error. A failure
/// after the handoff arrives as the stream's terminal item.
pub async fn shell_ready(
    mut renderer: Box<dyn Renderer>,
    context: RouteContext,
    cache: ResourceCache,
) -> Result<BodyStream, RenderError> {
    let mut shell: Vec<Bytes> = Vec::new();
    let mut resume: Option<PendingResource> = None;
    let mut done = false;

    // Drive until the shell (first emitted chunk run) exists.
    loop {
        match renderer.pass(&context, &cache) {
            Pass::Complete { emitted } => {
                shell.extend(emitted);
                done = true;
                break;
            }
            Pass::Suspended { emitted, mut handle } => {
                if emitted.is_empty() && shell.is_empty() {
                    // Suspended ahead of the shell: nothing to flush yet.
                    handle.settled().await;
                    continue;
                }
                shell.extend(emitted);
                resume = Some(handle);
                break;
            }
            Pass::Failed(error) => {
                warn!(%error, "render failed before shell");
                return Err(error);
            }
        }
    }

    let (tx, rx) = mpsc::channel(16);
    debug!(chunks = shell.len(), complete = done, "shell ready, streaming body");

    // All sends happen in the pump task. The handoff must return before
    // anything is drained, so sending here would deadlock once the shell
    // outgrows the channel capacity.
    tokio::spawn(async move {
        for chunk in shell {
            if tx.send(Ok(chunk)).await.is_err() {
                return;
            }
        }
        if done {
            return;
        }
        if let Some(mut handle) = resume {
            handle.settled().await;
        }
        loop {
            match renderer.pass(&context, &cache) {
                Pass::Complete { emitted } => {
                    for chunk in emitted {
                        if tx.send(Ok(chunk)).await.is_err() {
                            return;
                        }
                    }
                    return;
                }
                Pass::Suspended { emitted, mut handle } => {
                    for chunk in emitted {
                        if tx.send(Ok(chunk)).await.is_err() {
                            return;
                        }
                    }
                    handle.settled().await;
                }
                Pass::Failed(error) => {
                    warn!(%error, "render failed mid-stream");
                    let _ = tx.send(Err(error)).await;
                    return;
                }
            }
        }
    });

    Ok(rx)
}

fn concat(chunks: Vec<Bytes>) -> Bytes {
    match chunks.len() {
        0 => Bytes::new(),
        1 => chunks.into_iter().next().unwrap_or_default(),
        _ => {
            let mut out = Vec::with_capacity(chunks.iter().map(Bytes::len).sum());
            for chunk in chunks {
                out.extend_from_slice(&chunk);
            }
            Bytes::from(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::mock::MockRenderer;
    use crate::framework::resource::ResourceKey;
    use crate::routes::RouteSpec;
    use serde_json::json;
    use std::time::Duration;

    async fn context() -> RouteContext {
        let route = RouteSpec::new("/pages/t.tsx", "/t", "t").into_def();
        RouteContext::create(&route, None).await.unwrap()
    }

    #[tokio::test]
    async fn all_ready_waits_out_suspensions() {
        let mut renderer = MockRenderer::new()
            .markup("<main>")
            .resource(ResourceKey::scoped("/t", "getData"), json!("alpha"), "<p>{}</p>")
            .markup("</main>");
        let context = context().await;
        let cache = ResourceCache::new();

        let body = all_ready(&mut renderer, &context, &cache).await.unwrap();
        assert_eq!(body, Bytes::from("<main><p>\"alpha\"</p></main>"));
    }

    #[tokio::test]
    async fn all_ready_surfaces_render_failure() {
        let mut renderer = MockRenderer::new().markup("<main>").fail("component exploded");
        let context = context().await;
        let cache = ResourceCache::new();

        let err = all_ready(&mut renderer, &context, &cache).await.unwrap_err();
        assert_eq!(err, RenderError::Render("component exploded".into()));
    }

    #[tokio::test]
    async fn shell_ready_streams_shell_before_resources_settle() {
        let renderer = MockRenderer::new().markup("<div id=\"shell\">").boundary(
            ResourceKey::scoped("/t", "getData"),
            json!({"n": 1}),
            Duration::from_millis(20),
            "<p>loading</p>",
            "<p>{}</p>",
        );
        let context = context().await;
        let cache = ResourceCache::new();

        let mut body = shell_ready(Box::new(renderer), context, cache).await.unwrap();

        // Shell chunks must arrive before the boundary's resource resolves.
        let first = body.recv().await.unwrap().unwrap();
        assert_eq!(first, Bytes::from("<div id=\"shell\">"));
        let second = body.recv().await.unwrap().unwrap();
        assert_eq!(second, Bytes::from("<p>loading</p>"));

        let resolved = body.recv().await.unwrap().unwrap();
        assert_eq!(resolved, Bytes::from("<p>{\"n\":1}</p>"));
        assert!(body.recv().await.is_none());
    }

    #[tokio::test]
    async fn shell_ready_hands_off_before_the_shell_is_drained() {
        // A shell larger than the channel capacity: the handoff must not
        // wait for a consumer that cannot exist until it returns.
        let mut renderer = MockRenderer::new();
        for i in 0..20 {
            renderer = renderer.markup(format!("<p>{i}</p>"));
        }
        let renderer = renderer.boundary(
            ResourceKey::scoped("/t", "getData"),
            json!("tail"),
            Duration::from_millis(10),
            "<p>loading</p>",
            "<p>{}</p>",
        );
        let context = context().await;

        let mut body = tokio::time::timeout(
            Duration::from_secs(1),
            shell_ready(Box::new(renderer), context, ResourceCache::new()),
        )
        .await
        .expect("handoff must return without a consumer")
        .unwrap();

        let mut chunks = Vec::new();
        while let Some(chunk) = body.recv().await {
            chunks.push(chunk.unwrap());
        }
        // 20 markup chunks, the placeholder, then the resolved boundary.
        assert_eq!(chunks.len(), 22);
        assert_eq!(chunks[0], Bytes::from("<p>0</p>"));
        assert_eq!(chunks[21], Bytes::from("<p>\"tail\"</p>"));
    }

    #[tokio::test]
    async fn shell_ready_fails_eagerly_when_shell_cannot_render() {
        let renderer = MockRenderer::new().fail("no shell");
        let context = context().await;
        let err = shell_ready(Box::new(renderer), context, ResourceCache::new())
            .await
            .unwrap_err();
        assert_eq!(err, RenderError::Render("no shell".into()));
    }
}
