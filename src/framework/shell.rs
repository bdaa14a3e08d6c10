//! # Shell Assembler
//!
//! Splits the static document template into a before/after pair around the
//! injection marker and lazily interleaves it with the live render body:
//!
//! ```text
//! transform(before) → transform(chunk)... → transform(after)
//! ```
//!
//! Every fragment and chunk goes through the same idempotent head-metadata
//! transformation ([`HeadConfig::transform`]), so head tags discovered late
//! (e.g. from data resolved deep in the tree) still land correctly relative
//! to markup that has already been flushed.
//!
//! Two template pairs are derived once at startup: the **universal** pair and
//! a **server-only** pair with the client activation script stripped. The
//! route's `server_only` flag selects between them per request.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use regex::Regex;
use tracing::debug;

use super::error::RenderError;
use super::render::BodyStream;
use crate::context::HeadConfig;

/// Marker in the document template where the rendered element lands.
pub const ELEMENT_MARKER: &str = "<!-- element -->";

/// Marker in the `before` fragment replaced by the hydration script block.
pub const HYDRATION_MARKER: &str = "<!-- hydration -->";

/// Immutable before/after fragments of one document template.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplatePair {
    pub before: String,
    pub after: String,
}

/// The two template variants kept per document template.
#[derive(Debug, Clone)]
pub struct ShellTemplates {
    pub universal: TemplatePair,
    pub server_only: TemplatePair,
}

impl ShellTemplates {
    /// Split `source` at the element marker, deriving both variants.
    pub fn split(source: &str) -> Result<Self, RenderError> {
        let universal = split_pair(source)?;
        let server_only = split_pair(&strip_client_modules(source))?;
        debug!(
            before = universal.before.len(),
            after = universal.after.len(),
            "shell templates derived"
        );
        Ok(Self { universal, server_only })
    }

    /// The pair matching the route's `server_only` flag.
    pub fn select(&self, server_only: bool) -> &TemplatePair {
        if server_only {
            &self.server_only
        } else {
            &self.universal
        }
    }
}

fn split_pair(source: &str) -> Result<TemplatePair, RenderError> {
    match source.split_once(ELEMENT_MARKER) {
        Some((before, after)) => {
            Ok(TemplatePair { before: before.to_string(), after: after.to_string() })
        }
        None => Err(RenderError::Template(format!(
            "missing `{ELEMENT_MARKER}` injection marker"
        ))),
    }
}

/// Remove `<script type="module">` elements: the client-side activation
/// script must not ship with server-only documents.
fn strip_client_modules(html: &str) -> String {
    let script = Regex::new(r#"(?s)<script[^>]*type="module"[^>]*>.*?</script>"#)
        .expect("static regex");
    script.replace_all(html, "").into_owned()
}

/// Assemble the final document as a lazy chunk sequence.
///
/// Emission order is strict: `before`, body chunks in arrival order, `after`.
/// The sequence is consumable exactly once; an error item from the body is
/// forwarded and terminates the stream so the caller never flushes a
/// malformed tail.
pub fn assemble(
    pair: TemplatePair,
    head: HeadConfig,
    hydration: String,
    body: Option<BodyStream>,
) -> impl Stream<Item = Result<Bytes, RenderError>> + Send {
    enum Stage {
        Before,
        Body,
        After,
        Done,
    }

    struct Assembler {
        pair: TemplatePair,
        head: HeadConfig,
        hydration: String,
        body: Option<BodyStream>,
        stage: Stage,
    }

    let assembler = Assembler { pair, head, hydration, body, stage: Stage::Before };

    stream::unfold(assembler, |mut a| async move {
        loop {
            match a.stage {
                Stage::Before => {
                    a.stage = Stage::Body;
                    let fragment = a.pair.before.replace(HYDRATION_MARKER, &a.hydration);
                    return Some((Ok(Bytes::from(a.head.transform(&fragment))), a));
                }
                Stage::Body => match a.body.as_mut() {
                    Some(rx) => match rx.recv().await {
                        Some(Ok(chunk)) => {
                            let html = a.head.transform(&String::from_utf8_lossy(&chunk));
                            return Some((Ok(Bytes::from(html)), a));
                        }
                        Some(Err(error)) => {
                            a.stage = Stage::Done;
                            return Some((Err(error), a));
                        }
                        None => a.stage = Stage::After,
                    },
                    None => a.stage = Stage::After,
                },
                Stage::After => {
                    a.stage = Stage::Done;
                    return Some((Ok(Bytes::from(a.head.transform(&a.pair.after))), a));
                }
                Stage::Done => return None,
            }
        }
    })
}

/// Drain an assembled stream into one document string. Used for buffered
/// responses and in tests; a streaming Host forwards the chunks instead.
pub async fn collect_document(
    stream: impl Stream<Item = Result<Bytes, RenderError>>,
) -> Result<String, RenderError> {
    futures::pin_mut!(stream);
    let mut out = String::new();
    while let Some(chunk) = stream.next().await {
        out.push_str(&String::from_utf8_lossy(&chunk?));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    const TEMPLATE: &str = concat!(
        "<html><head><title>t</title></head><body>",
        "<!-- hydration -->",
        "<div id=\"root\"><!-- element --></div>",
        "<script type=\"module\" src=\"/mount.js\"></script>",
        "</body></html>",
    );

    #[test]
    fn split_requires_the_element_marker() {
        assert!(ShellTemplates::split("<html></html>").is_err());
        let templates = ShellTemplates::split(TEMPLATE).unwrap();
        assert!(templates.universal.before.ends_with("<div id=\"root\">"));
        assert!(templates.universal.after.starts_with("</div>"));
    }

    #[test]
    fn server_only_pair_drops_the_activation_script() {
        let templates = ShellTemplates::split(TEMPLATE).unwrap();
        assert!(templates.universal.after.contains("type=\"module\""));
        assert!(!templates.server_only.after.contains("type=\"module\""));
        // Selection follows the route flag.
        assert_eq!(templates.select(true), &templates.server_only);
    }

    #[tokio::test]
    async fn emission_order_is_before_body_after() {
        let templates = ShellTemplates::split(TEMPLATE).unwrap();
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(Bytes::from("<p>one</p>"))).await.unwrap();
        tx.send(Ok(Bytes::from("<p>two</p>"))).await.unwrap();
        drop(tx);

        let document = collect_document(assemble(
            templates.universal.clone(),
            HeadConfig::default(),
            String::new(),
            Some(rx),
        ))
        .await
        .unwrap();

        let shell_at = document.find("<div id=\"root\">").unwrap();
        let one_at = document.find("<p>one</p>").unwrap();
        let two_at = document.find("<p>two</p>").unwrap();
        let after_at = document.find("</div>").unwrap();
        assert!(shell_at < one_at && one_at < two_at && two_at < after_at);
    }

    #[tokio::test]
    async fn empty_body_still_emits_both_fragments() {
        let templates = ShellTemplates::split(TEMPLATE).unwrap();
        let (tx, rx) = mpsc::channel::<Result<Bytes, RenderError>>(1);
        drop(tx);

        let document = collect_document(assemble(
            templates.universal.clone(),
            HeadConfig::default(),
            String::new(),
            Some(rx),
        ))
        .await
        .unwrap();
        assert!(document.contains("<div id=\"root\"></div>"));
    }

    #[tokio::test]
    async fn hydration_marker_is_replaced_in_the_before_fragment() {
        let templates = ShellTemplates::split(TEMPLATE).unwrap();
        let document = collect_document(assemble(
            templates.universal.clone(),
            HeadConfig::default(),
            "<script>window.route = 1</script>".to_string(),
            None,
        ))
        .await
        .unwrap();
        assert!(document.contains("<script>window.route = 1</script>"));
        assert!(!document.contains(HYDRATION_MARKER));
    }

    #[tokio::test]
    async fn head_transform_applies_to_every_fragment() {
        let templates = ShellTemplates::split(TEMPLATE).unwrap();
        let head = HeadConfig::titled("Resolved Late").meta("description", "d");
        let document = collect_document(assemble(
            templates.universal.clone(),
            head,
            String::new(),
            None,
        ))
        .await
        .unwrap();
        assert!(document.contains("<title>Resolved Late</title>"));
        assert!(document.contains("<meta name=\"description\" content=\"d\">"));
    }

    #[tokio::test]
    async fn body_error_terminates_the_stream() {
        let templates = ShellTemplates::split(TEMPLATE).unwrap();
        let (tx, rx) = mpsc::channel(2);
        tx.send(Ok(Bytes::from("<p>partial</p>"))).await.unwrap();
        tx.send(Err(RenderError::Render("mid-stream".into()))).await.unwrap();
        drop(tx);

        let result = collect_document(assemble(
            templates.universal.clone(),
            HeadConfig::default(),
            String::new(),
            Some(rx),
        ))
        .await;
        assert_eq!(result, Err(RenderError::Render("mid-stream".into())));
    }
}
