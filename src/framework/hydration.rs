//! # Hydration Protocol
//!
//! The only channel of information flow from server to client: a serializable
//! projection of the route context plus the route catalog, embedded in the
//! document as two inline-script bindings (`window.route`, `window.routes`)
//! and read back on load to reconstruct a [`RouteContext`], so the client's
//! first render observes the server's data without re-running a single
//! loader.
//!
//! # Encoding rules
//! - Values are *encoded*, never concatenated raw: `<`, `>`, `&` and the
//!   JS line separators U+2028/U+2029 are escaped inside the JSON text, so
//!   user-controlled data cannot close the script element or inject markup.
//! - Fields the source model leaves undefined (no data resolved, no head, no
//!   state) round-trip as *absent* (encoded by omission, reconstructed as
//!   `None`) rather than being collapsed to `null`.
//! - Live handles (connections, reply objects, hook closures) have no
//!   representation here by construction.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::HydrationError;
use crate::context::{ContextInitializer, HeadConfig, HookFlags, RouteContext};
use crate::routes::RouteProjection;
use crate::state::JsonMap;

/// Serializable projection of a [`RouteContext`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextProjection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<HeadConfig>,
    #[serde(default)]
    pub action_data: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<JsonMap>,
    pub layout: String,
    pub first_render: bool,
    pub get_meta: bool,
    pub get_data: bool,
    pub on_enter: bool,
    pub client_only: bool,
}

impl ContextProjection {
    /// Project the serializable subset of a context. Empty collections are
    /// treated as the source model's "undefined" and omitted from the wire.
    pub fn from_context(context: &RouteContext) -> Self {
        Self {
            data: if context.data.is_empty() { None } else { Some(context.data.clone()) },
            head: if context.head == HeadConfig::default() {
                None
            } else {
                Some(context.head.clone())
            },
            action_data: context.action_data.clone(),
            state: if context.state.is_empty() { None } else { Some(context.state.snapshot()) },
            layout: context.layout.clone(),
            first_render: context.first_render,
            get_meta: context.hooks.get_meta,
            get_data: context.hooks.get_data,
            on_enter: context.hooks.on_enter,
            client_only: context.client_only,
        }
    }

    pub fn hooks(&self) -> HookFlags {
        HookFlags { get_data: self.get_data, get_meta: self.get_meta, on_enter: self.on_enter }
    }

    /// Rebuild a client-side context from this projection. The context starts
    /// with the first-render hydration bypass in effect.
    pub fn into_context(self, initializer: Option<&dyn ContextInitializer>) -> RouteContext {
        let hooks = self.hooks();
        RouteContext::hydrated(
            self.data,
            self.head,
            self.state.unwrap_or_default(),
            self.action_data,
            self.layout,
            hooks,
            self.client_only,
            initializer,
        )
    }
}

/// The complete payload embedded in a server-rendered document.
#[derive(Debug, Clone, PartialEq)]
pub struct HydrationPayload {
    pub context: ContextProjection,
    pub routes: Vec<RouteProjection>,
}

impl HydrationPayload {
    /// Encode both bindings as one inline script element.
    pub fn to_script(&self) -> Result<String, HydrationError> {
        let context = serde_json::to_string(&self.context).map_err(HydrationError::Encode)?;
        let routes = serde_json::to_string(&self.routes).map_err(HydrationError::Encode)?;
        debug!(
            context_bytes = context.len(),
            routes = self.routes.len(),
            "hydration payload encoded"
        );
        Ok(format!(
            "<script>\nwindow.route = {}\nwindow.routes = {}\n</script>",
            escape_inline(&context),
            escape_inline(&routes),
        ))
    }

    /// Decode the two bindings back into a payload.
    pub fn decode(context_json: &str, routes_json: &str) -> Result<Self, HydrationError> {
        Ok(Self {
            context: serde_json::from_str(context_json).map_err(HydrationError::Decode)?,
            routes: serde_json::from_str(routes_json).map_err(HydrationError::Decode)?,
        })
    }

    /// Extract the bindings from a rendered document and decode them. This is
    /// the client runtime's load path (and keeps round-trip tests honest:
    /// they go through the actual document, not a shortcut).
    pub fn from_document(document: &str) -> Result<Self, HydrationError> {
        let context = binding(document, "window.route = ")
            .ok_or(HydrationError::MissingBinding("window.route"))?;
        let routes = binding(document, "window.routes = ")
            .ok_or(HydrationError::MissingBinding("window.routes"))?;
        Self::decode(context, routes)
    }
}

/// Find a `\nwindow.x = <json>\n` binding. The encoded JSON is a single line,
/// so the value runs to the next newline.
fn binding<'a>(document: &'a str, prefix: &str) -> Option<&'a str> {
    let start = document.find(prefix)? + prefix.len();
    let rest = &document[start..];
    let end = rest.find('\n').unwrap_or(rest.len());
    Some(&rest[..end])
}

/// Escape characters that could terminate the surrounding script element or
/// alter parsing. All of these only ever occur inside JSON string literals,
/// where the `\u` form is equivalent.
fn escape_inline(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for ch in json.chars() {
        match ch {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn projection() -> ContextProjection {
        let mut data = JsonMap::new();
        data.insert("count".into(), json!(1));
        ContextProjection {
            data: Some(data),
            head: Some(HeadConfig::titled("Count")),
            action_data: JsonMap::new(),
            state: None,
            layout: "default".into(),
            first_render: true,
            get_meta: true,
            get_data: true,
            on_enter: false,
            client_only: false,
        }
    }

    fn routes() -> Vec<RouteProjection> {
        vec![RouteProjection {
            id: "/pages/count.tsx".into(),
            path: "/count".into(),
            name: "count".into(),
            layout: "default".into(),
            client_only: false,
            server_only: false,
        }]
    }

    #[test]
    fn round_trips_through_the_script_element() {
        let payload = HydrationPayload { context: projection(), routes: routes() };
        let script = payload.to_script().unwrap();
        let decoded = HydrationPayload::from_document(&script).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn absent_fields_survive_as_absent() {
        let mut context = projection();
        context.data = None;
        context.head = None;
        let payload = HydrationPayload { context, routes: routes() };

        let script = payload.to_script().unwrap();
        assert!(!script.contains("\"data\""), "absent data must be omitted, not null");
        let decoded = HydrationPayload::from_document(&script).unwrap();
        assert_eq!(decoded.context.data, None);
        assert_eq!(decoded.context.head, None);
    }

    #[test]
    fn user_data_cannot_break_out_of_the_script() {
        let mut context = projection();
        let mut data = JsonMap::new();
        data.insert("bio".into(), json!("</script><script>alert(1)</script>"));
        context.data = Some(data);
        let payload = HydrationPayload { context, routes: routes() };

        let script = payload.to_script().unwrap();
        // Exactly the wrapper's own tags, nothing contributed by the value.
        assert_eq!(script.matches("</script>").count(), 1);
        assert!(script.contains("\\u003c/script\\u003e"));

        let decoded = HydrationPayload::from_document(&script).unwrap();
        let bio = decoded.context.data.unwrap()["bio"].clone();
        assert_eq!(bio, json!("</script><script>alert(1)</script>"));
    }

    #[test]
    fn catalog_projection_round_trips_in_order() {
        let mut all = routes();
        all.push(RouteProjection {
            id: "/pages/admin.tsx".into(),
            path: "/admin".into(),
            name: "admin".into(),
            layout: "admin".into(),
            client_only: false,
            server_only: true,
        });
        let payload = HydrationPayload { context: projection(), routes: all.clone() };
        let decoded = HydrationPayload::from_document(&payload.to_script().unwrap()).unwrap();
        assert_eq!(decoded.routes, all);
    }
}
