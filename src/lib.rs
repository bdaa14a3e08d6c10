#![doc(html_logo_url = "https://www.rust-lang.org/logos/rust-logo-128x128.png")]
#![doc(html_favicon_url = "https://www.rust-lang.org/favicon.ico")]
//! # SSR Recipe
//!
//! > **A Recipe for Suspense-aware Server Rendering in Rust.**
//!
//! This crate demonstrates a pattern for building a server-rendering pipeline
//! on Tokio: routes resolve their data through async lifecycle hooks, the
//! renderer suspends on unsettled resources and retries, and the finished
//! state ships to the client as a hydration payload so the first client
//! render never refetches.
//!
//! ## 🏗️ Design Philosophy
//!
//! ### Why Suspension + Explicit Phases?
//!
//! The pipeline combines two ideas:
//! - **Suspend-and-retry rendering**: the renderer asks for data synchronously;
//!   if it is not ready, the pass interrupts itself and re-runs after the
//!   resource settles.
//! - **A strict context lifecycle**: data, head metadata, and enter hooks run
//!   in a fixed order on one per-request context, so later phases can depend
//!   on earlier results.
//!
//! This combination provides:
//! - **Streaming for free**: the shell flushes while slow subtrees resolve.
//! - **One source of truth**: the same context renders on the server and
//!   hydrates the client.
//! - **Type Safety**: suspension is a returned value ([`framework::resource::Acquired`]),
//!   never control-flow trickery.
//!
//! ## 🚀 Core Concepts
//!
//! ### Single-Consumption Resources
//! A cache entry lives exactly one produce/read cycle: the producer runs once
//! no matter how many passes suspend on it, and the first settled read evicts
//! the entry. Navigating to the same route twice therefore refetches.
//!
//! ### Mocking: Testing without an Engine
//! The pipeline never needs a real rendering engine to be tested. The
//! scripted [`framework::mock::MockRenderer`] suspends through the real cache
//! exactly like an engine would.
//!
//! ## 👩‍💻 Architecture Notes
//!
//! ### 1. Type-Safe Error Handling
//! Each layer defines its own error type (`LoaderError`, `RenderError`,
//! `PipelineError`) with `thiserror`. Hook failures degrade the page; only
//! renderer failures abort the response.
//!
//! ### 2. Request-Scoped State
//! Every request gets its own [`context::RouteContext`] and
//! [`framework::resource::ResourceCache`]. Nothing render-related is global,
//! so one user's data can never leak into another's pass.
//!
//! ### 3. Concurrency Model
//! Resource producers run as spawned Tokio tasks; settlement is signaled over
//! a `watch` channel. The streaming strategy hands the response off on an
//! `mpsc` channel as soon as the shell exists.
//!
//! ### 4. Observability
//! We use `tracing` everywhere with structured logging. Each request runs in
//! its own span; see the [`lifecycle::tracing`] module for details.
//!
//! ## 🗺️ Module Tour
//!
//! The codebase is organized into layers. Here is your map:
//!
//! ### 1. The Engine ([`framework`])
//! The generic machinery: resource cache, render strategies, shell assembly,
//! hydration protocol, and the error taxonomy.
//! - **Key items**: [`ResourceCache`](framework::resource::ResourceCache),
//!   [`Renderer`](framework::render::Renderer).
//!
//! ### 2. The Context ([`context`], [`state`])
//! Per-request render state and its phase machine, plus the observable state
//! store components subscribe to.
//! - **Key items**: [`RouteContext`](context::RouteContext),
//!   [`StateStore`](state::StateStore).
//!
//! ### 3. The Catalog ([`routes`])
//! Declarative and module-derived route definitions, resolved into the
//! ordered catalog the pipeline serves.
//! - **Key items**: [`RouteCatalog`](routes::RouteCatalog),
//!   [`RouteSpec`](routes::RouteSpec).
//!
//! ### 4. The Orchestrator ([`lifecycle`])
//! Drives one request end to end: resolve, phases, render, serialize,
//! assemble.
//! - **Key items**: [`RenderPipeline`](lifecycle::RenderPipeline).
//!
//! ### 5. The Client Runtime ([`client`])
//! Hydration and in-app navigation: rebuild the context from the payload,
//! then refetch through the data endpoint on later navigations.
//! - **Key items**: [`ClientSession`](client::ClientSession),
//!   [`hydrate`](client::hydrate).
//!
//! ### 6. The Build Seam ([`loader`])
//! The logical-module contract between the pipeline and the bundler.
//!
//! ## 🚀 Quick Start
//!
//! ### Running Tests
//!
//! ```bash
//! cargo test
//! ```
//!
//! ```bash
//! # Verbose pipeline logs while testing
//! RUST_LOG=debug cargo test -- --nocapture
//! ```

pub mod client;
pub mod context;
pub mod framework;
pub mod lifecycle;
pub mod loader;
pub mod routes;
pub mod state;
