//! Generic rendering-pipeline framework.
//!
//! This module provides the engine-agnostic building blocks of server
//! rendering: the suspending resource cache, the render-pass driver, the
//! shell assembler, and the hydration wire protocol.
//!
//! # Main Components
//!
//! - [`resource::ResourceCache`] - Keyed suspend-and-retry store for async data
//! - [`render::Renderer`] - Trait the rendering engine implements
//! - [`shell::ShellTemplates`] - Pre-split document templates
//! - [`hydration::HydrationPayload`] - The server-to-client state contract
//! - [`error`] - The pipeline's error taxonomy
//!
//! # Testing
//!
//! See [`mock`] module for a scripted renderer and fetcher that exercise the
//! real cache and protocol without a rendering engine.

pub mod error;
pub mod hydration;
pub mod mock;
pub mod render;
pub mod resource;
pub mod shell;
