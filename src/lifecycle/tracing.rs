//! # Observability & Tracing
//!
//! Structured logging for the rendering pipeline with the `tracing` crate.
//!
//! ## Configuration
//!
//! Output uses a compact format with the crate/module prefix hidden
//! (`with_target(false)`); the pipeline's own structured fields carry the
//! context instead. Log levels come from `RUST_LOG`.
//!
//! ```bash
//! # Compact request logs (default)
//! RUST_LOG=info cargo run
//!
//! # Per-phase and per-resource detail
//! RUST_LOG=debug cargo run
//! ```
//!
//! ## What Gets Traced
//!
//! - **Requests**: every page request runs inside a `request` span carrying
//!   the route path, so phase and resource logs nest under it.
//! - **Lifecycle phases**: data/meta/enter resolution, including recorded
//!   hook failures (at `warn`, since the page still renders).
//! - **Resource cache**: producer starts, suspensions, settlements, and
//!   evictions, keyed by resource key at `debug`.
//! - **Render strategies**: pass counts and shell handoff at `debug`.
//!
//! A typical request at `RUST_LOG=debug`:
//!
//! ```text
//! DEBUG request{path=/users}: data phase resolved keys=2
//! DEBUG request{path=/users}: starting resource producer key=/users:items
//! DEBUG request{path=/users}: resource read, evicting key=/users:items
//! DEBUG request{path=/users}: render complete (all-ready) passes=2 chunks=3
//!  INFO request{path=/users}: response assembled streaming=false degraded=false pending_resources=0
//! ```
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false) // Module paths add noise; spans carry the context.
        .compact()
        .init();
}
