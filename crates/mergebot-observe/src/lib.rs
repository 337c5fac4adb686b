//! Observability wiring for mergebot.
//!
//! Lives in its own crate so the core engine only depends on the `tracing`
//! facade; subscriber and exporter choices stay at the application edge.

pub mod tracing_setup;
