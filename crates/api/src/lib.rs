//! HTTP API: event ingest, run inspection, and the service entry point wiring.

pub mod app;
pub mod middleware;
