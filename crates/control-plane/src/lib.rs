//! The orchestrator service as a library: application state, the HTTP
//! route table, the background Watcher and Cleanup Watchdog, and their
//! collaborator seams (auth, compilation, the gateway client). Split out
//! of `main.rs` so integration tests can build a router against an
//! in-memory store without going over the network, the same shape the
//! teacher's Axum services use for their own `tests/http.rs`.

pub mod auth;
pub mod cleanup;
pub mod compilation;
pub mod config;
pub mod error;
pub mod gateway_client;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod watcher;

pub use state::AppState;
