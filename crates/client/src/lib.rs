//! `sitesafe-client` is the client-facing surface of the offline engine.
//!
//! The [`Gateway`] classifies every outgoing request and applies the right
//! caching or queueing strategy; the [`SyncWorker`] probes connectivity and
//! replays the queue in the background; [`OfflineEngine`] wires it all
//! together behind one handle. A headless `sitesafe-agent` binary runs the
//! engine standalone.

pub mod config;
pub mod connectivity;
pub mod engine;
pub mod gateway;
pub mod request;
pub mod worker;

pub use config::{EngineConfig, Priority, RoutePolicy, RouteTable};
pub use connectivity::{
    probe_health, ConnectivityMonitor, ConnectivityState, SharedConnectivity,
};
pub use engine::OfflineEngine;
pub use gateway::{classify, Gateway, GatewayError, RequestClass};
pub use request::{
    GatewayRequest, GatewayResponse, CACHE_AGE_HEADER, SERVED_FROM_HEADER,
};
pub use worker::{SyncWorker, WorkerCommand, WorkerError, WorkerHandle};
