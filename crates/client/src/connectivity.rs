//! Connectivity state, injected instead of read from ambient globals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Whether the API is believed reachable right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    Online,
    Offline,
}

/// Read side of the connectivity seam.
///
/// Strategy code asks the monitor instead of a global flag, so tests drive
/// transitions directly.
pub trait ConnectivityMonitor: Send + Sync {
    fn state(&self) -> ConnectivityState;

    fn is_online(&self) -> bool {
        self.state() == ConnectivityState::Online
    }
}

/// Shared connectivity flag, updated by the worker's health probe.
///
/// Starts online: the first real request settles the question empirically.
#[derive(Debug)]
pub struct SharedConnectivity {
    online: AtomicBool,
}

impl SharedConnectivity {
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn set_state(&self, state: ConnectivityState) {
        let was_online = self
            .online
            .swap(state == ConnectivityState::Online, Ordering::SeqCst);
        if was_online != (state == ConnectivityState::Online) {
            tracing::info!(state = ?state, "connectivity changed");
        }
    }

    pub fn set_online(&self) {
        self.set_state(ConnectivityState::Online);
    }

    pub fn set_offline(&self) {
        self.set_state(ConnectivityState::Offline);
    }
}

impl Default for SharedConnectivity {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityMonitor for SharedConnectivity {
    fn state(&self) -> ConnectivityState {
        if self.online.load(Ordering::SeqCst) {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        }
    }
}

/// How long a health probe may take before counting as offline.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Probe the API health endpoint.
pub async fn probe_health(http: &reqwest::Client, api_base: &str) -> ConnectivityState {
    let url = format!("{api_base}/health");
    match http.get(&url).timeout(PROBE_TIMEOUT).send().await {
        Ok(resp) if resp.status().is_success() => ConnectivityState::Online,
        Ok(resp) => {
            tracing::debug!(status = resp.status().as_u16(), "health probe rejected");
            ConnectivityState::Offline
        }
        Err(err) => {
            tracing::debug!(error = %err, "health probe failed");
            ConnectivityState::Offline
        }
    }
}
