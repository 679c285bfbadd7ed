pub mod capacity;
pub mod lifecycle;
mod sse;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, watch};
use uuid::Uuid;

use crate::{
    config::AppConfig, dao::match_store::MatchStore, error::ServiceError,
    services::location_guard::GeoPosition,
};

pub use self::sse::SseState;

/// Shared handle to the central application state.
pub type SharedState = Arc<AppState>;

const SSE_HUB_CAPACITY: usize = 16;

/// Central application state storing the store handle, fan-out hubs, and the
/// location guard's last readings.
pub struct AppState {
    config: AppConfig,
    match_store: RwLock<Option<Arc<dyn MatchStore>>>,
    sse: SseState,
    positions: DashMap<Uuid, GeoPosition>,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            config,
            match_store: RwLock::new(None),
            sse: SseState::new(SSE_HUB_CAPACITY),
            positions: DashMap::new(),
            degraded: degraded_tx,
        })
    }

    /// Immutable runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Obtain a handle to the current match store, if one is installed.
    pub async fn match_store(&self) -> Option<Arc<dyn MatchStore>> {
        let guard = self.match_store.read().await;
        guard.as_ref().cloned()
    }

    /// Store handle or the degraded-mode error.
    pub async fn require_match_store(&self) -> Result<Arc<dyn MatchStore>, ServiceError> {
        self.match_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new match store implementation and leave degraded mode.
    pub async fn install_match_store(&self, store: Arc<dyn MatchStore>) {
        {
            let mut guard = self.match_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current match store and enter degraded mode.
    pub async fn clear_match_store(&self) {
        {
            let mut guard = self.match_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.match_store.read().await;
        guard.is_none()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Broadcast the degraded flag when the value actually changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Keyed SSE hubs used by the live view projection.
    pub fn sse(&self) -> &SseState {
        &self.sse
    }

    /// Last accepted position per user, maintained by the location guard.
    pub fn positions(&self) -> &DashMap<Uuid, GeoPosition> {
        &self.positions
    }
}

/// Shared state backed by the embedded memory store; used across service tests.
#[cfg(test)]
pub(crate) async fn memory_state(config: AppConfig) -> SharedState {
    use crate::dao::match_store::memory::MemoryMatchStore;

    let state = AppState::new(config);
    state
        .install_match_store(Arc::new(MemoryMatchStore::new()))
        .await;
    state
}
