/// Per-question countdown.
pub mod countdown;
mod sse;
/// Phase gate shared by both engines.
pub mod state_machine;
/// Store writes bound to phase transitions.
pub mod transitions;

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    bus::ChangeBus,
    config::AppConfig,
    dao::{repository::SessionRepository, session_store::SessionStore},
    dto::session::InstanceRole,
    error::ServiceError,
    services::{
        instance::{EngineDeps, InstanceHandle},
        session_code::{CodeGenerator, RandomCodeGenerator},
    },
};

pub use self::sse::SseHub;
pub use self::state_machine::{AbortError, ApplyError, Plan, PlanError, PlanId, Snapshot};

/// Handle to the application state shared across handlers.
pub type SharedState = Arc<AppState>;

/// Central application state: the shared store and bus, plus the registry of
/// live instances.
pub struct AppState {
    config: Arc<AppConfig>,
    store: Arc<dyn SessionStore>,
    bus: ChangeBus,
    codes: Arc<dyn CodeGenerator>,
    instances: DashMap<Uuid, InstanceHandle>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(config: AppConfig, store: Arc<dyn SessionStore>, bus: ChangeBus) -> SharedState {
        Self::with_code_generator(config, store, bus, Arc::new(RandomCodeGenerator))
    }

    /// Same as [`AppState::new`] with a custom source of join codes.
    pub fn with_code_generator(
        config: AppConfig,
        store: Arc<dyn SessionStore>,
        bus: ChangeBus,
        codes: Arc<dyn CodeGenerator>,
    ) -> SharedState {
        Arc::new(Self {
            config: Arc::new(config),
            store,
            bus,
            codes,
            instances: DashMap::new(),
        })
    }

    /// Session store shared by every instance.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Whether the session store currently fails its health check.
    pub async fn is_degraded(&self) -> bool {
        self.store.health_check().await.is_err()
    }

    fn engine_deps(&self) -> EngineDeps {
        EngineDeps {
            repo: SessionRepository::new(self.store.clone()),
            bus: self.bus.clone(),
            config: self.config.clone(),
            codes: self.codes.clone(),
        }
    }

    /// Spawn a new instance and register it.
    pub fn open_instance(&self, role: InstanceRole) -> InstanceHandle {
        let handle = InstanceHandle::spawn(role, self.engine_deps());
        self.instances.insert(handle.id(), handle.clone());
        info!(instance_id = %handle.id(), role = ?role, open = self.instances.len(), "instance opened");
        handle
    }

    /// Look up a live instance.
    pub fn instance(&self, id: Uuid) -> Result<InstanceHandle, ServiceError> {
        let handle = self
            .instances
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ServiceError::NotFound(format!("instance {id}")))?;
        if handle.is_closed() {
            self.instances.remove(&id);
            return Err(ServiceError::InstanceClosed);
        }
        Ok(handle)
    }

    /// Stop an instance and forget it.
    pub async fn close_instance(&self, id: Uuid) -> Result<(), ServiceError> {
        let (_, handle) = self
            .instances
            .remove(&id)
            .ok_or_else(|| ServiceError::NotFound(format!("instance {id}")))?;
        handle.shutdown().await;
        info!(
            instance_id = %id,
            open = self.instances.len(),
            bus_subscribers = self.bus.subscriber_count(),
            "instance closed"
        );
        Ok(())
    }

    /// Stop every instance, used on server shutdown.
    pub async fn close_all(&self) {
        let ids: Vec<Uuid> = self.instances.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Err(err) = self.close_instance(id).await {
                warn!(instance_id = %id, error = %err, "failed to close instance");
            }
        }
    }

    /// Number of registered instances.
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}
