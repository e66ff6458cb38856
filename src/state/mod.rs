pub mod registry;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{
    config::AppConfig,
    dao::{membership::MembershipIndex, record_store::RecordStore, teamspace::TeamspaceRepository},
    error::ServiceError,
    services::{
        identity::AuthMode,
        notification_service::{Broadcaster, NotificationOutbox, Notifier, RetryPolicy},
        party_service::{LifecycleSettings, PartyLifecycle},
        user_state_service::UserStateAggregator,
    },
};

use self::registry::ConnectionRegistry;

/// Reference-counted application state handed to every handler.
pub type SharedState = Arc<AppState>;

/// Central application state: the installed record store, live observer sessions and the
/// collaborators wired into every lifecycle operation.
pub struct AppState {
    record_store: RwLock<Option<Arc<dyn RecordStore>>>,
    registry: Arc<ConnectionRegistry>,
    notifier: Notifier,
    config: Arc<AppConfig>,
    auth: AuthMode,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a record store is installed. Must be
    /// called from within a Tokio runtime since it starts the notification outbox.
    pub fn new(config: AppConfig, auth: AuthMode) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let outbox = NotificationOutbox::spawn(
            broadcaster.clone(),
            RetryPolicy::from(&config.notifications),
        );

        Arc::new(Self {
            record_store: RwLock::new(None),
            registry,
            notifier: Notifier::new(broadcaster, outbox),
            config: Arc::new(config),
            auth,
            degraded: degraded_tx,
        })
    }

    /// Obtain a handle to the current record store, if one is installed.
    pub async fn record_store(&self) -> Option<Arc<dyn RecordStore>> {
        let guard = self.record_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current record store, or [`ServiceError::Degraded`] when none is installed.
    pub async fn require_record_store(&self) -> Result<Arc<dyn RecordStore>, ServiceError> {
        self.record_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a record store implementation and leave degraded mode.
    pub async fn set_record_store(&self, store: Arc<dyn RecordStore>) {
        {
            let mut guard = self.record_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Lifecycle operations bound to the installed record store.
    pub async fn lifecycle(&self) -> Result<PartyLifecycle, ServiceError> {
        let (teamspaces, membership) = self.repositories().await?;
        Ok(PartyLifecycle::new(
            teamspaces,
            membership,
            self.notifier.clone(),
            LifecycleSettings::from(self.config.as_ref()),
        ))
    }

    /// User state lookups bound to the installed record store.
    pub async fn user_states(&self) -> Result<UserStateAggregator, ServiceError> {
        let (teamspaces, _) = self.repositories().await?;
        Ok(UserStateAggregator::new(
            teamspaces,
            self.config.operation_timeout,
        ))
    }

    async fn repositories(&self) -> Result<(TeamspaceRepository, MembershipIndex), ServiceError> {
        if self.is_degraded() {
            return Err(ServiceError::Degraded);
        }
        let store = self.require_record_store().await?;
        let ttl = self.config.teamspace_ttl;
        let teamspaces = TeamspaceRepository::new(store.clone(), ttl);
        let membership = MembershipIndex::new(store, teamspaces.clone(), ttl);
        Ok((teamspaces, membership))
    }

    /// Registry of live observer sessions.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Loaded configuration.
    pub fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    /// How requests are authenticated.
    pub fn auth(&self) -> &AuthMode {
        &self.auth
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }
}
