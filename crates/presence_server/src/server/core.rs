//! Core presence server implementation.
//!
//! This module contains the main `PresenceServer` struct, which assembles the
//! presence backend, broadcaster, router, chat relay and lifecycle manager
//! and runs the WebSocket accept loop.

use crate::{
    auth::{CredentialVerifier, MembershipAuthorizer, SessionGate},
    chat::{ChatRelay, ChatStore},
    config::{PresenceBackend, ServerConfig},
    connection::ConnectionManager,
    error::ServerError,
    health::{ServerStats, StatsSnapshot},
    lifecycle::LifecycleManager,
    presence::{MemoryPresenceStore, PresenceStore},
    routing::{GroupBroadcaster, LocalBroadcaster, RoomRouter},
    server::handlers::{handle_connection, ConnectionContext},
    shutdown::ShutdownState,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// External collaborators the server is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub verifier: Arc<dyn CredentialVerifier>,
    pub authorizer: Arc<dyn MembershipAuthorizer>,
    pub chat_store: Arc<dyn ChatStore>,
}

/// The core presence server structure.
///
/// # Architecture
///
/// * **Session Gate**: authenticates each upgrade exactly once
/// * **Connection Management**: per-connection mailboxes on this node
/// * **Presence Store**: memory, or Redis behind a circuit breaker
/// * **Broadcaster**: local groups, or a Redis pub/sub backplane
/// * **Lifecycle Manager**: turns client events into router and chat calls
pub struct PresenceServer {
    /// Server configuration settings
    config: ServerConfig,

    gate: SessionGate,

    lifecycle: Arc<LifecycleManager>,

    /// Shutdown state used by [`PresenceServer::start`]
    shutdown: ShutdownState,

    #[cfg(feature = "redis-backend")]
    backplane: Option<Arc<crate::routing::RedisBackplane>>,
}

impl PresenceServer {
    /// Creates a new presence server with the specified configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration parameters for server behavior
    /// * `collaborators` - Credential verifier, membership authorizer and chat store
    ///
    /// # Component Initialization
    ///
    /// 1. Validates the configuration
    /// 2. Selects and connects the presence backend
    /// 3. Builds the broadcaster, router, chat relay and lifecycle manager
    ///
    /// # Returns
    ///
    /// A server ready to be started, or `ServerError::Config` if the
    /// configuration is invalid or asks for a backend this build lacks.
    pub async fn new(config: ServerConfig, collaborators: Collaborators) -> Result<Self, ServerError> {
        config.validate().map_err(ServerError::Config)?;

        let connections = Arc::new(ConnectionManager::new());
        let local = Arc::new(LocalBroadcaster::new(connections.clone()));

        let presence: Arc<dyn PresenceStore> = match config.presence.backend {
            PresenceBackend::Memory => Arc::new(MemoryPresenceStore::new()),
            #[cfg(feature = "redis-backend")]
            PresenceBackend::Redis => Self::redis_presence(&config).await,
            #[cfg(not(feature = "redis-backend"))]
            PresenceBackend::Redis => {
                return Err(ServerError::Config(
                    "presence backend 'redis' requires the redis-backend feature".to_string(),
                ))
            }
        };
        info!("🗄️ Presence backend: {}", presence.backend_name());

        #[cfg(feature = "redis-backend")]
        let backplane = Self::connect_backplane(&config, &local).await;
        #[cfg(feature = "redis-backend")]
        let broadcaster: Arc<dyn GroupBroadcaster> = match &backplane {
            Some(backplane) => backplane.clone(),
            None => local.clone(),
        };
        #[cfg(not(feature = "redis-backend"))]
        let broadcaster: Arc<dyn GroupBroadcaster> = local.clone();

        let catalog = Arc::new(config.catalog());
        info!("🗺️ Loaded geometry for {} space(s)", catalog.space_count());

        let router = Arc::new(RoomRouter::new(presence, broadcaster.clone(), catalog));
        let chat = Arc::new(ChatRelay::new(
            collaborators.authorizer,
            collaborators.chat_store,
            broadcaster,
            config.chat.max_content_chars,
        ));
        let lifecycle = Arc::new(LifecycleManager::new(
            connections,
            router,
            chat,
            Arc::new(ServerStats::default()),
        ));

        Ok(Self {
            config,
            gate: SessionGate::new(collaborators.verifier),
            lifecycle,
            shutdown: ShutdownState::new(),
            #[cfg(feature = "redis-backend")]
            backplane,
        })
    }

    #[cfg(feature = "redis-backend")]
    async fn redis_presence(config: &ServerConfig) -> Arc<dyn PresenceStore> {
        use crate::presence::{FallbackPresenceStore, RedisPresenceStore};

        let presence = &config.presence;
        match RedisPresenceStore::connect(&presence.redis_url, &presence.key_prefix, presence.key_ttl).await {
            Ok(store) => Arc::new(FallbackPresenceStore::new(Arc::new(store), presence.breaker.clone())),
            Err(e) => {
                warn!("⚠️ Redis unavailable ({}), running with process-local presence", e);
                Arc::new(MemoryPresenceStore::new())
            }
        }
    }

    #[cfg(feature = "redis-backend")]
    async fn connect_backplane(
        config: &ServerConfig,
        local: &Arc<LocalBroadcaster>,
    ) -> Option<Arc<crate::routing::RedisBackplane>> {
        if config.presence.backend != PresenceBackend::Redis {
            return None;
        }
        match crate::routing::RedisBackplane::connect(
            &config.presence.redis_url,
            &config.presence.key_prefix,
            local.clone(),
        )
        .await
        {
            Ok(backplane) => Some(Arc::new(backplane)),
            Err(e) => {
                warn!("⚠️ Backplane unavailable ({}), broadcasts stay on this node", e);
                None
            }
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    /// Returns the number of currently authenticated connections.
    pub fn connection_count(&self) -> usize {
        self.lifecycle.connections().connection_count()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.lifecycle.stats().snapshot(self.connection_count())
    }

    /// Initiates shutdown of a server started with [`PresenceServer::start`].
    pub fn shutdown(&self) {
        self.shutdown.initiate_shutdown();
    }

    /// Starts the server and runs until [`PresenceServer::shutdown`] is called.
    pub async fn start(&self) -> Result<(), ServerError> {
        self.start_internal(self.shutdown.clone()).await
    }

    /// Starts the presence server and begins accepting connections with
    /// graceful shutdown support.
    ///
    /// # Startup Sequence
    ///
    /// 1. Bind the TCP listener
    /// 2. Start the backplane subscriber when one is configured
    /// 3. Accept connections until shutdown is initiated
    /// 4. Wait for connection tasks to finish their cleanup
    ///
    /// # Returns
    ///
    /// `Ok(())` if the server started and stopped cleanly, or a `ServerError`
    /// if the listener could not be bound.
    pub async fn start_with_shutdown_state(&self, shutdown_state: ShutdownState) -> Result<(), ServerError> {
        self.start_internal(shutdown_state).await
    }

    async fn start_internal(&self, shutdown_state: ShutdownState) -> Result<(), ServerError> {
        info!("🚀 Starting presence server on {}", self.config.bind_address);
        let listener = TcpListener::bind(self.config.bind_address)
            .await
            .map_err(|e| ServerError::Network(format!("Failed to bind {}: {e}", self.config.bind_address)))?;

        #[cfg(feature = "redis-backend")]
        let subscriber = self
            .backplane
            .as_ref()
            .map(|backplane| backplane.spawn_subscriber(shutdown_state.clone()));

        let max_connections = self.config.max_connections.min(Semaphore::MAX_PERMITS);
        let slots = Arc::new(Semaphore::new(max_connections));
        let context = Arc::new(ConnectionContext {
            gate: self.gate.clone(),
            lifecycle: self.lifecycle.clone(),
            security: self.config.security.clone(),
            idle_timeout: self.config.idle_timeout(),
            shutdown: shutdown_state.clone(),
        });

        info!("🎉 Accepting connections (max {})", max_connections);
        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown_state.wait_for_shutdown() => {
                    info!("🛑 Accept loop stopping - shutdown initiated");
                    break;
                }
            };

            let (stream, addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let Ok(permit) = slots.clone().try_acquire_owned() else {
                warn!("🚧 Connection limit reached, refusing {}", addr);
                self.lifecycle.stats().connection_rejected();
                drop(stream);
                continue;
            };

            let context = context.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, context).await {
                    debug!("Connection {} ended with error: {}", addr, e);
                }
                drop(permit);
            });
        }

        // Server shutdown cleanup
        info!("🧹 Waiting for connections to close...");
        let all_slots = u32::try_from(max_connections).unwrap_or(u32::MAX);
        if tokio::time::timeout(Duration::from_secs(5), slots.acquire_many(all_slots))
            .await
            .is_err()
        {
            warn!("⏰ {} connection(s) still open after grace period", self.connection_count());
        }

        #[cfg(feature = "redis-backend")]
        let _ = subscriber.map(|task| task.abort());

        info!("✅ Presence server stopped");
        Ok(())
    }
}
