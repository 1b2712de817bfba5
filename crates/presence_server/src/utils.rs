//! Utility functions for building server instances.

use crate::{
    auth::StaticDirectory,
    chat::InMemoryChatStore,
    config::ServerConfig,
    error::ServerError,
    server::{Collaborators, PresenceServer},
};
use std::sync::Arc;

/// Collaborators backed by a static directory and an in-memory chat store.
///
/// The directory serves as both credential verifier and membership
/// authorizer.
pub fn directory_collaborators(directory: StaticDirectory, config: &ServerConfig) -> Collaborators {
    let directory = Arc::new(directory);
    Collaborators {
        verifier: directory.clone(),
        authorizer: directory,
        chat_store: Arc::new(InMemoryChatStore::new(config.chat.history_limit)),
    }
}

/// Creates a new presence server with custom configuration and a static
/// user directory.
///
/// # Example
///
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use presence_server::{create_server_with_config, ServerConfig, StaticDirectory};
///
/// let config = ServerConfig {
///     bind_address: "0.0.0.0:9000".parse()?,
///     max_connections: 5000,
///     ..Default::default()
/// };
///
/// let server = create_server_with_config(config, StaticDirectory::default()).await?;
/// server.start().await?;
/// # Ok(())
/// # }
/// ```
pub async fn create_server_with_config(
    config: ServerConfig,
    directory: StaticDirectory,
) -> Result<PresenceServer, ServerError> {
    let collaborators = directory_collaborators(directory, &config);
    PresenceServer::new(config, collaborators).await
}
