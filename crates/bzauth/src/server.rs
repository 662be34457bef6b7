//! `AuthServer` builder and server loop.
//!
//! This is the entry point for running the daemon. It ties together all
//! the layers: transport → protocol → dispatcher → tokens and directory.

use std::net::SocketAddr;
use std::sync::Arc;

use bzauth_directory::{Directory, DirectoryError, InMemoryDirectory, UserStore};
use bzauth_session::{CredentialLimits, KeyExchangeCipher, RsaKeyExchange, TokenManager};
use bzauth_tick::{TickConfig, TickScheduler};
use bzauth_transport::{TcpTransport, Transport};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::AuthdError;
use crate::config::{AuthdConfig, NetworkConfig};
use crate::handler::serve_connection;

/// Shared server state passed to each connection task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks. The token
/// table is the only mutable part and sits behind a `Mutex`.
pub(crate) struct ServerState<D, C> {
    pub(crate) tokens: Mutex<TokenManager>,
    pub(crate) store: UserStore<D>,
    pub(crate) cipher: C,
    pub(crate) limits: CredentialLimits,
    pub(crate) network: NetworkConfig,
}

impl<D, C> ServerState<D, C> {
    pub(crate) fn new(
        store: UserStore<D>,
        cipher: C,
        tokens: TokenManager,
        limits: CredentialLimits,
        network: NetworkConfig,
    ) -> Self {
        Self {
            tokens: Mutex::new(tokens),
            store,
            cipher,
            limits,
            network,
        }
    }
}

/// Builder for configuring and starting the daemon.
///
/// # Example
///
/// ```rust,ignore
/// use bzauth::prelude::*;
///
/// let server = AuthServerBuilder::new()
///     .bind("127.0.0.1:5156")
///     .build(InMemoryDirectory::new(), cipher)
///     .await?;
/// server.run().await
/// ```
pub struct AuthServerBuilder {
    config: AuthdConfig,
}

impl AuthServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: AuthdConfig::default(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: AuthdConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.network.listen_addr = addr.to_string();
        self
    }

    /// Validates the configuration, prepares the directory, and binds.
    ///
    /// The directory gets its uid counter (if missing) and every
    /// configured group. Groups that already exist are left alone.
    pub async fn build<D, C>(self, directory: D, cipher: C) -> Result<AuthServer<D, C>, AuthdError>
    where
        D: Directory,
        C: KeyExchangeCipher,
    {
        let config = self.config;
        config.validate()?;

        let store = UserStore::new(directory, config.directory.store_config()?);
        store.ensure_counter().await?;
        for group in &config.directory.groups {
            match store.create_group(&group.name, &group.members).await {
                Ok(()) => tracing::info!(group = %group.name, "group seeded"),
                Err(DirectoryError::AlreadyExists(_)) => {
                    tracing::debug!(group = %group.name, "group already present");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let transport = TcpTransport::bind(&config.network.listen_addr).await?;

        let state = Arc::new(ServerState::new(
            store,
            cipher,
            TokenManager::new(config.tokens.lifetime()),
            config.credentials.limits(),
            config.network,
        ));

        Ok(AuthServer {
            transport,
            state,
            tick: config.tokens.tick_config(),
        })
    }

    /// Builds with an in-memory directory and a freshly generated RSA key.
    pub async fn build_with_defaults(
        self,
    ) -> Result<AuthServer<InMemoryDirectory, RsaKeyExchange>, AuthdError> {
        let cipher = RsaKeyExchange::generate(self.config.crypto.rsa_bits)?;
        self.build(InMemoryDirectory::new(), cipher).await
    }
}

impl Default for AuthServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Aborts the housekeeping task when the server future is dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A bound authentication daemon.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct AuthServer<D, C> {
    transport: TcpTransport,
    state: Arc<ServerState<D, C>>,
    tick: TickConfig,
}

impl<D, C> AuthServer<D, C>
where
    D: Directory,
    C: KeyExchangeCipher,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, AuthdError> {
        Ok(self.transport.local_addr()?)
    }

    /// The user store, for seeding accounts before `run`.
    pub fn store(&self) -> &UserStore<D> {
        &self.state.store
    }

    /// Runs the accept loop.
    ///
    /// Spawns one task per connection plus a housekeeping task that
    /// expires tokens on every tick. Runs until the returned future is
    /// dropped.
    pub async fn run(mut self) -> Result<(), AuthdError> {
        tracing::info!(addr = ?self.transport.local_addr().ok(), "bzauthd running");

        let _housekeeping = AbortOnDrop(tokio::spawn(expire_tokens(
            Arc::clone(&self.state),
            self.tick.clone(),
        )));

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}

async fn expire_tokens<D, C>(state: Arc<ServerState<D, C>>, tick: TickConfig)
where
    D: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    let mut scheduler = TickScheduler::new(tick);
    loop {
        let info = scheduler.wait_for_tick().await;
        let expired = state.tokens.lock().await.tick(info.now);
        if expired > 0 {
            tracing::debug!(tick = info.tick, expired, "tokens expired");
        }
        scheduler.record_tick_end();
    }
}
