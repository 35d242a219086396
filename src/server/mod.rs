//! Lottery server: accepts agency connections, stores bets and runs the
//! draw once every expected agency has notified.
//!
//! One task serves each connection. Handlers share an [`AgencyRegistry`]
//! behind a single mutex and a one-shot [`LotteryBarrier`].
//!
//! Connections have no idle timeout: a stalled client keeps its task alive
//! until it disconnects or the server shuts down.
//!
//! # Example
//!
//! ```ignore
//! use lottery_wire::config::ServerConfig;
//! use lottery_wire::events::TracingSink;
//! use lottery_wire::server::LotteryServer;
//!
//! let server = LotteryServer::bind(ServerConfig::load()?, TracingSink::shared()).await?;
//! server.run(async { tokio::signal::ctrl_c().await.ok(); }).await?;
//! ```

mod barrier;
mod handler;
mod registry;

pub use barrier::{Arrival, LotteryBarrier, LotteryState};
pub use registry::AgencyRegistry;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::events::SharedSink;
use handler::{handle_connection, Shared};

pub struct LotteryServer {
    listener: TcpListener,
    shared: Arc<Shared>,
}

/// Read-only view of a running server.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
}

impl ServerHandle {
    pub fn state(&self) -> LotteryState {
        self.shared.barrier.state()
    }

    /// Times the draw has run.
    pub fn draws(&self) -> usize {
        self.shared.barrier.draws()
    }

    pub fn bet_count(&self, agency: u32) -> usize {
        self.shared.registry.bet_count(agency)
    }

    pub fn is_notified(&self, agency: u32) -> bool {
        self.shared.registry.is_notified(agency)
    }
}

impl LotteryServer {
    /// Validate `config` and bind its listen address.
    pub async fn bind(config: ServerConfig, events: SharedSink) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(&config.listen_address).await?;
        let shared = Arc::new(Shared::new(config, events)?);

        tracing::info!(
            address = %listener.local_addr()?,
            expected = shared.config.expected_agencies,
            "Lottery server listening"
        );

        Ok(Self { listener, shared })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> LotteryState {
        self.shared.barrier.state()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Open connections are aborted on shutdown.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }

                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!("Accept failed: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(%peer, "set_nodelay failed: {}", e);
                    }

                    let shared = Arc::clone(&self.shared);
                    let span = tracing::info_span!("connection", %peer);
                    connections.spawn(
                        async move {
                            if let Err(e) = handle_connection(stream, shared).await {
                                tracing::warn!("Connection ended with error: {}", e);
                            }
                        }
                        .instrument(span),
                    );
                }

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!("Connection task panicked: {}", e);
                        }
                    }
                }
            }
        }

        connections.shutdown().await;
        Ok(())
    }
}
