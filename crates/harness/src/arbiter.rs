//! Shared browser arbitration
//!
//! Many test worker processes want the same browser. Whoever reads the
//! shared [`EndpointStore`](crate::store::EndpointStore) first claims the
//! slot by writing a `starting` marker, launches a detached browser, then
//! publishes the endpoint; everyone else connects to the published
//! endpoint. All transitions are compare-and-set, so two processes that
//! race to the same slot resolve deterministically: one wins, the other
//! observes the winner's value and either connects to it or retries.

use crate::store::{CasOutcome, EndpointState, EndpointStore};
use async_trait::async_trait;
use placidtest_common::{ArbitrationKey, Result};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Starts a browser and reports its websocket endpoint.
#[async_trait]
pub trait LaunchBrowser: Send + Sync {
    async fn launch(&self, key: ArbitrationKey) -> Result<String>;
}

/// Attaches to a running browser by endpoint.
#[async_trait]
pub trait Connect: Send + Sync {
    type Conn: Send;

    async fn connect(&self, endpoint: &str) -> Result<Self::Conn>;

    /// Terminate the browser behind `endpoint`. Used when this process
    /// launched a browser but lost the race to publish it.
    async fn kill(&self, endpoint: &str) -> Result<()>;
}

pub struct ArbiterConfig {
    /// How often to re-read the store while another process is starting.
    pub poll_interval: Duration,
    /// How long to wait on a `starting` marker before assuming the
    /// process that wrote it died mid-launch.
    pub poll_budget: Duration,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            poll_budget: Duration::from_secs(5),
        }
    }
}

pub struct EndpointArbiter<L, C> {
    store: EndpointStore,
    launcher: L,
    connector: C,
    config: ArbiterConfig,
}

impl<L: LaunchBrowser, C: Connect> EndpointArbiter<L, C> {
    pub fn new(store: EndpointStore, launcher: L, connector: C) -> Self {
        Self::with_config(store, launcher, connector, ArbiterConfig::default())
    }

    pub fn with_config(store: EndpointStore, launcher: L, connector: C, config: ArbiterConfig) -> Self {
        Self {
            store,
            launcher,
            connector,
            config,
        }
    }

    /// Obtain a connection to the shared browser for `key`, launching one
    /// if nobody else has.
    pub async fn acquire(&self, key: ArbitrationKey) -> Result<C::Conn> {
        let mut observed = self.settle(&key).await;
        loop {
            if let EndpointState::Endpoint(endpoint) = &observed {
                match self.connector.connect(endpoint).await {
                    Ok(conn) => {
                        debug!(%key, %endpoint, "connected to shared browser");
                        return Ok(conn);
                    }
                    Err(err) => {
                        // Stale endpoint: the browser is gone but its
                        // record survived. Fall through and try to claim.
                        warn!(%key, %endpoint, %err, "recorded endpoint unreachable, reclaiming");
                    }
                }
            }

            match self
                .store
                .try_compare_and_set(&key, &observed, EndpointState::Starting)
                .await?
            {
                CasOutcome::Won => {}
                CasOutcome::Lost(_) => {
                    observed = self.settle(&key).await;
                    continue;
                }
            }

            let endpoint = match self.launcher.launch(key).await {
                Ok(endpoint) => endpoint,
                Err(err) => {
                    // Give the slot back so another process can try.
                    self.store
                        .try_compare_and_set(&key, &EndpointState::Starting, EndpointState::Absent)
                        .await?;
                    return Err(err);
                }
            };

            match self
                .store
                .try_compare_and_set(
                    &key,
                    &EndpointState::Starting,
                    EndpointState::Endpoint(endpoint.clone()),
                )
                .await?
            {
                CasOutcome::Won => {
                    info!(%key, %endpoint, "launched shared browser");
                    return self.connector.connect(&endpoint).await;
                }
                CasOutcome::Lost(current) => {
                    // Someone published before us; our browser is an
                    // orphan nobody will ever find. Put it down and use
                    // theirs.
                    warn!(%key, %endpoint, "lost publish race, discarding our browser");
                    if let Err(err) = self.connector.kill(&endpoint).await {
                        warn!(%endpoint, %err, "failed to kill superseded browser");
                    }
                    observed = match current {
                        EndpointState::Starting => self.settle(&key).await,
                        other => other,
                    };
                }
            }
        }
    }

    /// Read the slot, waiting out a `starting` marker. If the marker
    /// outlives the poll budget the writer is presumed dead and the
    /// marker itself is returned, so the caller's claim against it wins.
    async fn settle(&self, key: &ArbitrationKey) -> EndpointState {
        let deadline = Instant::now() + self.config.poll_budget;
        loop {
            let state = self.store.read(key).await;
            if state != EndpointState::Starting {
                return state;
            }
            if Instant::now() >= deadline {
                warn!(%key, "browser stuck in starting state, taking over");
                return EndpointState::Starting;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

impl<L, C> EndpointArbiter<L, C> {
    pub fn store(&self) -> &EndpointStore {
        &self.store
    }
}
