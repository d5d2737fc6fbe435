//! Test harness for socket-level relay tests.
//!
//! Spawns a relay on an ephemeral localhost port and provides helpers that
//! wait for specific messages with a deadline instead of fixed sleeps.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use relay_client::RelayClient;
use relay_server::{registry::Registry, server::bind_ephemeral};
use relay_shared::{config::RelayConfig, net::ServerMsg};
use tokio::{sync::oneshot, task::JoinHandle};

/// Default wait for anything the relay should do promptly.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(2);

/// Installs a test tracing subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// A relay running in the background of a test.
pub struct TestRelay {
    pub cfg: RelayConfig,
    pub registry: Arc<Registry>,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestRelay {
    /// Binds an ephemeral port and starts serving.
    pub async fn spawn(cfg: RelayConfig) -> anyhow::Result<Self> {
        init_tracing();
        let (server, cfg) = bind_ephemeral(cfg).await?;
        let registry = server.registry();
        let (shutdown, stop) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async move {
            let _ = stop.await;
        }));
        Ok(Self {
            cfg,
            registry,
            shutdown,
            handle,
        })
    }

    /// Connects a new client (welcome already received).
    pub async fn client(&self) -> anyhow::Result<RelayClient> {
        RelayClient::connect(&self.cfg).await
    }

    /// Waits until the registry holds exactly `n` entities.
    pub async fn wait_for_players(&self, n: usize) -> anyhow::Result<()> {
        let deadline = Instant::now() + STEP_TIMEOUT;
        while self.registry.len() != n {
            if Instant::now() >= deadline {
                anyhow::bail!(
                    "expected {n} players, registry has {}",
                    self.registry.len()
                );
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(())
    }

    /// Stops the relay and waits for it to finish.
    pub async fn stop(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(());
        self.handle.await?
    }
}

/// Polls `client` until a message matching `pred` arrives. Non-matching
/// messages are still applied to the client's remote table.
pub async fn expect_msg<F>(client: &mut RelayClient, pred: F) -> anyhow::Result<ServerMsg>
where
    F: Fn(&ServerMsg) -> bool,
{
    let deadline = Instant::now() + STEP_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            anyhow::bail!("timed out waiting for message");
        }
        if let Some(msg) = client.poll(remaining).await? {
            if pred(&msg) {
                return Ok(msg);
            }
        }
    }
}

/// Fails if `client` receives anything within `window`.
pub async fn expect_silence(client: &mut RelayClient, window: Duration) -> anyhow::Result<()> {
    match client.poll(window).await? {
        Some(msg) => anyhow::bail!("expected silence, got {msg:?}"),
        None => Ok(()),
    }
}
