//! Peer session lifecycle management
//!
//! One long-lived peer session shared by every query. Queries take the lock
//! for their whole run, so they are served one at a time against the peer.

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use relay_core::config::PeerConfig;
use relay_core::{ConnectionError, ToolDescriptor};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::session::PeerSession;

/// Shared handle to the process-wide peer session
#[derive(Clone)]
pub struct SharedSession {
    inner: Arc<Mutex<PeerSession>>,
    closed: Arc<AtomicBool>,
}

impl SharedSession {
    /// Connect to the peer script. Nothing is retained on failure.
    pub async fn start(config: PeerConfig, script: &Path) -> Result<Self, ConnectionError> {
        let mut session = PeerSession::new(config);
        session.connect(script).await?;
        Ok(Self::from_session(session))
    }

    /// Wrap an already connected session
    pub fn from_session(session: PeerSession) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Exclusive access for the duration of one query
    pub async fn lock(&self) -> MutexGuard<'_, PeerSession> {
        self.inner.lock().await
    }

    /// The lock itself, for consumers that are generic over the peer type
    pub fn handle(&self) -> Arc<Mutex<PeerSession>> {
        Arc::clone(&self.inner)
    }

    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        self.inner
            .lock()
            .await
            .list_tools()
            .map(<[_]>::to_vec)
            .unwrap_or_default()
    }

    /// Close the peer. Only the first call does anything; returns whether it was this one.
    pub async fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Peer session already shut down");
            return false;
        }

        info!("Shutting down peer session");
        self.inner.lock().await.close().await;
        true
    }
}

/// Start a session, run `body` with it, and shut it down on every exit path of `body`
pub async fn with_session<F, Fut, T>(
    config: PeerConfig,
    script: &Path,
    body: F,
) -> anyhow::Result<T>
where
    F: FnOnce(SharedSession) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let session = SharedSession::start(config, script).await?;
    run_scoped(session, body).await
}

async fn run_scoped<F, Fut, T>(session: SharedSession, body: F) -> anyhow::Result<T>
where
    F: FnOnce(SharedSession) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let result = body(session.clone()).await;
    session.shutdown().await;
    result
}
