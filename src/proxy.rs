//! The embedder-facing proxy surface: accepting client connections and
//! shutting the fleet of sessions down.

use crate::{
    client::ClientListener,
    opts::Opts,
    server::Discovery,
    session::{Registry, Session},
    transport::Transport,
};
use anyhow::Context as _;
use std::sync::{Arc, Mutex};
use tokio::task;

/// The proxy: creates a [`Session`] for every accepted client connection
/// and tracks them in a shared [`Registry`].
pub struct Proxy {
    discovery: Arc<dyn Discovery>,
    transport: Arc<dyn Transport>,
    registry: Arc<Registry>,
    opts: Opts,
    listener: Mutex<Option<Arc<dyn ClientListener>>>,
}

impl Proxy {
    pub fn new(
        discovery: Arc<dyn Discovery>,
        opts: Opts,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            discovery,
            transport,
            registry: Arc::new(Registry::new()),
            opts,
            listener: Mutex::new(None),
        }
    }

    /// Installs the listener whose connections [`Proxy::accept`] consumes.
    pub fn listen(&self, listener: Arc<dyn ClientListener>) {
        tracing::info!(addr = %listener.addr(), "started listening");
        *self.listener.lock().unwrap() = Some(listener);
    }

    /// Accepts one incoming client connection and creates a session for it.
    /// Call in a loop. With `auto_login` enabled the session logs itself in
    /// on a background task and disconnects the client on failure.
    pub async fn accept(&self) -> anyhow::Result<Arc<Session>> {
        let listener = self
            .listener
            .lock()
            .unwrap()
            .clone()
            .context("no listener installed")?;
        let client = listener.accept().await?;

        let username = client.identity().display_name;
        let session = Session::new(
            client,
            Arc::clone(&self.registry),
            Arc::clone(&self.discovery),
            self.opts.clone(),
            Arc::clone(&self.transport),
        );
        if self.opts.auto_login {
            let session = Arc::clone(&session);
            let username = username.clone();
            task::spawn(async move {
                if let Err(err) = session.login().await {
                    tracing::error!(%username, "failed to login session: {err:#}");
                    let _ = session.disconnect(&format!("{err:#}")).await;
                }
            });
        }
        tracing::info!(%username, "accepted session");
        Ok(session)
    }

    pub fn discovery(&self) -> &Arc<dyn Discovery> {
        &self.discovery
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    /// Disconnects every session with the configured shutdown message and
    /// closes the listener.
    pub async fn close(&self) -> anyhow::Result<()> {
        for session in self.registry.sessions() {
            let _ = session.disconnect(&self.opts.shutdown_message).await;
        }
        let listener = self.listener.lock().unwrap().take();
        if let Some(listener) = listener {
            listener.close().await?;
        }
        Ok(())
    }
}
