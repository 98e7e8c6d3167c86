use crate::client::ClientConn;
use async_trait::async_trait;

/// Determines which downstream server a player should be connected to.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Determines the primary server.
    async fn discover(&self, client: &dyn ClientConn) -> anyhow::Result<String>;
    /// Determines the fallback server, used when the current server dies.
    async fn discover_fallback(&self, client: &dyn ClientConn) -> anyhow::Result<String>;
}

/// A [`Discovery`] with static server addresses.
#[derive(Debug, Clone)]
pub struct StaticDiscovery {
    server: String,
    fallback_server: String,
}

impl StaticDiscovery {
    pub fn new(server: impl Into<String>, fallback_server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            fallback_server: fallback_server.into(),
        }
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn discover(&self, _client: &dyn ClientConn) -> anyhow::Result<String> {
        Ok(self.server.clone())
    }

    async fn discover_fallback(&self, _client: &dyn ClientConn) -> anyhow::Result<String> {
        Ok(self.fallback_server.clone())
    }
}
