//! Gateway instance bound to a temporary credential store

use std::net::SocketAddr;
use std::sync::Arc;

use gateway_auth::{Credential, CredentialStore};
use gateway_llm::{GatewayState, Registry, gateway_router};
use tokio_util::sync::CancellationToken;

pub struct TestServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    _store_dir: tempfile::TempDir,
}

impl TestServer {
    /// Start a gateway whose store holds `credentials` and whose named
    /// providers are pointed at override bases (the mock upstream)
    pub async fn start(credentials: Vec<(&str, Credential)>, overrides: Vec<(&str, String)>) -> anyhow::Result<Self> {
        let store_dir = tempfile::tempdir()?;
        let store = Arc::new(CredentialStore::load_from(store_dir.path().join("auth.json")));

        for (provider, credential) in credentials {
            store
                .put(provider, credential)
                .await
                .map_err(|e| anyhow::anyhow!("seed credential failed: {e}"))?;
        }

        let mut registry = Registry::new(store);
        for (provider, base) in overrides {
            registry = registry.with_base_override(provider, url::Url::parse(&base)?);
        }

        let app = gateway_router(GatewayState::new(Arc::new(registry)));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    token.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self {
            addr,
            shutdown,
            _store_dir: store_dir,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::new()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
