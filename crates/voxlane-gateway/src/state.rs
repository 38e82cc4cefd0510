//! Gateway shared state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use voxlane_core::config::Config;
use voxlane_core::error::Result;

use crate::auth::TokenVerifier;
use crate::capabilities::Capabilities;

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub capabilities: Capabilities,
    pub auth: TokenVerifier,
    pub connections: RwLock<HashMap<String, ConnectionInfo>>,
    #[cfg(feature = "metrics")]
    pub metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

/// Bookkeeping for one open connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub conn_id: String,
    pub connected_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(config: Arc<Config>, capabilities: Capabilities, auth: TokenVerifier) -> Self {
        Self {
            config,
            capabilities,
            auth,
            connections: RwLock::new(HashMap::new()),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Resolve providers and auth from config.
    pub fn from_config(config: Config) -> Result<Self> {
        let capabilities = Capabilities::from_config(&config)?;
        let auth = TokenVerifier::from_config(&config.auth())?;
        Ok(Self::new(Arc::new(config), capabilities, auth))
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub(crate) async fn register(&self, conn_id: &str) {
        self.connections.write().await.insert(
            conn_id.to_string(),
            ConnectionInfo {
                conn_id: conn_id.to_string(),
                connected_at: Utc::now(),
            },
        );
    }

    pub(crate) async fn unregister(&self, conn_id: &str) -> Option<ConnectionInfo> {
        self.connections.write().await.remove(conn_id)
    }
}
