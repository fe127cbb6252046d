use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::RelayError;
use crate::observability::token_counter::{HeuristicEstimator, TokenEstimator};
use crate::transport::HttpTransport;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub transport: HttpTransport,
    pub estimator: Arc<dyn TokenEstimator>,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: AppConfig,
        transport: HttpTransport,
        estimator: Arc<dyn TokenEstimator>,
    ) -> Self {
        Self {
            config,
            transport,
            estimator,
        }
    }

    /// Build state from config with the default transport and heuristic estimator.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the HTTP client cannot be built.
    pub fn from_config(config: AppConfig) -> Result<Self, RelayError> {
        let transport = HttpTransport::new(&config.server, config.upstream.proxy.as_deref())?;
        Ok(Self::new(config, transport, Arc::new(HeuristicEstimator)))
    }
}
