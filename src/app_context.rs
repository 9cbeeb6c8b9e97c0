//! Shared per-process components.

use crate::{
    config::GatewayConfig, data_connector::SharedResponseStorage, providers::ModelRegistry,
};

/// Read-mostly application state handed to every handler.
pub struct AppContext {
    pub config: GatewayConfig,
    pub client: reqwest::Client,
    pub registry: ModelRegistry,
    pub response_storage: SharedResponseStorage,
}

impl AppContext {
    pub fn new(
        config: GatewayConfig,
        client: reqwest::Client,
        registry: ModelRegistry,
        response_storage: SharedResponseStorage,
    ) -> Self {
        Self {
            config,
            client,
            registry,
            response_storage,
        }
    }
}
