use std::{collections::HashMap, sync::Arc};

use crate::{config::Settings, domain::GatewayId, error::GatewayError};

use super::{EasypaisaGateway, JazzCashGateway, PaymentGateway, StripeGateway};

/// Adapters keyed by gateway id. Built once at startup.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<GatewayId, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let gateways = &settings.gateways;
        let base_url = &settings.server.base_url;

        Self::new()
            .with(Arc::new(JazzCashGateway::new(gateways.jazzcash.clone(), base_url)))
            .with(Arc::new(EasypaisaGateway::new(gateways.easypaisa.clone(), base_url)))
            .with(Arc::new(StripeGateway::new(gateways.stripe.clone(), gateways.timeout_secs)))
    }

    /// Registers an adapter, replacing any previous one for the same id.
    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.id(), gateway);
        self
    }

    pub fn get(&self, id: GatewayId) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
        self.gateways
            .get(&id)
            .cloned()
            .ok_or_else(|| GatewayError::NotConfigured(id.to_string()))
    }
}
