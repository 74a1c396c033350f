//! Payment gateway adapters.
//!
//! Every provider is exposed through [`PaymentGateway`]: start a charge,
//! authenticate an inbound callback, and turn that callback into a
//! provider-neutral [`GatewayEvent`]. Adapters never touch the ledger;
//! the reconciler owns all state transitions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use axum::body::Bytes;
use uuid::Uuid;

use crate::{domain::GatewayId, error::GatewayError};

pub mod easypaisa;
#[cfg(any(test, feature = "test-utils"))]
pub mod fake;
pub mod jazzcash;
pub mod registry;
pub mod signing;
pub mod stripe_client;

pub use easypaisa::EasypaisaGateway;
pub use jazzcash::JazzCashGateway;
pub use registry::GatewayRegistry;
pub use stripe_client::StripeGateway;

/// Everything an adapter needs to start a charge.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub payment_id: Uuid,
    pub user_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    /// Where the provider should send the payer afterwards. Adapters fall
    /// back to their configured return URL when absent.
    pub return_target: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeInitiation {
    /// Provider reference used to correlate callbacks with the payment.
    pub reference: String,
    pub redirect_target: String,
}

/// An inbound callback exactly as the provider delivered it.
#[derive(Debug, Clone, Default)]
pub struct RawCallback {
    pub query: BTreeMap<String, String>,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub signature_header: Option<String>,
}

impl RawCallback {
    pub fn from_params(params: BTreeMap<String, String>) -> Self {
        Self {
            query: params,
            ..Default::default()
        }
    }

    /// Flat key/value view used by the wallet gateways: query string merged
    /// with a form-encoded or flat JSON body. Body values win on collision.
    pub fn wallet_params(&self) -> BTreeMap<String, String> {
        let mut params = self.query.clone();
        if self.body.is_empty() {
            return params;
        }

        let is_json = self
            .content_type
            .as_deref()
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false);

        if is_json {
            if let Ok(serde_json::Value::Object(map)) = serde_json::from_slice(&self.body) {
                for (key, value) in map {
                    let value = match value {
                        serde_json::Value::String(s) => s,
                        serde_json::Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    params.insert(key, value);
                }
            }
        } else if let Ok(pairs) = serde_urlencoded::from_bytes::<Vec<(String, String)>>(&self.body) {
            params.extend(pairs);
        }

        params
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    Success,
    Failure,
}

/// Provider-neutral view of a verified callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEvent {
    pub reference: String,
    pub outcome: CallbackOutcome,
    pub provider_amount_minor: Option<i64>,
    pub provider_transaction_id: Option<String>,
    pub failure_detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    Event(GatewayEvent),
    /// Authentic, but not an event that moves a payment (e.g. an
    /// informational webhook type).
    Ignored(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn id(&self) -> GatewayId;

    async fn initiate(&self, request: &ChargeRequest) -> Result<ChargeInitiation, GatewayError>;

    /// Authenticates the callback. Must be called before `normalize`.
    fn verify(&self, callback: &RawCallback) -> bool;

    fn normalize(&self, callback: &RawCallback) -> Result<Normalized, GatewayError>;
}

/// Provider reference for the wallet gateways, derived from the payment id.
pub(crate) fn wallet_reference(payment_id: Uuid) -> String {
    format!("AP{}", payment_id.simple()).to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_params_merges_form_body() {
        let mut query = BTreeMap::new();
        query.insert("a".to_string(), "1".to_string());
        let callback = RawCallback {
            query,
            content_type: Some("application/x-www-form-urlencoded".to_string()),
            body: Bytes::from_static(b"b=2&c=hello%20world"),
            signature_header: None,
        };

        let params = callback.wallet_params();
        assert_eq!(params.get("a").map(String::as_str), Some("1"));
        assert_eq!(params.get("b").map(String::as_str), Some("2"));
        assert_eq!(params.get("c").map(String::as_str), Some("hello world"));
    }

    #[test]
    fn test_wallet_params_flattens_json_body() {
        let callback = RawCallback {
            content_type: Some("application/json".to_string()),
            body: Bytes::from_static(br#"{"pp_status":"1","pp_amount":299900}"#),
            ..Default::default()
        };

        let params = callback.wallet_params();
        assert_eq!(params.get("pp_status").map(String::as_str), Some("1"));
        assert_eq!(params.get("pp_amount").map(String::as_str), Some("299900"));
    }

    #[test]
    fn test_wallet_reference_is_stable() {
        let id = Uuid::parse_str("6f1c2a9e-8d3b-4c1a-9f0e-1b2c3d4e5f60").unwrap();
        assert_eq!(wallet_reference(id), "AP6F1C2A9E8D3B4C1A9F0E1B2C3D4E5F60");
    }
}
