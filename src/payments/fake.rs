//! Deterministic gateway for tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{domain::GatewayId, error::GatewayError};

use super::{
    signing::{hex_digest_matches, sha256_hex},
    CallbackOutcome, ChargeInitiation, ChargeRequest, GatewayEvent, Normalized, PaymentGateway,
    RawCallback,
};

/// Stands in for a real provider under any gateway id. Callbacks carry
/// `reference`, `status` (`ok` or anything else), optional `amount`
/// in minor units, and `sig = sha256(secret|reference|status|amount)`.
pub struct FakeGateway {
    id: GatewayId,
    secret: String,
    failure: Mutex<Option<GatewayError>>,
}

impl FakeGateway {
    pub fn new(id: GatewayId, secret: impl Into<String>) -> Self {
        Self {
            id,
            secret: secret.into(),
            failure: Mutex::new(None),
        }
    }

    /// Makes every later `initiate` fail with `error`.
    pub async fn fail_initiation(&self, error: Option<GatewayError>) {
        *self.failure.lock().await = error;
    }

    pub fn reference_for(request: &ChargeRequest) -> String {
        format!("FAKE-{}", request.payment_id.simple())
    }

    fn signature(secret: &str, params: &BTreeMap<String, String>) -> String {
        let field = |k: &str| params.get(k).map(String::as_str).unwrap_or("");
        sha256_hex(&format!(
            "{}|{}|{}|{}",
            secret,
            field("reference"),
            field("status"),
            field("amount")
        ))
    }

    /// Builds a callback signed with this gateway's secret.
    pub fn callback(&self, reference: &str, success: bool, amount_minor: Option<i64>) -> RawCallback {
        Self::callback_signed_with(&self.secret, reference, success, amount_minor)
    }

    pub fn callback_signed_with(
        secret: &str,
        reference: &str,
        success: bool,
        amount_minor: Option<i64>,
    ) -> RawCallback {
        let mut params = BTreeMap::new();
        params.insert("reference".to_string(), reference.to_string());
        params.insert(
            "status".to_string(),
            if success { "ok" } else { "declined" }.to_string(),
        );
        if let Some(amount) = amount_minor {
            params.insert("amount".to_string(), amount.to_string());
        }
        let sig = Self::signature(secret, &params);
        params.insert("sig".to_string(), sig);
        RawCallback::from_params(params)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn id(&self) -> GatewayId {
        self.id
    }

    async fn initiate(&self, request: &ChargeRequest) -> Result<ChargeInitiation, GatewayError> {
        if let Some(error) = self.failure.lock().await.clone() {
            return Err(error);
        }
        let reference = Self::reference_for(request);
        Ok(ChargeInitiation {
            redirect_target: format!("https://fake.gateway.test/pay/{}", reference),
            reference,
        })
    }

    fn verify(&self, callback: &RawCallback) -> bool {
        let params = callback.wallet_params();
        match params.get("sig") {
            Some(sig) => hex_digest_matches(&Self::signature(&self.secret, &params), sig),
            None => false,
        }
    }

    fn normalize(&self, callback: &RawCallback) -> Result<Normalized, GatewayError> {
        let params = callback.wallet_params();
        let reference = params
            .get("reference")
            .cloned()
            .ok_or_else(|| GatewayError::MalformedCallback("missing reference".to_string()))?;
        let success = params.get("status").map(String::as_str) == Some("ok");

        Ok(Normalized::Event(GatewayEvent {
            reference: reference.clone(),
            outcome: if success {
                CallbackOutcome::Success
            } else {
                CallbackOutcome::Failure
            },
            provider_amount_minor: params.get("amount").and_then(|a| a.parse().ok()),
            provider_transaction_id: Some(format!("TXN-{}", reference)),
            failure_detail: if success {
                None
            } else {
                Some("Declined by issuer".to_string())
            },
        }))
    }
}
