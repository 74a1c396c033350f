use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use stripe::{
    CheckoutSession, CheckoutSessionMode, Client, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, CreateCheckoutSessionLineItemsPriceData,
    CreateCheckoutSessionLineItemsPriceDataProductData, Currency, StripeError,
};

use crate::{config::StripeConfig, domain::GatewayId, error::GatewayError};

use super::{
    signing::{constant_time_eq, hmac_sha256},
    CallbackOutcome, ChargeInitiation, ChargeRequest, GatewayEvent, Normalized, PaymentGateway,
    RawCallback,
};

/// Parsed `t=<unix>,v1=<hex>[,v1=<hex>...]` signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub v1_signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Option<Self> {
        let mut timestamp = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part.trim().split_once('=')?;
            match key {
                "t" => timestamp = Some(value.parse().ok()?),
                "v1" => v1_signatures.push(hex::decode(value).ok()?),
                // v0 and future schemes are ignored
                _ => {}
            }
        }

        if v1_signatures.is_empty() {
            return None;
        }
        Some(Self {
            timestamp: timestamp?,
            v1_signatures,
        })
    }
}

/// Card gateway C, backed by hosted checkout sessions.
pub struct StripeGateway {
    client: Option<Client>,
    config: Option<StripeConfig>,
    timeout: Duration,
}

impl StripeGateway {
    pub fn new(config: Option<StripeConfig>, timeout_secs: u64) -> Self {
        let client = config
            .as_ref()
            .and_then(|cfg| cfg.secret_key.as_ref())
            .filter(|key| !key.is_empty())
            .map(|key| Client::new(key.clone()));

        Self {
            client,
            config,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn webhook_secret(&self) -> Option<&str> {
        self.config
            .as_ref()
            .and_then(|cfg| cfg.webhook_secret.as_deref())
            .filter(|secret| !secret.is_empty())
    }

    fn tolerance_secs(&self) -> i64 {
        self.config.as_ref().map(|cfg| cfg.tolerance_secs).unwrap_or(300)
    }

    /// Signature check against an explicit clock. Implements Stripe's
    /// `v1` scheme (HMAC-SHA256 over `t.` + raw body) directly rather than
    /// through `stripe::Webhook::construct_event`, so nothing is parsed
    /// before the signature matches.
    pub fn verify_at(&self, callback: &RawCallback, now_unix: i64) -> bool {
        let Some(secret) = self.webhook_secret() else {
            return false;
        };
        let Some(header) = callback.signature_header.as_deref().and_then(SignatureHeader::parse) else {
            return false;
        };
        let within_tolerance = now_unix
            .checked_sub(header.timestamp)
            .map(i64::unsigned_abs)
            .is_some_and(|age| age <= self.tolerance_secs().unsigned_abs());
        if !within_tolerance {
            return false;
        }

        let mut signed_payload = format!("{}.", header.timestamp).into_bytes();
        signed_payload.extend_from_slice(&callback.body);
        let Some(expected) = hmac_sha256(secret.as_bytes(), &signed_payload) else {
            return false;
        };

        header
            .v1_signatures
            .iter()
            .any(|candidate| constant_time_eq(&expected, candidate))
    }
}

fn map_stripe_error(err: StripeError) -> GatewayError {
    match err {
        StripeError::Stripe(request_error) => GatewayError::Rejected(
            request_error
                .message
                .unwrap_or_else(|| format!("HTTP {}", request_error.http_status)),
        ),
        other => GatewayError::Transport(other.to_string()),
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn id(&self) -> GatewayId {
        GatewayId::Stripe
    }

    async fn initiate(&self, request: &ChargeRequest) -> Result<ChargeInitiation, GatewayError> {
        let not_configured = || GatewayError::NotConfigured(GatewayId::Stripe.to_string());
        let client = self.client.as_ref().ok_or_else(not_configured)?;
        let cfg = self.config.as_ref().ok_or_else(not_configured)?;

        let success_url = request
            .return_target
            .clone()
            .or_else(|| cfg.success_url.clone())
            .ok_or_else(not_configured)?;
        let cancel_url = cfg.cancel_url.clone().unwrap_or_else(|| success_url.clone());

        let currency: Currency = request
            .currency
            .to_ascii_lowercase()
            .parse()
            .map_err(|_| GatewayError::Rejected(format!("unsupported currency {}", request.currency)))?;

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Payment);
        params.success_url = Some(&success_url);
        params.cancel_url = Some(&cancel_url);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency,
                unit_amount: Some(request.amount_minor),
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: request.description.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            quantity: Some(1),
            ..Default::default()
        }]);

        let mut metadata: HashMap<String, String> = request
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        metadata.insert("payment_id".to_string(), request.payment_id.to_string());
        metadata.insert("user_id".to_string(), request.user_id.to_string());
        params.metadata = Some(metadata);

        let payment_id = request.payment_id.to_string();
        params.client_reference_id = Some(&payment_id);

        let session = tokio::time::timeout(self.timeout, CheckoutSession::create(client, params))
            .await
            .map_err(|_| GatewayError::Timeout(self.timeout.as_secs()))?
            .map_err(map_stripe_error)?;

        let redirect_target = session
            .url
            .ok_or_else(|| GatewayError::Rejected("no checkout URL returned".to_string()))?;

        Ok(ChargeInitiation {
            reference: session.id.to_string(),
            redirect_target,
        })
    }

    fn verify(&self, callback: &RawCallback) -> bool {
        self.verify_at(callback, Utc::now().timestamp())
    }

    fn normalize(&self, callback: &RawCallback) -> Result<Normalized, GatewayError> {
        let event: Value = serde_json::from_slice(&callback.body)
            .map_err(|e| GatewayError::MalformedCallback(e.to_string()))?;

        let event_type = event
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::MalformedCallback("missing event type".to_string()))?;
        let object = event.pointer("/data/object").unwrap_or(&Value::Null);

        let outcome = match event_type {
            "checkout.session.completed" => {
                match object.get("payment_status").and_then(Value::as_str) {
                    Some("paid") | Some("no_payment_required") => (CallbackOutcome::Success, None),
                    _ => return Ok(Normalized::Ignored(format!("{} awaiting payment", event_type))),
                }
            }
            "checkout.session.async_payment_succeeded" => (CallbackOutcome::Success, None),
            "checkout.session.async_payment_failed" => {
                (CallbackOutcome::Failure, Some("Payment failed".to_string()))
            }
            "checkout.session.expired" => {
                (CallbackOutcome::Failure, Some("Checkout session expired".to_string()))
            }
            other => return Ok(Normalized::Ignored(other.to_string())),
        };

        let reference = object
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::MalformedCallback("missing session id".to_string()))?
            .to_string();

        Ok(Normalized::Event(GatewayEvent {
            reference,
            outcome: outcome.0,
            provider_amount_minor: object.get("amount_total").and_then(Value::as_i64),
            provider_transaction_id: object
                .get("payment_intent")
                .and_then(Value::as_str)
                .map(str::to_string),
            failure_detail: outcome.1,
        }))
    }
}
