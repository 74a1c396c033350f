use std::collections::BTreeMap;

use async_trait::async_trait;
use rand::{distributions::Alphanumeric, Rng};

use crate::{
    config::WalletGatewayConfig,
    domain::GatewayId,
    error::GatewayError,
};

use super::{
    signing::{hex_digest_matches, sha256_hex, signable_params},
    wallet_reference, CallbackOutcome, ChargeInitiation, ChargeRequest, GatewayEvent, Normalized,
    PaymentGateway, RawCallback,
};

pub const SIGNATURE_FIELD: &str = "pp_secure_hash";
const DEFAULT_ENDPOINT: &str = "https://sandbox.jazzcash.com.pk/ApplicationAPI/API/2.0/Purchase";

/// Mobile-wallet gateway A.
///
/// Canonical string: `secret & v1 & v2 & ... & secret`, values ordered by
/// parameter name, hashed with SHA-256 and sent hex-encoded.
pub struct JazzCashGateway {
    config: Option<WalletGatewayConfig>,
    notify_url: String,
}

impl JazzCashGateway {
    pub fn new(config: Option<WalletGatewayConfig>, base_url: &str) -> Self {
        Self {
            config,
            notify_url: format!(
                "{}/api/payments/webhook/{}",
                base_url.trim_end_matches('/'),
                GatewayId::JazzCash.route_segment()
            ),
        }
    }

    fn configured(&self) -> Result<&WalletGatewayConfig, GatewayError> {
        match &self.config {
            Some(cfg) if !cfg.merchant_id.is_empty() && !cfg.password.is_empty() => Ok(cfg),
            _ => Err(GatewayError::NotConfigured(GatewayId::JazzCash.to_string())),
        }
    }

    pub fn compute_hash(secret: &str, params: &BTreeMap<String, String>) -> String {
        let values: Vec<&str> = signable_params(params, SIGNATURE_FIELD)
            .map(|(_, value)| value.as_str())
            .collect();
        sha256_hex(&format!("{}&{}&{}", secret, values.join("&"), secret))
    }
}

#[async_trait]
impl PaymentGateway for JazzCashGateway {
    fn id(&self) -> GatewayId {
        GatewayId::JazzCash
    }

    async fn initiate(&self, request: &ChargeRequest) -> Result<ChargeInitiation, GatewayError> {
        let cfg = self.configured()?;
        let reference = wallet_reference(request.payment_id);
        let irn: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();

        let mut params = BTreeMap::new();
        params.insert("pp_version".to_string(), "1.1".to_string());
        params.insert("pp_txn_type".to_string(), "MWALLET".to_string());
        params.insert("pp_language".to_string(), "en".to_string());
        params.insert("pp_merchant_id".to_string(), cfg.merchant_id.clone());
        params.insert("pp_merchant_ref".to_string(), reference.clone());
        params.insert("pp_amount".to_string(), request.amount_minor.to_string());
        params.insert("pp_currency".to_string(), request.currency.clone());
        params.insert("pp_bill_reference".to_string(), reference.clone());
        params.insert("pp_description".to_string(), request.description.clone());
        params.insert("pp_notify_url".to_string(), self.notify_url.clone());
        params.insert(
            "pp_return_url".to_string(),
            request.return_target.clone().unwrap_or_else(|| cfg.return_url.clone()),
        );
        params.insert("pp_irn".to_string(), irn);

        let hash = Self::compute_hash(&cfg.password, &params);
        params.insert(SIGNATURE_FIELD.to_string(), hash);

        let query = serde_urlencoded::to_string(&params)
            .map_err(|e| GatewayError::Rejected(format!("could not encode request: {}", e)))?;
        let endpoint = cfg.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);

        Ok(ChargeInitiation {
            reference,
            redirect_target: format!("{}?{}", endpoint, query),
        })
    }

    fn verify(&self, callback: &RawCallback) -> bool {
        let Ok(cfg) = self.configured() else {
            return false;
        };
        let params = callback.wallet_params();
        let Some(received) = params.get(SIGNATURE_FIELD) else {
            return false;
        };
        hex_digest_matches(&Self::compute_hash(&cfg.password, &params), received)
    }

    fn normalize(&self, callback: &RawCallback) -> Result<Normalized, GatewayError> {
        let params = callback.wallet_params();
        let reference = params
            .get("pp_merchant_ref")
            .filter(|r| !r.is_empty())
            .cloned()
            .ok_or_else(|| GatewayError::MalformedCallback("missing pp_merchant_ref".to_string()))?;

        let outcome = match params.get("pp_status").map(String::as_str) {
            Some("1") => CallbackOutcome::Success,
            _ => CallbackOutcome::Failure,
        };

        let provider_amount_minor = match params.get("pp_amount") {
            Some(raw) => Some(raw.trim().parse::<i64>().map_err(|_| {
                GatewayError::MalformedCallback(format!("invalid pp_amount: {}", raw))
            })?),
            None => None,
        };

        let failure_detail = match outcome {
            CallbackOutcome::Success => None,
            CallbackOutcome::Failure => Some(
                params
                    .get("pp_status_description")
                    .filter(|d| !d.is_empty())
                    .cloned()
                    .unwrap_or_else(|| "Payment declined by JazzCash".to_string()),
            ),
        };

        Ok(Normalized::Event(GatewayEvent {
            reference,
            outcome,
            provider_amount_minor,
            provider_transaction_id: params.get("pp_transaction_id").filter(|t| !t.is_empty()).cloned(),
            failure_detail,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn gateway() -> JazzCashGateway {
        JazzCashGateway::new(
            Some(WalletGatewayConfig {
                merchant_id: "MC123".to_string(),
                password: "s3cret".to_string(),
                return_url: "https://example.test/return".to_string(),
                endpoint: None,
            }),
            "https://example.test",
        )
    }

    fn signed_callback(pairs: &[(&str, &str)]) -> RawCallback {
        let mut params: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let hash = JazzCashGateway::compute_hash("s3cret", &params);
        params.insert(SIGNATURE_FIELD.to_string(), hash);
        RawCallback::from_params(params)
    }

    #[test]
    fn test_hash_layout() {
        let mut params = BTreeMap::new();
        params.insert("b".to_string(), "2".to_string());
        params.insert("a".to_string(), "1".to_string());
        assert_eq!(
            JazzCashGateway::compute_hash("k", &params),
            sha256_hex("k&1&2&k")
        );
    }

    #[test]
    fn test_verify_accepts_signed_and_rejects_tampered() {
        let gw = gateway();
        let callback = signed_callback(&[
            ("pp_merchant_ref", "APREF"),
            ("pp_status", "1"),
            ("pp_amount", "299900"),
        ]);
        assert!(gw.verify(&callback));

        let mut tampered = callback.clone();
        tampered.query.insert("pp_amount".to_string(), "1".to_string());
        assert!(!gw.verify(&tampered));

        let mut unsigned = callback;
        unsigned.query.remove(SIGNATURE_FIELD);
        assert!(!gw.verify(&unsigned));
    }

    #[test]
    fn test_verify_fails_when_unconfigured() {
        let gw = JazzCashGateway::new(None, "https://example.test");
        let callback = signed_callback(&[("pp_merchant_ref", "APREF")]);
        assert!(!gw.verify(&callback));
    }

    #[test]
    fn test_normalize_maps_status() {
        let gw = gateway();
        let ok = signed_callback(&[
            ("pp_merchant_ref", "APREF"),
            ("pp_status", "1"),
            ("pp_amount", "500"),
            ("pp_transaction_id", "T-1"),
        ]);
        match gw.normalize(&ok).unwrap() {
            Normalized::Event(event) => {
                assert_eq!(event.reference, "APREF");
                assert_eq!(event.outcome, CallbackOutcome::Success);
                assert_eq!(event.provider_amount_minor, Some(500));
                assert_eq!(event.provider_transaction_id.as_deref(), Some("T-1"));
                assert!(event.failure_detail.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }

        let failed = signed_callback(&[
            ("pp_merchant_ref", "APREF"),
            ("pp_status", "0"),
            ("pp_status_description", "Insufficient balance"),
        ]);
        match gw.normalize(&failed).unwrap() {
            Normalized::Event(event) => {
                assert_eq!(event.outcome, CallbackOutcome::Failure);
                assert_eq!(event.failure_detail.as_deref(), Some("Insufficient balance"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initiate_builds_signed_redirect() {
        let gw = gateway();
        let payment_id = Uuid::new_v4();
        let initiation = gw
            .initiate(&ChargeRequest {
                payment_id,
                user_id: Uuid::new_v4(),
                amount_minor: 299900,
                currency: "PKR".to_string(),
                description: "Starter plan".to_string(),
                return_target: None,
                metadata: BTreeMap::new(),
            })
            .await
            .unwrap();

        assert_eq!(initiation.reference, wallet_reference(payment_id));
        assert!(initiation.redirect_target.starts_with(DEFAULT_ENDPOINT));

        let query = initiation.redirect_target.split_once('?').unwrap().1;
        let params: BTreeMap<String, String> = serde_urlencoded::from_str(query).unwrap();
        assert_eq!(params.get("pp_amount").map(String::as_str), Some("299900"));
        assert!(!params.contains_key("pp_password"));
        assert!(gw.verify(&RawCallback::from_params(params)));
    }

    #[tokio::test]
    async fn test_initiate_without_config_is_typed_error() {
        let gw = JazzCashGateway::new(None, "https://example.test");
        let err = gw
            .initiate(&ChargeRequest {
                payment_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                amount_minor: 100,
                currency: "PKR".to_string(),
                description: "x".to_string(),
                return_target: None,
                metadata: BTreeMap::new(),
            })
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::NotConfigured("JazzCash".to_string()));
    }
}
