use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::{
    config::WalletGatewayConfig,
    domain::{format_major, GatewayId},
    error::GatewayError,
};

use super::{
    signing::{hex_digest_matches, sha256_hex, signable_params},
    wallet_reference, CallbackOutcome, ChargeInitiation, ChargeRequest, GatewayEvent, Normalized,
    PaymentGateway, RawCallback,
};

pub const SIGNATURE_FIELD: &str = "checksum";
const DEFAULT_ENDPOINT: &str = "https://sandbox.easypaisa.com.pk/api/payment/v2/create";

/// Mobile-wallet gateway B.
///
/// Canonical string: `k1=v1&k2=v2...` ordered by key, with the secret
/// appended directly, hashed with SHA-256. Amounts travel in major units.
pub struct EasypaisaGateway {
    config: Option<WalletGatewayConfig>,
    notify_url: String,
}

impl EasypaisaGateway {
    pub fn new(config: Option<WalletGatewayConfig>, base_url: &str) -> Self {
        Self {
            config,
            notify_url: format!(
                "{}/api/payments/webhook/{}",
                base_url.trim_end_matches('/'),
                GatewayId::Easypaisa.route_segment()
            ),
        }
    }

    fn configured(&self) -> Result<&WalletGatewayConfig, GatewayError> {
        match &self.config {
            Some(cfg) if !cfg.merchant_id.is_empty() && !cfg.password.is_empty() => Ok(cfg),
            _ => Err(GatewayError::NotConfigured(GatewayId::Easypaisa.to_string())),
        }
    }

    pub fn compute_hash(secret: &str, params: &BTreeMap<String, String>) -> String {
        let canonical = signable_params(params, SIGNATURE_FIELD)
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join("&");
        sha256_hex(&format!("{}{}", canonical, secret))
    }
}

/// Parses a major-unit amount with at most two decimals into minor units.
pub fn parse_major(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let (whole, frac) = match raw.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (raw, ""),
    };
    if whole.is_empty() || frac.len() > 2 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let whole: i64 = whole.parse().ok()?;
    let frac: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    if whole < 0 {
        return None;
    }
    whole.checked_mul(100)?.checked_add(frac)
}

#[async_trait]
impl PaymentGateway for EasypaisaGateway {
    fn id(&self) -> GatewayId {
        GatewayId::Easypaisa
    }

    async fn initiate(&self, request: &ChargeRequest) -> Result<ChargeInitiation, GatewayError> {
        let cfg = self.configured()?;
        let reference = wallet_reference(request.payment_id);
        let meta = |key: &str| request.metadata.get(key).cloned().unwrap_or_default();

        let mut params = BTreeMap::new();
        params.insert("storeId".to_string(), cfg.merchant_id.clone());
        params.insert("transactionId".to_string(), reference.clone());
        params.insert("transactionAmount".to_string(), format_major(request.amount_minor));
        params.insert("currency".to_string(), request.currency.clone());
        params.insert("transactionDescription".to_string(), request.description.clone());
        params.insert("customerEmail".to_string(), meta("email"));
        params.insert("customerPhoneNumber".to_string(), meta("phone"));
        params.insert(
            "customerName".to_string(),
            request
                .metadata
                .get("name")
                .cloned()
                .unwrap_or_else(|| "Customer".to_string()),
        );
        params.insert(
            "returnUrl".to_string(),
            request.return_target.clone().unwrap_or_else(|| cfg.return_url.clone()),
        );
        params.insert("notificationUrl".to_string(), self.notify_url.clone());

        let checksum = Self::compute_hash(&cfg.password, &params);
        params.insert(SIGNATURE_FIELD.to_string(), checksum);

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
            .get("transactionId")
            .filter(|r| !r.is_empty())
            .cloned()
            .ok_or_else(|| GatewayError::MalformedCallback("missing transactionId".to_string()))?;

        let outcome = match params.get("transactionStatus").map(String::as_str) {
            Some("SUCCESS") => CallbackOutcome::Success,
            _ => CallbackOutcome::Failure,
        };

        let provider_amount_minor = match params.get("transactionAmount") {
            Some(raw) => Some(parse_major(raw).ok_or_else(|| {
                GatewayError::MalformedCallback(format!("invalid transactionAmount: {}", raw))
            })?),
            None => None,
        };

        let failure_detail = match outcome {
            CallbackOutcome::Success => None,
            CallbackOutcome::Failure => Some(
                params
                    .get("transactionFailureReason")
                    .filter(|d| !d.is_empty())
                    .cloned()
                    .unwrap_or_else(|| "Payment declined by Easypaisa".to_string()),
            ),
        };

        Ok(Normalized::Event(GatewayEvent {
            reference,
            outcome,
            provider_amount_minor,
            provider_transaction_id: params
                .get("transactionRefNumber")
                .filter(|t| !t.is_empty())
                .cloned(),
            failure_detail,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> EasypaisaGateway {
        EasypaisaGateway::new(
            Some(WalletGatewayConfig {
                merchant_id: "STORE9".to_string(),
                password: "hashkey".to_string(),
                return_url: "https://example.test/return".to_string(),
                endpoint: Some("https://ep.example.test/pay".to_string()),
            }),
            "https://example.test/",
        )
    }

    fn signed(pairs: &[(&str, &str)]) -> RawCallback {
        let mut params: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let checksum = EasypaisaGateway::compute_hash("hashkey", &params);
        params.insert(SIGNATURE_FIELD.to_string(), checksum);
        RawCallback::from_params(params)
    }

    #[test]
    fn test_hash_layout() {
        let mut params = BTreeMap::new();
        params.insert("z".to_string(), "9".to_string());
        params.insert("a".to_string(), "1".to_string());
        assert_eq!(
            EasypaisaGateway::compute_hash("key", &params),
            sha256_hex("a=1&z=9key")
        );
    }

    #[test]
    fn test_major_amounts() {
        assert_eq!(format_major(299900), "2999.00");
        assert_eq!(format_major(5), "0.05");
        assert_eq!(parse_major("2999.00"), Some(299900));
        assert_eq!(parse_major("2999"), Some(299900));
        assert_eq!(parse_major("12.5"), Some(1250));
        assert_eq!(parse_major("1.234"), None);
        assert_eq!(parse_major("abc"), None);
        assert_eq!(parse_major("-1"), None);
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let gw = gateway();
        let callback = signed(&[("transactionId", "APX"), ("transactionStatus", "SUCCESS")]);
        assert!(gw.verify(&callback));

        let mut params = callback.query.clone();
        params.remove(SIGNATURE_FIELD);
        let forged = EasypaisaGateway::compute_hash("not-the-key", &params);
        params.insert(SIGNATURE_FIELD.to_string(), forged);
        assert!(!gw.verify(&RawCallback::from_params(params)));
    }

    #[test]
    fn test_normalize_reads_major_amount() {
        let gw = gateway();
        let callback = signed(&[
            ("transactionId", "APX"),
            ("transactionStatus", "SUCCESS"),
            ("transactionAmount", "2999.00"),
        ]);
        match gw.normalize(&callback).unwrap() {
            Normalized::Event(event) => {
                assert_eq!(event.outcome, CallbackOutcome::Success);
                assert_eq!(event.provider_amount_minor, Some(299900));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_normalize_requires_reference() {
        let gw = gateway();
        let callback = signed(&[("transactionStatus", "SUCCESS")]);
        assert!(matches!(
            gw.normalize(&callback),
            Err(GatewayError::MalformedCallback(_))
        ));
    }

    #[tokio::test]
    async fn test_initiate_uses_configured_endpoint() {
        let gw = gateway();
        let initiation = gw
            .initiate(&ChargeRequest {
                payment_id: uuid::Uuid::new_v4(),
                user_id: uuid::Uuid::new_v4(),
                amount_minor: 2_500_000,
                currency: "PKR".to_string(),
                description: "Security deposit".to_string(),
                return_target: None,
                metadata: BTreeMap::new(),
            })
            .await
            .unwrap();

        assert!(initiation.redirect_target.starts_with("https://ep.example.test/pay?"));
        assert!(initiation
            .redirect_target
            .contains("notificationUrl=https%3A%2F%2Fexample.test%2Fapi%2Fpayments%2Fwebhook%2Feasypaisa"));
        assert!(initiation.redirect_target.contains("transactionAmount=25000.00"));
    }
}
