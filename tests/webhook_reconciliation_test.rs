mod common;

use std::sync::Arc;

use agentpay::{
    api,
    domain::{BillingPeriod, GatewayId, PaymentStatus, PlanTier},
    error::AppError,
    notifications::NotificationKind,
    payments::{fake::FakeGateway, RawCallback},
    service::ReconcileOutcome,
};
use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Request, StatusCode},
};
use chrono::Duration;
use tower::ServiceExt;

use common::setup;

#[tokio::test]
async fn test_redelivered_success_completes_once() -> anyhow::Result<()> {
    let t = setup().await?;
    let agent = t.create_agent().await?;
    let receipt = t.buy_plan(agent.id, PlanTier::Starter, BillingPeriod::Monthly).await?;
    let callback = t.jazzcash.callback(&receipt.provider_reference, true, Some(2999));

    let first = t.ctx.reconciler.handle_callback(GatewayId::JazzCash, callback.clone()).await?;
    assert_eq!(first, ReconcileOutcome::Applied(PaymentStatus::Completed));

    for _ in 0..3 {
        let again = t.ctx.reconciler.handle_callback(GatewayId::JazzCash, callback.clone()).await?;
        assert_eq!(again, ReconcileOutcome::Duplicate);
    }

    let payment = t.ctx.payment_service.get_payment(receipt.payment_id).await?;
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert!(payment.fulfilled_at.is_some());
    assert_eq!(
        payment.provider_transaction_id.as_deref(),
        Some(format!("TXN-{}", receipt.provider_reference).as_str())
    );
    assert_eq!(t.notifier.count(NotificationKind::PaymentSuccess).await, 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_callbacks_apply_once() -> anyhow::Result<()> {
    let t = setup().await?;
    let agent = t.create_agent().await?;
    let receipt = t.buy_plan(agent.id, PlanTier::Starter, BillingPeriod::Monthly).await?;
    let callback = t.jazzcash.callback(&receipt.provider_reference, true, Some(2999));

    let mut handles = Vec::new();
    for _ in 0..6 {
        let reconciler = t.ctx.reconciler.clone();
        let callback = callback.clone();
        handles.push(tokio::spawn(async move {
            reconciler.handle_callback(GatewayId::JazzCash, callback).await
        }));
    }

    let mut applied = 0;
    for handle in handles {
        match handle.await?? {
            ReconcileOutcome::Applied(_) => applied += 1,
            ReconcileOutcome::Duplicate => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(t.notifier.count(NotificationKind::PaymentSuccess).await, 1);

    Ok(())
}

#[tokio::test]
async fn test_plan_purchase_activates_fixed_windows() -> anyhow::Result<()> {
    let t = setup().await?;

    let monthly = t.create_agent().await?;
    t.activate_plan(monthly.id, PlanTier::Starter, BillingPeriod::Monthly).await?;
    let sub = t.ctx.subscription_repo.find_by_user(monthly.id).await?.unwrap();
    assert_eq!(sub.tier, PlanTier::Starter);
    assert!(sub.is_active);
    assert_eq!(sub.end_date - sub.start_date, Duration::days(30));
    assert_eq!(sub.listings_limit, 10);

    let user = t.ctx.user_repo.find_by_id(monthly.id).await?.unwrap();
    assert_eq!(user.current_plan, PlanTier::Starter);
    assert!(user.plan_end_date.is_some());

    let yearly = t.create_agent().await?;
    t.activate_plan(yearly.id, PlanTier::Professional, BillingPeriod::Yearly).await?;
    let sub = t.ctx.subscription_repo.find_by_user(yearly.id).await?.unwrap();
    assert_eq!(sub.tier, PlanTier::Professional);
    assert_eq!(sub.end_date - sub.start_date, Duration::days(365));

    Ok(())
}

#[tokio::test]
async fn test_tampered_callback_is_rejected_without_mutation() -> anyhow::Result<()> {
    let t = setup().await?;
    let agent = t.create_agent().await?;
    let receipt = t.buy_plan(agent.id, PlanTier::Starter, BillingPeriod::Monthly).await?;

    // Declined callback flipped to success after signing
    let mut tampered = t.jazzcash.callback(&receipt.provider_reference, false, Some(2999));
    tampered.query.insert("status".to_string(), "ok".to_string());
    let result = t.ctx.reconciler.handle_callback(GatewayId::JazzCash, tampered).await;
    assert!(matches!(result, Err(AppError::Authentication(_))));

    // Signed with the wrong secret
    let forged = FakeGateway::callback_signed_with("not-the-secret", &receipt.provider_reference, true, Some(2999));
    let result = t.ctx.reconciler.handle_callback(GatewayId::JazzCash, forged).await;
    assert!(matches!(result, Err(AppError::Authentication(_))));

    // Missing signature
    let mut unsigned = t.jazzcash.callback(&receipt.provider_reference, true, Some(2999));
    unsigned.query.remove("sig");
    let result = t.ctx.reconciler.handle_callback(GatewayId::JazzCash, unsigned).await;
    assert!(matches!(result, Err(AppError::Authentication(_))));

    let payment = t.ctx.payment_service.get_payment(receipt.payment_id).await?;
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(t.notifier.sent().await.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_callback_routes_by_gateway() -> anyhow::Result<()> {
    let t = setup().await?;
    let agent = t.create_agent().await?;
    let receipt = t.buy_plan(agent.id, PlanTier::Starter, BillingPeriod::Monthly).await?;

    // The reference belongs to JazzCash; the same payload on another gateway
    // verifies (shared fake secret) but matches nothing there.
    let callback = t.easypaisa.callback(&receipt.provider_reference, true, Some(2999));
    let outcome = t.ctx.reconciler.handle_callback(GatewayId::Easypaisa, callback).await?;
    assert_eq!(outcome, ReconcileOutcome::UnknownReference);

    let payment = t.ctx.payment_service.get_payment(receipt.payment_id).await?;
    assert_eq!(payment.status, PaymentStatus::Pending);

    Ok(())
}

#[tokio::test]
async fn test_unknown_reference_is_acknowledged() -> anyhow::Result<()> {
    let t = setup().await?;
    let callback = t.jazzcash.callback("FAKE-DOESNOTEXIST", true, Some(100));

    let outcome = t.ctx.reconciler.handle_callback(GatewayId::JazzCash, callback).await?;
    assert_eq!(outcome, ReconcileOutcome::UnknownReference);
    assert!(t.notifier.sent().await.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_conflicting_callback_is_discarded_as_anomaly() -> anyhow::Result<()> {
    let t = setup().await?;
    let agent = t.create_agent().await?;
    let receipt = t.buy_plan(agent.id, PlanTier::Starter, BillingPeriod::Monthly).await?;

    let success = t.jazzcash.callback(&receipt.provider_reference, true, Some(2999));
    t.ctx.reconciler.handle_callback(GatewayId::JazzCash, success).await?;

    let failure = t.jazzcash.callback(&receipt.provider_reference, false, Some(2999));
    let outcome = t.ctx.reconciler.handle_callback(GatewayId::JazzCash, failure).await?;
    assert_eq!(outcome, ReconcileOutcome::Anomaly);

    let payment = t.ctx.payment_service.get_payment(receipt.payment_id).await?;
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert!(payment.failure_reason.is_none());
    assert_eq!(t.notifier.count(NotificationKind::PaymentFailure).await, 0);

    let sub = t.ctx.subscription_repo.find_by_user(agent.id).await?.unwrap();
    assert_eq!(sub.tier, PlanTier::Starter);

    Ok(())
}

#[tokio::test]
async fn test_failure_callback_records_reason() -> anyhow::Result<()> {
    let t = setup().await?;
    let agent = t.create_agent().await?;
    let receipt = t.buy_plan(agent.id, PlanTier::Starter, BillingPeriod::Monthly).await?;

    let failure = t.jazzcash.callback(&receipt.provider_reference, false, None);
    let outcome = t.ctx.reconciler.handle_callback(GatewayId::JazzCash, failure).await?;
    assert_eq!(outcome, ReconcileOutcome::Applied(PaymentStatus::Failed));

    let payment = t.ctx.payment_service.get_payment(receipt.payment_id).await?;
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.failure_reason.as_deref(), Some("Declined by issuer"));
    assert!(payment.fulfilled_at.is_none());
    assert_eq!(t.notifier.count(NotificationKind::PaymentFailure).await, 1);

    let user = t.ctx.user_repo.find_by_id(agent.id).await?.unwrap();
    assert_eq!(user.current_plan, PlanTier::Free);

    Ok(())
}

#[tokio::test]
async fn test_amount_mismatch_fails_payment() -> anyhow::Result<()> {
    let t = setup().await?;
    let agent = t.create_agent().await?;
    let receipt = t.buy_plan(agent.id, PlanTier::Professional, BillingPeriod::Monthly).await?;

    let underpaid = t.jazzcash.callback(&receipt.provider_reference, true, Some(100));
    let outcome = t.ctx.reconciler.handle_callback(GatewayId::JazzCash, underpaid).await?;
    assert_eq!(outcome, ReconcileOutcome::Applied(PaymentStatus::Failed));

    let payment = t.ctx.payment_service.get_payment(receipt.payment_id).await?;
    assert_eq!(
        payment.failure_reason.as_deref(),
        Some("Amount mismatch: expected 7999, received 100")
    );

    let user = t.ctx.user_repo.find_by_id(agent.id).await?.unwrap();
    assert_eq!(user.current_plan, PlanTier::Free);

    Ok(())
}

#[tokio::test]
async fn test_notification_failure_does_not_roll_back_transition() -> anyhow::Result<()> {
    let t = setup().await?;
    t.notifier.fail_deliveries(true);

    let agent = t.create_agent().await?;
    let receipt = t.buy_plan(agent.id, PlanTier::Starter, BillingPeriod::Monthly).await?;
    let callback = t.jazzcash.callback(&receipt.provider_reference, true, Some(2999));

    let outcome = t.ctx.reconciler.handle_callback(GatewayId::JazzCash, callback).await?;
    assert_eq!(outcome, ReconcileOutcome::Applied(PaymentStatus::Completed));

    let payment = t.ctx.payment_service.get_payment(receipt.payment_id).await?;
    assert_eq!(payment.status, PaymentStatus::Completed);
    let sub = t.ctx.subscription_repo.find_by_user(agent.id).await?.unwrap();
    assert_eq!(sub.tier, PlanTier::Starter);

    Ok(())
}

#[tokio::test]
async fn test_gateway_failure_marks_payment_failed() -> anyhow::Result<()> {
    let t = setup().await?;
    t.jazzcash
        .fail_initiation(Some(agentpay::error::GatewayError::Timeout(15)))
        .await;

    let agent = t.create_agent().await?;
    let result = t.buy_plan(agent.id, PlanTier::Starter, BillingPeriod::Monthly).await;
    assert!(result.is_err());

    let history = t.ctx.payment_service.payment_history(agent.id).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, PaymentStatus::Failed);
    assert!(history[0]
        .failure_reason
        .as_deref()
        .unwrap_or_default()
        .starts_with("Initiation failed"));

    Ok(())
}

#[tokio::test]
async fn test_plan_price_must_match_catalog() -> anyhow::Result<()> {
    let t = setup().await?;
    let agent = t.create_agent().await?;

    let result = t
        .ctx
        .payment_service
        .create_charge(agentpay::service::payment_service::NewCharge {
            user_id: agent.id,
            amount_minor: 1,
            currency: "PKR".to_string(),
            description: "Starter plan".to_string(),
            gateway: GatewayId::JazzCash,
            plan_tier: Some(PlanTier::Starter),
            billing_period: Some(BillingPeriod::Monthly),
            return_url: None,
        })
        .await;
    assert!(matches!(result, Err(AppError::Validation(_))));
    assert!(t.ctx.payment_service.payment_history(agent.id).await?.is_empty());

    Ok(())
}

fn form_body(callback: &RawCallback) -> String {
    serde_urlencoded::to_string(&callback.query).unwrap()
}

#[tokio::test]
async fn test_webhook_route_acknowledges_post_and_get() -> anyhow::Result<()> {
    let t = setup().await?;
    let agent = t.create_agent().await?;
    let receipt = t.buy_plan(agent.id, PlanTier::Starter, BillingPeriod::Monthly).await?;
    let callback = t.jazzcash.callback(&receipt.provider_reference, true, Some(2999));
    let app = api::create_app(t.ctx.clone(), Arc::new(t.settings.clone()));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/payments/webhook/jazzcash")
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form_body(&callback)))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    // Redirect-style redelivery of the same callback
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/api/payments/webhook/jazzcash?{}", form_body(&callback)))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let payment = t.ctx.payment_service.get_payment(receipt.payment_id).await?;
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(t.notifier.count(NotificationKind::PaymentSuccess).await, 1);

    Ok(())
}

#[tokio::test]
async fn test_webhook_route_rejects_unverified_callback() -> anyhow::Result<()> {
    let t = setup().await?;
    let agent = t.create_agent().await?;
    let receipt = t.buy_plan(agent.id, PlanTier::Starter, BillingPeriod::Monthly).await?;
    let forged = FakeGateway::callback_signed_with("wrong", &receipt.provider_reference, true, Some(2999));
    let app = api::create_app(t.ctx.clone(), Arc::new(t.settings.clone()));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/payments/webhook/jazzcash")
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form_body(&forged)))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let json: serde_json::Value = serde_json::from_slice(&body)?;
    assert_eq!(json["error"], "Unauthorized");

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/payments/webhook/paypal")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let payment = t.ctx.payment_service.get_payment(receipt.payment_id).await?;
    assert_eq!(payment.status, PaymentStatus::Pending);

    Ok(())
}
