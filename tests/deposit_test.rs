mod common;

use agentpay::{
    domain::{DepositStatus, GatewayId, PaymentStatus, ReviewOutcome},
    error::{AppError, GatewayError},
    notifications::NotificationKind,
    service::ReconcileOutcome,
};

use common::setup;

#[tokio::test]
async fn test_apply_opens_pending_deposit_once() -> anyhow::Result<()> {
    let t = setup().await?;
    let agent = t.create_agent().await?;

    let application = t
        .ctx
        .deposit_service
        .apply(agent.id, GatewayId::JazzCash, None)
        .await?;
    assert!(application.redirect_target.starts_with("https://fake.gateway.test/pay/"));

    let deposit = t.ctx.deposit_service.status(agent.id).await?.unwrap();
    assert_eq!(deposit.id, application.deposit_id);
    assert_eq!(deposit.status, DepositStatus::Pending);
    assert_eq!(deposit.payment_id, Some(application.payment_id));
    assert_eq!(deposit.amount_minor, t.settings.billing.security_deposit_minor);

    let payment = t.ctx.payment_service.get_payment(application.payment_id).await?;
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.amount_minor, deposit.amount_minor);

    match t.ctx.deposit_service.apply(agent.id, GatewayId::Easypaisa, None).await {
        Err(AppError::Conflict(message)) => {
            assert_eq!(message, "You already have a pending security deposit")
        }
        other => panic!("expected conflict, got {:?}", other),
    }

    Ok(())
}

#[tokio::test]
async fn test_apply_again_after_rejection() -> anyhow::Result<()> {
    let t = setup().await?;
    let admin = t.create_admin().await?;
    let agent = t.create_agent().await?;

    let first = t.ctx.deposit_service.apply(agent.id, GatewayId::JazzCash, None).await?;
    let rejected = t
        .ctx
        .deposit_service
        .review(
            admin.id,
            first.deposit_id,
            ReviewOutcome::Rejected,
            Some("Documents missing".to_string()),
        )
        .await?;
    assert_eq!(rejected.status, DepositStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("Documents missing"));

    let second = t.ctx.deposit_service.apply(agent.id, GatewayId::JazzCash, None).await?;
    assert_ne!(second.deposit_id, first.deposit_id);

    let latest = t.ctx.deposit_service.status(agent.id).await?.unwrap();
    assert_eq!(latest.id, second.deposit_id);

    Ok(())
}

#[tokio::test]
async fn test_gateway_failure_rejects_new_deposit() -> anyhow::Result<()> {
    let t = setup().await?;
    let agent = t.create_agent().await?;
    t.jazzcash.fail_initiation(Some(GatewayError::Timeout(15))).await;

    let result = t.ctx.deposit_service.apply(agent.id, GatewayId::JazzCash, None).await;
    assert!(matches!(result, Err(AppError::Gateway(GatewayError::Timeout(15)))));

    let deposit = t.ctx.deposit_service.status(agent.id).await?.unwrap();
    assert_eq!(deposit.status, DepositStatus::Rejected);
    assert!(deposit
        .rejection_reason
        .as_deref()
        .unwrap_or_default()
        .starts_with("Payment could not be initiated"));

    let payments = t.ctx.payment_service.payment_history(agent.id).await?;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Failed);

    // The user is not locked out by the failed attempt
    t.jazzcash.fail_initiation(None).await;
    t.ctx.deposit_service.apply(agent.id, GatewayId::JazzCash, None).await?;

    Ok(())
}

#[tokio::test]
async fn test_completed_payment_records_reference_and_awaits_review() -> anyhow::Result<()> {
    let t = setup().await?;
    let agent = t.create_agent().await?;
    let application = t.ctx.deposit_service.apply(agent.id, GatewayId::JazzCash, None).await?;
    let payment = t.ctx.payment_service.get_payment(application.payment_id).await?;
    let reference = payment.provider_reference.clone().unwrap();

    let callback = t.jazzcash.callback(&reference, true, Some(payment.amount_minor));
    let outcome = t.ctx.reconciler.handle_callback(GatewayId::JazzCash, callback).await?;
    assert_eq!(outcome, ReconcileOutcome::Applied(PaymentStatus::Completed));

    let deposit = t.ctx.deposit_service.status(agent.id).await?.unwrap();
    assert_eq!(deposit.status, DepositStatus::Pending);
    assert_eq!(
        deposit.transaction_reference.as_deref(),
        Some(format!("TXN-{}", reference).as_str())
    );

    let user = t.ctx.user_repo.find_by_id(agent.id).await?.unwrap();
    assert!(!user.is_premium_license);

    Ok(())
}

#[tokio::test]
async fn test_failed_payment_rejects_deposit() -> anyhow::Result<()> {
    let t = setup().await?;
    let agent = t.create_agent().await?;
    let application = t.ctx.deposit_service.apply(agent.id, GatewayId::JazzCash, None).await?;
    let payment = t.ctx.payment_service.get_payment(application.payment_id).await?;

    let callback = t
        .jazzcash
        .callback(payment.provider_reference.as_deref().unwrap(), false, None);
    t.ctx.reconciler.handle_callback(GatewayId::JazzCash, callback).await?;

    let deposit = t.ctx.deposit_service.status(agent.id).await?.unwrap();
    assert_eq!(deposit.status, DepositStatus::Rejected);
    assert_eq!(deposit.rejection_reason.as_deref(), Some("Declined by issuer"));
    assert_eq!(t.notifier.count(NotificationKind::PaymentFailure).await, 1);

    Ok(())
}

#[tokio::test]
async fn test_review_is_terminal_and_grants_premium() -> anyhow::Result<()> {
    let t = setup().await?;
    let admin = t.create_admin().await?;
    let agent = t.create_agent().await?;
    let application = t.ctx.deposit_service.apply(agent.id, GatewayId::JazzCash, None).await?;

    let approved = t
        .ctx
        .deposit_service
        .review(admin.id, application.deposit_id, ReviewOutcome::Approved, None)
        .await?;
    assert_eq!(approved.status, DepositStatus::Approved);
    assert_eq!(approved.approved_by, Some(admin.id));
    assert!(approved.approved_at.is_some());

    let user = t.ctx.user_repo.find_by_id(agent.id).await?.unwrap();
    assert!(user.is_premium_license);
    assert!(user.premium_badge);
    assert_eq!(t.notifier.count(NotificationKind::DepositApproval).await, 1);

    let again = t
        .ctx
        .deposit_service
        .review(admin.id, application.deposit_id, ReviewOutcome::Approved, None)
        .await;
    match again {
        Err(AppError::Conflict(message)) => assert_eq!(message, "Deposit has already been approved"),
        other => panic!("expected conflict, got {:?}", other),
    }

    let reject = t
        .ctx
        .deposit_service
        .review(
            admin.id,
            application.deposit_id,
            ReviewOutcome::Rejected,
            Some("Changed my mind".to_string()),
        )
        .await;
    assert!(matches!(reject, Err(AppError::Conflict(_))));
    assert_eq!(t.notifier.count(NotificationKind::DepositApproval).await, 1);

    Ok(())
}

#[tokio::test]
async fn test_review_requires_admin_and_reason() -> anyhow::Result<()> {
    let t = setup().await?;
    let admin = t.create_admin().await?;
    let agent = t.create_agent().await?;
    let application = t.ctx.deposit_service.apply(agent.id, GatewayId::JazzCash, None).await?;

    let by_agent = t
        .ctx
        .deposit_service
        .review(agent.id, application.deposit_id, ReviewOutcome::Approved, None)
        .await;
    assert!(matches!(by_agent, Err(AppError::Forbidden)));

    let no_reason = t
        .ctx
        .deposit_service
        .review(admin.id, application.deposit_id, ReviewOutcome::Rejected, Some("  ".to_string()))
        .await;
    assert!(matches!(no_reason, Err(AppError::Validation(_))));

    let deposit = t.ctx.deposit_service.status(agent.id).await?.unwrap();
    assert_eq!(deposit.status, DepositStatus::Pending);

    Ok(())
}

#[tokio::test]
async fn test_refund_pairs_deposit_and_keeps_premium_flags() -> anyhow::Result<()> {
    let t = setup().await?;
    let admin = t.create_admin().await?;
    let agent = t.create_agent().await?;
    let application = t.ctx.deposit_service.apply(agent.id, GatewayId::JazzCash, None).await?;
    let payment = t.ctx.payment_service.get_payment(application.payment_id).await?;

    let callback = t.jazzcash.callback(
        payment.provider_reference.as_deref().unwrap(),
        true,
        Some(payment.amount_minor),
    );
    t.ctx.reconciler.handle_callback(GatewayId::JazzCash, callback).await?;
    t.ctx
        .deposit_service
        .review(admin.id, application.deposit_id, ReviewOutcome::Approved, None)
        .await?;

    let missing_reason = t
        .ctx
        .payment_service
        .refund(admin.id, payment.id, None, "")
        .await;
    assert!(matches!(missing_reason, Err(AppError::Validation(_))));

    let receipt = t
        .ctx
        .payment_service
        .refund(admin.id, payment.id, None, "Agent left the platform")
        .await?;
    assert_eq!(receipt.payment.status, PaymentStatus::Refunded);
    assert_eq!(receipt.payment.refund_amount_minor, Some(payment.amount_minor));
    assert_eq!(receipt.deposit_id, Some(application.deposit_id));

    let deposit = t.ctx.deposit_service.status(agent.id).await?.unwrap();
    assert_eq!(deposit.status, DepositStatus::Refunded);
    assert_eq!(deposit.refund_reason.as_deref(), Some("Agent left the platform"));

    let user = t.ctx.user_repo.find_by_id(agent.id).await?.unwrap();
    assert!(user.is_premium_license);

    let twice = t
        .ctx
        .payment_service
        .refund(admin.id, payment.id, None, "Again")
        .await;
    assert!(matches!(twice, Err(AppError::Conflict(_))));

    Ok(())
}

#[tokio::test]
async fn test_refund_after_rejecting_funded_deposit() -> anyhow::Result<()> {
    let t = setup().await?;
    let admin = t.create_admin().await?;
    let agent = t.create_agent().await?;
    let application = t.ctx.deposit_service.apply(agent.id, GatewayId::JazzCash, None).await?;
    let payment = t.ctx.payment_service.get_payment(application.payment_id).await?;

    let callback = t.jazzcash.callback(
        payment.provider_reference.as_deref().unwrap(),
        true,
        Some(payment.amount_minor),
    );
    t.ctx.reconciler.handle_callback(GatewayId::JazzCash, callback).await?;
    t.ctx
        .deposit_service
        .review(
            admin.id,
            application.deposit_id,
            ReviewOutcome::Rejected,
            Some("Documents missing".to_string()),
        )
        .await?;

    let receipt = t
        .ctx
        .payment_service
        .refund(admin.id, payment.id, None, "Deposit returned")
        .await?;
    assert_eq!(receipt.payment.status, PaymentStatus::Refunded);
    assert_eq!(receipt.deposit_id, Some(application.deposit_id));

    let deposit = t.ctx.deposit_service.status(agent.id).await?.unwrap();
    assert_eq!(deposit.status, DepositStatus::Refunded);
    assert_eq!(deposit.refund_amount_minor, Some(payment.amount_minor));
    assert_eq!(deposit.refund_reason.as_deref(), Some("Deposit returned"));
    assert_eq!(deposit.rejection_reason.as_deref(), Some("Documents missing"));

    let user = t.ctx.user_repo.find_by_id(agent.id).await?.unwrap();
    assert!(!user.is_premium_license);

    Ok(())
}

#[tokio::test]
async fn test_refund_requires_completed_payment() -> anyhow::Result<()> {
    let t = setup().await?;
    let admin = t.create_admin().await?;
    let agent = t.create_agent().await?;
    let application = t.ctx.deposit_service.apply(agent.id, GatewayId::JazzCash, None).await?;

    let result = t
        .ctx
        .payment_service
        .refund(admin.id, application.payment_id, None, "Too early")
        .await;
    match result {
        Err(AppError::Conflict(message)) => assert!(message.contains("pending")),
        other => panic!("expected conflict, got {:?}", other),
    }

    let by_agent = t
        .ctx
        .payment_service
        .refund(agent.id, application.payment_id, None, "Mine")
        .await;
    assert!(matches!(by_agent, Err(AppError::Forbidden)));

    Ok(())
}
