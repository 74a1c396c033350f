mod common;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use agentpay::{
    api,
    domain::User,
    notifications::{
        ChannelKind, DeliveryError, NotificationChannel, NotificationDispatcher,
        NotificationService, OutboundMessage, PaymentNotice,
    },
};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Request, StatusCode},
};
use tower::ServiceExt;
use uuid::Uuid;

use common::setup;

#[derive(Default)]
struct CountingEmail {
    sent: AtomicUsize,
}

#[async_trait]
impl NotificationChannel for CountingEmail {
    fn name(&self) -> &str {
        "counting-email"
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, _recipient: &User, _message: &OutboundMessage) -> Result<(), DeliveryError> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn notice() -> PaymentNotice {
    PaymentNotice {
        payment_id: Uuid::new_v4(),
        amount_minor: 2999,
        currency: "PKR".to_string(),
        description: "Starter plan".to_string(),
        reason: None,
    }
}

#[tokio::test]
async fn test_email_opt_out_stops_email_delivery() -> anyhow::Result<()> {
    let t = setup().await?;
    let agent = t.create_agent().await?;
    let app = api::create_app(t.ctx.clone(), Arc::new(t.settings.clone()));

    let channel = Arc::new(CountingEmail::default());
    let mut service = NotificationService::new(t.pool.clone(), t.ctx.user_repo.clone(), 5);
    service.register(channel.clone());

    let report = service.notify_payment_success(agent.id, notice()).await;
    assert!(report.email_sent);
    assert_eq!(channel.sent.load(Ordering::SeqCst), 1);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/api/users/{}/notifications", agent.id))
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"email":false,"sms":true}"#))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let json: serde_json::Value = serde_json::from_slice(&body)?;
    assert_eq!(json, serde_json::json!({ "email": false, "sms": true }));

    let user = t.ctx.user_repo.find_by_id(agent.id).await?.unwrap();
    assert!(!user.email_notifications);
    assert!(user.sms_notifications);

    let report = service.notify_payment_success(agent.id, notice()).await;
    assert!(!report.email_sent);
    assert!(report.notification_id.is_some());
    assert_eq!(channel.sent.load(Ordering::SeqCst), 1);

    Ok(())
}

#[tokio::test]
async fn test_preferences_for_unknown_user() -> anyhow::Result<()> {
    let t = setup().await?;
    let app = api::create_app(t.ctx.clone(), Arc::new(t.settings.clone()));

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/api/users/{}/notifications", Uuid::new_v4()))
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"email":true,"sms":false}"#))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    Ok(())
}
