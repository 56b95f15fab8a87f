use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use notification_dispatch::{
    clients::{memory::InMemoryStore, publisher::Publisher, store::NotificationStore},
    error::{GatewayError, PublishError},
    gateway::{Gateway, GatewaySettings},
    models::{
        notification::{NotificationType, QueueMessage, SubmitNotification, SubmitOutcome},
        status::{DeliveryStatus, NotificationStatus, StatusUpdate},
    },
};
use serde_json::json;
use tokio::time::sleep;

use crate::common::{ANN_ID, BOB_ID, RecordingPublisher, submission, test_gateway};

/// Test: Distinct valid requests are each published once and accepted
#[tokio::test]
async fn test_distinct_requests_are_each_published() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let publisher = Arc::new(RecordingPublisher::default());
    let gateway = test_gateway(store, publisher.clone(), GatewaySettings::default());

    let first = gateway
        .submit(submission("email", ANN_ID, "welcome", Some("req-1"), json!({"name": "Ann"})))
        .await?;
    let second = gateway
        .submit(submission("push", BOB_ID, "order_shipped", Some("req-2"), json!({})))
        .await?;

    assert_eq!(first, SubmitOutcome::Accepted { request_id: "req-1".to_string() });
    assert_eq!(second, SubmitOutcome::Accepted { request_id: "req-2".to_string() });

    let published = publisher.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].0, NotificationType::Email);
    assert_eq!(published[0].1.variables.get("name"), Some(&json!("Ann")));
    assert_eq!(published[1].0, NotificationType::Push);

    Ok(())
}

/// Test: Concurrent submissions with one request_id publish exactly once
#[tokio::test]
async fn test_concurrent_duplicates_publish_once() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let publisher = Arc::new(RecordingPublisher::default());
    let gateway = Arc::new(test_gateway(store, publisher.clone(), GatewaySettings::default()));

    let mut handles = vec![];
    for _ in 0..20 {
        let gateway = Arc::clone(&gateway);
        handles.push(tokio::spawn(async move {
            gateway
                .submit(submission("email", ANN_ID, "welcome", Some("same-request"), json!({})))
                .await
        }));
    }

    let mut accepted = 0;
    let mut duplicates = 0;
    for result in futures_util::future::join_all(handles).await {
        match result?? {
            SubmitOutcome::Accepted { .. } => accepted += 1,
            SubmitOutcome::Duplicate { .. } => duplicates += 1,
        }
    }

    assert_eq!(accepted, 1, "Exactly one caller should win the claim");
    assert_eq!(duplicates, 19);
    assert_eq!(publisher.count(), 1);

    Ok(())
}

/// Test: Every validation problem is reported together and nothing is claimed
#[tokio::test]
async fn test_validation_errors_are_collected() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let publisher = Arc::new(RecordingPublisher::default());
    let gateway = test_gateway(store, publisher.clone(), GatewaySettings::default());

    let invalid = SubmitNotification {
        notification_type: Some("sms".to_string()),
        user_id: Some("not-a-uuid".to_string()),
        template_code: Some("bad code!".to_string()),
        variables: Some(json!(["not", "an", "object"])),
        request_id: Some("req-invalid".to_string()),
        priority: None,
        metadata: None,
    };

    match gateway.submit(invalid).await {
        Err(GatewayError::Validation(errors)) => assert_eq!(errors.len(), 4, "{:?}", errors),
        other => panic!("expected validation error, got {:?}", other),
    }
    assert_eq!(publisher.count(), 0);

    // The request id was never claimed, so a corrected request goes through.
    let outcome = gateway
        .submit(submission("email", ANN_ID, "welcome", Some("req-invalid"), json!({})))
        .await?;
    assert!(matches!(outcome, SubmitOutcome::Accepted { .. }));

    Ok(())
}

/// Test: A template code that is a relative path segment is refused
#[tokio::test]
async fn test_dot_segment_template_code_is_rejected() -> Result<()> {
    let publisher = Arc::new(RecordingPublisher::default());
    let gateway = test_gateway(
        Arc::new(InMemoryStore::new()),
        publisher.clone(),
        GatewaySettings::default(),
    );

    match gateway
        .submit(submission("email", ANN_ID, "..", Some("req-dots"), json!({})))
        .await
    {
        Err(GatewayError::Validation(errors)) => {
            assert_eq!(errors.len(), 1);
            assert!(errors[0].contains("template_code"));
        }
        other => panic!("expected validation error, got {:?}", other),
    }
    assert_eq!(publisher.count(), 0);

    Ok(())
}

/// Test: Missing required fields are named in the error list
#[tokio::test]
async fn test_missing_fields_are_reported() -> Result<()> {
    let gateway = test_gateway(
        Arc::new(InMemoryStore::new()),
        Arc::new(RecordingPublisher::default()),
        GatewaySettings::default(),
    );

    let Err(GatewayError::Validation(errors)) = gateway.submit(SubmitNotification::default()).await
    else {
        panic!("expected validation error");
    };

    assert!(errors.iter().any(|e| e.contains("notification_type")));
    assert!(errors.iter().any(|e| e.contains("user_id")));
    assert!(errors.iter().any(|e| e.contains("template_code")));

    Ok(())
}

/// Test: A request without request_id is assigned one and queued as pending
#[tokio::test]
async fn test_request_id_is_assigned_and_pending_recorded() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let publisher = Arc::new(RecordingPublisher::default());
    let gateway = test_gateway(store, publisher.clone(), GatewaySettings::default());

    let outcome = gateway
        .submit(submission("email", ANN_ID, "welcome", None, json!({})))
        .await?;

    let request_id = outcome.request_id().to_string();
    assert!(uuid::Uuid::parse_str(&request_id).is_ok());
    assert_eq!(publisher.published()[0].1.request_id, request_id);

    let status = gateway.get_status("email", Some(request_id.as_str())).await?;
    assert_eq!(status.status, DeliveryStatus::Pending);

    Ok(())
}

/// Publisher whose consumer finishes delivery before the confirm comes back.
struct InstantDeliveryPublisher {
    store: Arc<InMemoryStore>,
}

#[async_trait]
impl Publisher for InstantDeliveryPublisher {
    async fn publish(
        &self,
        notification_type: NotificationType,
        message: &QueueMessage,
    ) -> Result<(), PublishError> {
        let delivered = NotificationStatus::new(
            notification_type,
            message.request_id.clone(),
            DeliveryStatus::Delivered,
        );
        self.store
            .put_status(&delivered, Duration::from_secs(60))
            .await
            .map_err(|e| PublishError::Connection(e.to_string()))
    }
}

/// Test: A status written by a worker during publish is not replaced by pending
#[tokio::test]
async fn test_worker_status_survives_slow_publish_confirm() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let gateway = Gateway::new(
        store.clone(),
        Arc::new(InstantDeliveryPublisher {
            store: store.clone(),
        }),
        GatewaySettings::default(),
    );

    let outcome = gateway
        .submit(submission("email", ANN_ID, "welcome", Some("r1"), json!({})))
        .await?;
    assert!(matches!(outcome, SubmitOutcome::Accepted { .. }));

    let status = gateway.get_status("email", Some("r1")).await?;
    assert_eq!(status.status, DeliveryStatus::Delivered);

    Ok(())
}

/// Test: A failed publish leaves a failed status carrying the broker error
#[tokio::test]
async fn test_publish_failure_records_failed_status() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let gateway = test_gateway(
        store,
        Arc::new(RecordingPublisher::failing()),
        GatewaySettings::default(),
    );

    let result = gateway
        .submit(submission("push", BOB_ID, "order", Some("req-down"), json!({})))
        .await;
    assert!(matches!(result, Err(GatewayError::Publish(_))));

    let status = gateway.get_status("push", Some("req-down")).await?;
    assert_eq!(status.status, DeliveryStatus::Failed);
    assert!(
        status
            .error
            .as_deref()
            .is_some_and(|e| e.contains("broker unreachable"))
    );

    Ok(())
}

/// Test: By default a failed publish keeps the idempotency key
#[tokio::test]
async fn test_publish_failure_keeps_key_by_default() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let publisher = Arc::new(RecordingPublisher::failing());
    let gateway = test_gateway(store, publisher.clone(), GatewaySettings::default());

    let result = gateway
        .submit(submission("email", ANN_ID, "welcome", Some("req-lost"), json!({})))
        .await;
    assert!(matches!(result, Err(GatewayError::Publish(_))));

    publisher.set_failing(false);
    let retry = gateway
        .submit(submission("email", ANN_ID, "welcome", Some("req-lost"), json!({})))
        .await?;

    assert!(matches!(retry, SubmitOutcome::Duplicate { .. }));
    assert_eq!(publisher.count(), 0);

    Ok(())
}

/// Test: With the release switch a failed publish can be retried
#[tokio::test]
async fn test_publish_failure_releases_key_when_enabled() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let publisher = Arc::new(RecordingPublisher::failing());
    let settings = GatewaySettings {
        release_key_on_publish_failure: true,
        ..GatewaySettings::default()
    };
    let gateway = test_gateway(store, publisher.clone(), settings);

    let result = gateway
        .submit(submission("email", ANN_ID, "welcome", Some("req-retry"), json!({})))
        .await;
    assert!(matches!(result, Err(GatewayError::Publish(_))));

    publisher.set_failing(false);
    let retry = gateway
        .submit(submission("email", ANN_ID, "welcome", Some("req-retry"), json!({})))
        .await?;

    assert!(matches!(retry, SubmitOutcome::Accepted { .. }));
    assert_eq!(publisher.count(), 1);

    Ok(())
}

/// Test: Status updates overwrite the whole record
#[tokio::test]
async fn test_status_update_replaces_previous_record() -> Result<()> {
    let gateway = test_gateway(
        Arc::new(InMemoryStore::new()),
        Arc::new(RecordingPublisher::default()),
        GatewaySettings::default(),
    );

    gateway
        .update_status(
            "push",
            StatusUpdate {
                notification_id: Some("n-1".to_string()),
                status: Some("failed".to_string()),
                timestamp: None,
                error: Some("device offline".to_string()),
            },
        )
        .await?;

    gateway
        .update_status(
            "push",
            StatusUpdate {
                notification_id: Some("n-1".to_string()),
                status: Some("delivered".to_string()),
                timestamp: None,
                error: None,
            },
        )
        .await?;

    let status = gateway.get_status("push", Some("n-1")).await?;
    assert_eq!(status.status, DeliveryStatus::Delivered);
    assert_eq!(status.error, None);

    // Records are keyed by type as well as id.
    assert!(matches!(
        gateway.get_status("email", Some("n-1")).await,
        Err(GatewayError::NotFound)
    ));

    Ok(())
}

/// Test: Status records disappear after their TTL
#[tokio::test]
async fn test_status_expires_after_ttl() -> Result<()> {
    let settings = GatewaySettings {
        status_ttl: Duration::from_millis(50),
        ..GatewaySettings::default()
    };
    let gateway = test_gateway(
        Arc::new(InMemoryStore::new()),
        Arc::new(RecordingPublisher::default()),
        settings,
    );

    gateway
        .update_status(
            "email",
            StatusUpdate {
                notification_id: Some("n-ttl".to_string()),
                status: Some("delivered".to_string()),
                timestamp: None,
                error: None,
            },
        )
        .await?;
    assert!(gateway.get_status("email", Some("n-ttl")).await.is_ok());

    sleep(Duration::from_millis(120)).await;

    assert!(matches!(
        gateway.get_status("email", Some("n-ttl")).await,
        Err(GatewayError::NotFound)
    ));

    Ok(())
}

/// Test: Status updates are validated field by field
#[tokio::test]
async fn test_status_update_validation() -> Result<()> {
    let gateway = test_gateway(
        Arc::new(InMemoryStore::new()),
        Arc::new(RecordingPublisher::default()),
        GatewaySettings::default(),
    );

    let result = gateway
        .update_status(
            "sms",
            StatusUpdate {
                notification_id: Some("  ".to_string()),
                status: Some("sent".to_string()),
                timestamp: None,
                error: None,
            },
        )
        .await;

    match result {
        Err(GatewayError::Validation(errors)) => assert_eq!(errors.len(), 3, "{:?}", errors),
        other => panic!("expected validation error, got {:?}", other),
    }

    assert!(matches!(
        gateway.get_status("email", None).await,
        Err(GatewayError::Validation(_))
    ));

    Ok(())
}
