use std::time::Duration;

use anyhow::Result;
use notification_dispatch::{
    clients::{
        collaborators::{DeliveryProvider, TemplateDirectory, UserDirectory},
        email::EmailClient,
        template::TemplateServiceClient,
        user::UserServiceClient,
    },
    error::{DeliveryError, Retryable},
    models::{notification::NotificationType, template::RenderedMessage},
};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path, query_param},
};

use crate::common::{ANN_ID, queue_message};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Test: User profiles are read from the service envelope with defaults applied
#[tokio::test]
async fn test_user_client_parses_profile() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("/api/v1/users/{}/", ANN_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "email": "ann@example.com",
                "first_name": "Ann",
                "prefers_push": false
            },
            "message": "ok"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = UserServiceClient::new(&server.uri(), TIMEOUT)?;
    let user = client.fetch_user(ANN_ID).await?;

    assert_eq!(user.email.as_deref(), Some("ann@example.com"));
    assert!(user.prefers_email);
    assert!(!user.prefers_push);
    assert_eq!(user.language, "en");
    assert_eq!(user.full_name(), "Ann");

    Ok(())
}

/// Test: Collaborator status codes are classified as transient or permanent
#[tokio::test]
async fn test_user_client_classifies_failures() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/users/missing/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/users/busy/"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/users/refused/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": "user deactivated"
        })))
        .mount(&server)
        .await;

    let client = UserServiceClient::new(&server.uri(), TIMEOUT)?;

    let missing = assert_err!(client.fetch_user("missing").await);
    assert!(matches!(missing, DeliveryError::Permanent(_)));
    assert!(!missing.is_retryable());

    let busy = assert_err!(client.fetch_user("busy").await);
    assert!(matches!(busy, DeliveryError::Transient { .. }));
    assert!(busy.is_retryable());

    let refused = assert_err!(client.fetch_user("refused").await);
    assert!(refused.to_string().contains("user deactivated"));
    assert!(!refused.is_retryable());

    Ok(())
}

/// Test: An unreachable service is a transient failure
#[tokio::test]
async fn test_unreachable_service_is_transient() -> Result<()> {
    // Nothing listens on port 1.
    let client = UserServiceClient::new("http://127.0.0.1:1", TIMEOUT)?;
    let err = assert_err!(client.fetch_user(ANN_ID).await);

    assert!(err.is_retryable());

    Ok(())
}

/// Test: Templates are requested in the user's language
#[tokio::test]
async fn test_template_client_sends_language() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/templates/welcome/"))
        .and(query_param("lang", "fr"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "notification_type": "email",
                "subject": "Bonjour {{name}}",
                "content": "Bienvenue"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = TemplateServiceClient::new(&server.uri(), TIMEOUT)?;
    let template = client.fetch_template("welcome", "fr").await?;

    assert_eq!(template.notification_type, NotificationType::Email);
    assert_eq!(template.subject.as_deref(), Some("Bonjour {{name}}"));

    Ok(())
}

/// Test: An undecodable template body is a permanent failure
#[tokio::test]
async fn test_template_client_rejects_bad_body() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/templates/broken/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let client = TemplateServiceClient::new(&server.uri(), TIMEOUT)?;
    let err = assert_err!(client.fetch_template("broken", "en").await);

    assert!(matches!(err, DeliveryError::Permanent(_)));

    Ok(())
}

/// Test: Dot-segment template codes never reach another service endpoint
#[tokio::test]
async fn test_template_client_refuses_dot_segments() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(0)
        .mount(&server)
        .await;

    let client = TemplateServiceClient::new(&server.uri(), TIMEOUT)?;

    for code in ["..", "."] {
        let err = assert_err!(client.fetch_template(code, "en").await);
        assert!(matches!(err, DeliveryError::Permanent(_)));
    }

    Ok(())
}

/// Test: Email delivery posts the rendered message with bearer auth
#[tokio::test]
async fn test_email_client_sends_mail() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/mail/send"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "personalizations": [{"to": [{"email": "ann@example.com"}]}],
            "from": {"email": "noreply@example.com"},
            "subject": "Hi Ann",
            "custom_args": {"request_id": "r1"}
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let client = EmailClient::new(&server.uri(), "test-key", "noreply@example.com", TIMEOUT)?;
    let rendered = RenderedMessage {
        subject: "Hi Ann".to_string(),
        body: "Welcome".to_string(),
    };

    let message = queue_message("r1", ANN_ID, "welcome", json!({}));
    assert_ok!(client.deliver("ann@example.com", &rendered, &message).await);

    Ok(())
}

/// Test: Provider throttling is transient, a rejected recipient is permanent
#[tokio::test]
async fn test_email_client_classifies_failures() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/mail/send"))
        .and(body_partial_json(json!({"subject": "throttled"})))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/mail/send"))
        .and(body_partial_json(json!({"subject": "rejected"})))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid recipient"))
        .mount(&server)
        .await;

    let client = EmailClient::new(&server.uri(), "test-key", "noreply@example.com", TIMEOUT)?;
    let message = queue_message("r2", ANN_ID, "welcome", json!({}));

    let throttled = RenderedMessage {
        subject: "throttled".to_string(),
        body: String::new(),
    };
    let err = assert_err!(client.deliver("ann@example.com", &throttled, &message).await);
    assert!(err.is_retryable());

    let rejected = RenderedMessage {
        subject: "rejected".to_string(),
        body: String::new(),
    };
    let err = assert_err!(client.deliver("ann@example.com", &rejected, &message).await);
    assert!(matches!(err, DeliveryError::Permanent(ref reason) if reason.contains("invalid recipient")));

    Ok(())
}
