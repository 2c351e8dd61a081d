use anyhow::Result;
use notification_pipeline::clients::email::{
    EmailProvider, OutgoingEmail, SendGridConfig, SendGridProvider,
};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

fn provider(server: &MockServer) -> SendGridProvider {
    SendGridProvider::new(SendGridConfig {
        api_key: "SG.test-key".to_string(),
        from_email: "noreply@example.com".to_string(),
        from_name: "Notifications".to_string(),
        api_url: server.uri(),
    })
}

fn email() -> OutgoingEmail {
    OutgoingEmail {
        to: "ana@example.com".to_string(),
        subject: "🔔 New comment".to_string(),
        html: "<p>Hello</p>".to_string(),
    }
}

/// Test: A 202 from SendGrid is a successful send with the expected request shape
#[tokio::test]
async fn test_sendgrid_accepts_email() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mail/send"))
        .and(header("authorization", "Bearer SG.test-key"))
        .and(body_partial_json(json!({
            "personalizations": [{"to": [{"email": "ana@example.com"}]}],
            "from": {"email": "noreply@example.com", "name": "Notifications"},
            "subject": "🔔 New comment",
            "content": [{"type": "text/html", "value": "<p>Hello</p>"}]
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    tokio_test::assert_ok!(provider(&server).send(&email()).await);

    Ok(())
}

/// Test: SendGrid error bodies are surfaced in the error message
#[tokio::test]
async fn test_sendgrid_error_carries_status_and_messages() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mail/send"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errors": [
                {"message": "The from address does not match a verified Sender Identity."},
                {"message": "Invalid recipient."}
            ]
        })))
        .mount(&server)
        .await;

    let error = tokio_test::assert_err!(provider(&server).send(&email()).await);
    let message = error.to_string();

    assert!(message.contains("400"));
    assert!(message.contains("verified Sender Identity"));
    assert!(message.contains("Invalid recipient."));

    Ok(())
}

/// Test: A non-JSON error body is passed through verbatim
#[tokio::test]
async fn test_sendgrid_plain_error_body() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mail/send"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let error = tokio_test::assert_err!(provider(&server).send(&email()).await);

    assert!(error.to_string().contains("upstream unavailable"));

    Ok(())
}
