use std::sync::Arc;

use anyhow::Result;
use notification_pipeline::{
    broker::topology::QueueKind,
    error::DispatchError,
    models::notification::{Channel, NotificationIntent, Priority, QueueEnvelope},
    router::{NotificationRouter, RouteOutcome},
};
use serde_json::json;

use crate::support::RecordingPublisher;

fn router() -> (Arc<RecordingPublisher>, NotificationRouter) {
    let publisher = Arc::new(RecordingPublisher::new());
    (publisher.clone(), NotificationRouter::new(publisher))
}

/// Test: Each priority selects exactly one email queue
#[tokio::test]
async fn test_email_routing_selects_exactly_one_queue() -> Result<()> {
    let cases = [
        (Priority::Low, QueueKind::DigestEmail),
        (Priority::Medium, QueueKind::BatchEmail),
        (Priority::High, QueueKind::ImmediateEmail),
        (Priority::Unknown, QueueKind::BatchEmail),
    ];

    for (priority, expected) in cases {
        let (publisher, router) = router();
        let intent = NotificationIntent::new(3, "comment", "New comment", priority);

        router.route(&intent, &[Channel::Email]).await?;

        assert_eq!(publisher.queues(), vec![expected], "priority {}", priority);
    }

    Ok(())
}

/// Test: A like with both channels lands on the in-app and digest queues only
#[tokio::test]
async fn test_like_fans_out_to_inapp_and_digest() -> Result<()> {
    let (publisher, router) = router();
    let intent = NotificationIntent::new(1, "like", "New like", Priority::Low);

    let outcome = router.route(&intent, &[Channel::InApp, Channel::Email]).await?;

    assert_eq!(
        publisher.queues(),
        vec![QueueKind::InApp, QueueKind::DigestEmail]
    );

    let RouteOutcome::Published { message_id, queues } = outcome else {
        panic!("expected a published outcome");
    };
    assert_eq!(queues.len(), 2);

    for published in publisher.published() {
        let envelope: QueueEnvelope = serde_json::from_slice(&published.payload)?;

        assert_eq!(envelope.message_id, Some(message_id));
        assert_eq!(envelope.user_id, 1);
        assert_eq!(envelope.notification_type, "like");
        assert_eq!(published.options.priority, Some(1));
    }

    Ok(())
}

/// Test: High priority carries the top broker priority weight
#[tokio::test]
async fn test_high_priority_publishes_with_weight_ten() -> Result<()> {
    let (publisher, router) = router();
    let intent = NotificationIntent::new(8, "mention", "You were mentioned", Priority::High)
        .with_message("@you check this")
        .with_data(json!({"postId": 12}));

    router.route(&intent, &[Channel::InApp, Channel::Email]).await?;

    let published = publisher.published();
    assert_eq!(
        publisher.queues(),
        vec![QueueKind::InApp, QueueKind::ImmediateEmail]
    );
    assert!(published.iter().all(|p| p.options.priority == Some(10)));

    let envelope: QueueEnvelope = serde_json::from_slice(&published[1].payload)?;
    assert_eq!(envelope.data["postId"], 12);
    assert_eq!(envelope.message.as_deref(), Some("@you check this"));

    Ok(())
}

/// Test: An unrecognised priority string from a producer routes to batch
#[tokio::test]
async fn test_unknown_priority_from_json_routes_to_batch() -> Result<()> {
    let (publisher, router) = router();
    let intent: NotificationIntent = serde_json::from_value(json!({
        "userId": 4,
        "type": "follow",
        "title": "New follower",
        "priority": "urgent"
    }))?;

    router.route(&intent, &[Channel::Email]).await?;

    assert_eq!(publisher.queues(), vec![QueueKind::BatchEmail]);
    assert_eq!(publisher.published()[0].options.priority, Some(5));

    Ok(())
}

/// Test: No enabled channel publishes nothing
#[tokio::test]
async fn test_no_channels_is_skipped() -> Result<()> {
    let (publisher, router) = router();
    let intent = NotificationIntent::new(1, "like", "New like", Priority::Medium);

    let outcome = router.route(&intent, &[]).await?;

    assert_eq!(outcome, RouteOutcome::Skipped);
    assert!(publisher.published().is_empty());

    Ok(())
}

/// Test: Invalid intents are rejected before anything is published
#[tokio::test]
async fn test_invalid_intent_is_rejected() -> Result<()> {
    let (publisher, router) = router();

    let missing_type = NotificationIntent::new(1, "", "Title", Priority::Low);
    let missing_user = NotificationIntent::new(0, "like", "Title", Priority::Low);

    assert!(matches!(
        router.route(&missing_type, &[Channel::InApp]).await,
        Err(DispatchError::InvalidIntent(_))
    ));
    assert!(matches!(
        router.route(&missing_user, &[Channel::InApp]).await,
        Err(DispatchError::InvalidIntent(_))
    ));
    assert!(publisher.published().is_empty());

    Ok(())
}

/// Test: An unreachable broker surfaces as BrokerUnavailable
#[tokio::test]
async fn test_broker_down_surfaces_broker_unavailable() -> Result<()> {
    let (publisher, router) = router();
    publisher.set_unavailable(true);

    let intent = NotificationIntent::new(1, "comment", "New comment", Priority::High);
    let result = router.route(&intent, &[Channel::InApp, Channel::Email]).await;

    assert!(matches!(result, Err(DispatchError::BrokerUnavailable(_))));

    publisher.set_unavailable(false);
    tokio_test::assert_ok!(router.route(&intent, &[Channel::InApp]).await);

    Ok(())
}
