//! Subscription renewal timing and failure handling under paused time.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{discover, fake_control_point, renewal_error, FakeTransport};
use control_point::{ControlPointError, ServiceEvent, SubscriptionError};
use tokio::time::{sleep, Instant};

#[tokio::test(start_paused = true)]
async fn test_renewal_armed_five_seconds_before_expiry() {
    let transport = Arc::new(FakeTransport::new().with_lease(Duration::from_secs(300)));
    let (control_point, _) = fake_control_point(Arc::clone(&transport));
    let device = discover(&control_point, "uuid:kitchen").await;

    let start = Instant::now();
    let _events = device.service("RenderingControl").unwrap().subscribe().await.unwrap();

    sleep(Duration::from_secs(294)).await;
    assert_eq!(transport.renewal_count(), 0);

    sleep(Duration::from_secs(2)).await;
    let renewals = transport.renewals.lock().clone();
    assert_eq!(renewals.len(), 1);
    assert_eq!(renewals[0].0, "uuid:sub-1");
    assert_eq!(renewals[0].1 - start, Duration::from_secs(295));
}

#[tokio::test(start_paused = true)]
async fn test_successful_renewal_rearms_with_granted_lease() {
    let transport = Arc::new(FakeTransport::new().with_lease(Duration::from_secs(300)));
    transport.script_renewal(Ok(Duration::from_secs(60)));
    let (control_point, _) = fake_control_point(Arc::clone(&transport));
    let device = discover(&control_point, "uuid:kitchen").await;

    let start = Instant::now();
    let service = Arc::clone(device.service("RenderingControl").unwrap());
    let _events = service.subscribe().await.unwrap();

    sleep(Duration::from_secs(295 + 56)).await;

    let renewals = transport.renewals.lock().clone();
    assert_eq!(renewals.len(), 2);
    assert_eq!(renewals[1].1 - start, Duration::from_secs(295 + 55));
    assert!(service.subscription_id().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_failed_renewal_drops_subscription_without_retry() {
    let transport = Arc::new(FakeTransport::new().with_lease(Duration::from_secs(300)));
    transport.script_renewal(Err(renewal_error()));
    let (control_point, router) = fake_control_point(Arc::clone(&transport));
    let device = discover(&control_point, "uuid:kitchen").await;
    let service = Arc::clone(device.service("RenderingControl").unwrap());
    let mut events = service.subscribe().await.unwrap();

    match events.recv().await {
        Some(ServiceEvent::SubscriptionLost(SubscriptionError::RenewalFailed { sid, .. })) => {
            assert_eq!(sid, "uuid:sub-1");
        }
        other => panic!("expected RenewalFailed, got {other:?}"),
    }
    assert_eq!(events.recv().await, None);

    assert!(!control_point.subscriptions().is_active("uuid:sub-1"));
    assert!(!router.is_registered("uuid:sub-1").await);
    assert!(service.subscription_id().is_none());

    sleep(Duration::from_secs(3600)).await;
    assert_eq!(transport.renewal_count(), 1);

    // The owner may start over.
    let _events = service.subscribe().await.unwrap();
    assert_eq!(service.subscription_id().as_deref(), Some("uuid:sub-2"));
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_cancels_renewal() {
    let transport = Arc::new(FakeTransport::new().with_lease(Duration::from_secs(300)));
    let (control_point, _) = fake_control_point(Arc::clone(&transport));
    let device = discover(&control_point, "uuid:kitchen").await;
    let service = device.service("RenderingControl").unwrap();
    let _events = service.subscribe().await.unwrap();

    service.unsubscribe().await;
    sleep(Duration::from_secs(1000)).await;

    assert_eq!(transport.renewal_count(), 0);
    assert_eq!(*transport.unsubscribed.lock(), vec!["uuid:sub-1".to_string()]);
    assert!(service.subscribe().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_state_change_routed_by_sid() {
    let transport = Arc::new(FakeTransport::new());
    let (control_point, router) = fake_control_point(Arc::clone(&transport));
    let device = discover(&control_point, "uuid:kitchen").await;
    let mut rendering = device.service("RenderingControl").unwrap().subscribe().await.unwrap();
    let mut transport_events = device.service("AVTransport").unwrap().subscribe().await.unwrap();

    let body = r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
        <e:property><TransportState>PLAYING</TransportState></e:property>
    </e:propertyset>"#;
    assert!(router.route_event("uuid:sub-2".to_string(), Some(4), body.to_string()).await);
    assert!(!router.route_event("uuid:unknown".to_string(), None, body.to_string()).await);

    assert_eq!(
        transport_events.recv().await,
        Some(ServiceEvent::StateChange {
            seq: Some(4),
            properties: vec![("TransportState".to_string(), "PLAYING".to_string())],
        })
    );
    assert!(rendering.try_recv().is_err());
}

#[tokio::test]
async fn test_subscribe_after_forget_is_refused() {
    let transport = Arc::new(FakeTransport::new());
    let (control_point, _) = fake_control_point(Arc::clone(&transport));
    let device = discover(&control_point, "uuid:kitchen").await;

    control_point.forget(&device).await;

    let result = device.service("RenderingControl").unwrap().subscribe().await;
    assert!(matches!(result, Err(ControlPointError::DeviceForgotten(udn)) if udn == "uuid:kitchen"));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_subscribe_opens_one_lease() {
    let transport = Arc::new(FakeTransport::new());
    let (control_point, _) = fake_control_point(Arc::clone(&transport));
    let device = discover(&control_point, "uuid:kitchen").await;
    let service = device.service("RenderingControl").unwrap();

    let (first, second) = tokio::join!(service.subscribe(), service.subscribe());

    assert!(first.is_ok());
    assert!(matches!(second, Err(ControlPointError::SubscribeInProgress(_))));
    assert_eq!(control_point.subscriptions().active_count(), 1);
    assert_eq!(service.subscription_id().as_deref(), Some("uuid:sub-1"));

    service.unsubscribe().await;
    assert_eq!(control_point.subscriptions().active_count(), 0);
    assert_eq!(*transport.unsubscribed.lock(), vec!["uuid:sub-1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_subscribe_frees_the_service() {
    let transport = Arc::new(FakeTransport::new());
    let (control_point, _) = fake_control_point(Arc::clone(&transport));
    let device = discover(&control_point, "uuid:kitchen").await;
    let service = device.service("RenderingControl").unwrap();

    // Drop the request while the device has not answered yet.
    let mut pending = Box::pin(service.subscribe());
    tokio::select! {
        biased;
        _ = &mut pending => panic!("the fake transport yields before answering"),
        _ = std::future::ready(()) => {}
    }
    drop(pending);

    assert!(service.subscribe().await.is_ok());
    assert_eq!(control_point.subscriptions().active_count(), 1);
}
