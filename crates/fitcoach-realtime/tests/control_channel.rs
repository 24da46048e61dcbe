//! Integration tests for `PeerConnection` and `ControlChannel` on fake
//! transports, below the orchestrator.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{FakeNegotiator, FakeTransportFactory, Scenario};
use fitcoach_realtime::channel::{CONTROL_CHANNEL_LABEL, ControlChannel};
use fitcoach_realtime::controller::SessionController;
use fitcoach_realtime::error::ChannelError;
use fitcoach_realtime::peer::{OfferParams, PeerConnection};
use fitcoach_realtime::protocol::{ClientEvent, ServerEvent};
use fitcoach_realtime::transport::{ChannelState, DataChannelTransport, PeerState};
use fitcoach_realtime::CoachMode;
use serde_json::json;

async fn peer_and_channel(scenario: Scenario) -> (Arc<FakeTransportFactory>, PeerConnection, ControlChannel) {
    let factory = Arc::new(FakeTransportFactory::new(scenario));
    let peer = PeerConnection::create(factory.as_ref()).await.unwrap();
    let channel = ControlChannel::create(&peer).await.unwrap();
    (factory, peer, channel)
}

fn params() -> OfferParams {
    OfferParams {
        model: "gpt-realtime".into(),
        voice: "alloy".into(),
        instructions: "Be a coach.".into(),
    }
}

#[tokio::test]
async fn channel_uses_the_events_label() {
    let (factory, _peer, channel) = peer_and_channel(Scenario::default()).await;
    assert_eq!(factory.last().channel().label(), CONTROL_CHANNEL_LABEL);
    assert_eq!(channel.state(), ChannelState::Connecting);
}

#[tokio::test]
async fn send_before_open_is_dropped() {
    let (factory, _peer, channel) = peer_and_channel(Scenario::default()).await;

    assert!(!channel.send(&ClientEvent::ResponseCreate).await);
    assert!(factory.last().channel().sent().is_empty());
}

#[tokio::test]
async fn negotiate_then_send() {
    let (factory, peer, channel) = peer_and_channel(Scenario::default()).await;
    let negotiator = FakeNegotiator::answering();

    peer.negotiate(&negotiator, params(), Duration::from_secs(15))
        .await
        .unwrap();
    channel.wait_until_open(Duration::from_secs(10)).await.unwrap();

    assert!(peer.is_connected());
    assert!(channel.send(&ClientEvent::user_text("hi")).await);
    assert_eq!(
        factory.last().channel().sent()[0],
        json!({
            "type": "conversation.item.create",
            "item": {
                "type": "message",
                "role": "user",
                "content": [{"type": "input_text", "text": "hi"}]
            }
        })
    );
    assert_eq!(negotiator.requests()[0].voice, "alloy");
}

#[tokio::test]
async fn channel_error_before_open_fails_the_wait() {
    let (factory, _peer, channel) = peer_and_channel(Scenario::default()).await;

    factory.last().channel().fail("sctp association failed");

    assert_eq!(
        channel.wait_until_open(Duration::from_secs(10)).await,
        Err(ChannelError::Failed("sctp association failed".into()))
    );
}

#[tokio::test]
async fn channel_close_before_open_fails_the_wait() {
    let (factory, _peer, channel) = peer_and_channel(Scenario::default()).await;

    factory.last().channel().close_remote();

    assert_eq!(
        channel.wait_until_open(Duration::from_secs(10)).await,
        Err(ChannelError::ClosedBeforeOpen)
    );
}

#[tokio::test]
async fn inbound_events_reach_subscribers_in_order() {
    let (factory, _peer, channel) = peer_and_channel(Scenario::default()).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = channel.subscribe(move |event: &ServerEvent| {
        sink.lock().unwrap().push(event.event_type().to_string());
    });

    let fake = factory.last().channel();
    fake.open();
    fake.push(&json!({"type": "session.created", "session": {}}));
    fake.push(&json!({"type": "some.future.event"}));
    fake.push(&json!({"type": "session.updated", "session": {}}));

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["session.created".to_string(), "session.updated".to_string()]
    );
    assert!(channel.is_session_configured());
}

#[tokio::test]
async fn close_resets_configuration_and_subscribers() {
    let (factory, _peer, channel) = peer_and_channel(Scenario::default()).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let _sub = channel.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let fake = factory.last().channel();
    fake.open();
    fake.push(&json!({"type": "session.updated"}));
    assert!(channel.is_session_configured());

    channel.close().await;
    channel.close().await;
    fake.push(&json!({"type": "session.updated"}));

    assert!(!channel.is_session_configured());
    assert_eq!(channel.state(), ChannelState::Closed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!channel.send(&ClientEvent::ResponseCancel).await);
}

#[tokio::test(start_paused = true)]
async fn configure_returns_false_without_ack() {
    let (factory, peer, channel) = peer_and_channel(Scenario {
        auto_ack: false,
        ..Scenario::default()
    })
    .await;
    peer.negotiate(&FakeNegotiator::answering(), params(), Duration::from_secs(15))
        .await
        .unwrap();
    let controller = SessionController::new(Arc::new(channel), Duration::from_secs(3));

    let config = common::session_config().with_instructions("Keep it short.");
    let acked = controller
        .configure("You are a coach.", CoachMode::Training, &config)
        .await;

    assert!(!acked);
    let update = &factory.last().channel().sent()[0];
    assert_eq!(update["type"], "session.update");
    assert_eq!(
        update["session"]["instructions"],
        "You are a coach.\n\nKeep it short."
    );
    assert_eq!(update["session"]["turn_detection"]["type"], "server_vad");
}

#[tokio::test]
async fn configure_twice_sends_once() {
    let (factory, peer, channel) = peer_and_channel(Scenario::default()).await;
    peer.negotiate(&FakeNegotiator::answering(), params(), Duration::from_secs(15))
        .await
        .unwrap();
    let controller = SessionController::new(Arc::new(channel), Duration::from_secs(3));
    let config = common::session_config();

    assert!(controller.configure("prompt", CoachMode::General, &config).await);
    assert!(controller.configure("prompt", CoachMode::General, &config).await);

    assert_eq!(factory.last().channel().sent_types(), vec!["session.update"]);
}

#[tokio::test]
async fn peer_close_is_idempotent_and_silences_listeners() {
    let (factory, peer, _channel) = peer_and_channel(Scenario::default()).await;
    let disconnects = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&disconnects);
    let _sub = peer.on_disconnect(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    peer.close().await;
    peer.close().await;
    factory.last().set_state(PeerState::Failed);

    assert_eq!(disconnects.load(Ordering::SeqCst), 0);
}
