mod common;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use common::{eventually, within, TestServer, MS};
use latency_dash::metrics::Event;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(server: &TestServer) -> Client {
    let url = format!("ws://{}/ws", server.addr);
    let (client, _) = connect_async(url).await.unwrap();
    client
}

async fn send_json(client: &mut Client, value: Value) {
    client.send(Message::Text(value.to_string())).await.unwrap();
}

/// Next text frame as JSON, skipping control frames.
async fn next_json(client: &mut Client) -> Value {
    loop {
        let message = within(client.next()).await.expect("stream ended").unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn subscribe(client: &mut Client, target: &str, split: bool) -> Value {
    let request = json!({"target": target, "action": "subscribe", "splitByMetadata": split});
    send_json(client, request).await;
    next_json(client).await
}

#[tokio::test]
async fn subscriber_receives_live_updates() {
    let server = TestServer::start().await;
    let mut client = connect(&server).await;

    let ack = subscribe(&mut client, "prod", false).await;
    assert_eq!(ack["type"], "subscriptionAck");
    assert_eq!(ack["success"], true);

    for ts in [0, 40 * MS] {
        let event = Event::new("prod", "svc-a", ts);
        server.aggregator.try_ingest(event).unwrap();
    }

    let first = next_json(&mut client).await;
    let second = next_json(&mut client).await;
    assert_eq!(first["type"], "metricsUpdate");
    assert_eq!(first["count"], 1);
    assert_eq!(first["min"], 0.0);
    assert_eq!(second["count"], 2);
    assert_eq!(second["max"], 40.0);
    assert_eq!(second["key"], "svc-a");
}

#[tokio::test]
async fn late_subscriber_gets_snapshot_first() {
    let server = TestServer::start().await;
    for (i, key) in ["a", "b"].iter().enumerate() {
        let event = Event::new("prod", *key, i as i64);
        server.aggregator.try_ingest(event).unwrap();
    }
    eventually(|| server.aggregator.status().processed_events == 2).await;

    let mut client = connect(&server).await;
    let ack = subscribe(&mut client, "prod", false).await;
    assert_eq!(ack["type"], "subscriptionAck");

    let a = next_json(&mut client).await;
    let b = next_json(&mut client).await;
    assert_eq!(a["key"], "a");
    assert_eq!(b["key"], "b");
    assert_eq!(a["count"], 1);
}

#[tokio::test]
async fn split_and_combined_consumers_see_their_own_series() {
    let server = TestServer::start().await;
    let mut splitter = connect(&server).await;
    let mut combiner = connect(&server).await;
    subscribe(&mut splitter, "prod", true).await;
    subscribe(&mut combiner, "prod", false).await;

    for (i, tier) in ["free", "premium"].iter().enumerate() {
        let event = Event::new("prod", "svc", i as i64 * 10 * MS)
            .with_metadata("tier", *tier);
        server.aggregator.try_ingest(event).unwrap();
    }

    let s1 = next_json(&mut splitter).await;
    let s2 = next_json(&mut splitter).await;
    assert_eq!(s1["metadata"]["tier"], "free");
    assert_eq!(s2["metadata"]["tier"], "premium");
    assert_eq!(s2["count"], 1);

    let c1 = next_json(&mut combiner).await;
    let c2 = next_json(&mut combiner).await;
    assert_eq!(c1["metadata"], json!({}));
    assert_eq!(c2["count"], 2);
    assert_eq!(c2["max"], 10.0);
}

#[tokio::test]
async fn unsubscribe_without_subscription_is_refused() {
    let server = TestServer::start().await;
    let mut client = connect(&server).await;

    send_json(&mut client, json!({"target": "prod", "action": "unsubscribe"})).await;
    let ack = next_json(&mut client).await;
    assert_eq!(ack["type"], "subscriptionAck");
    assert_eq!(ack["success"], false);
    assert_eq!(ack["message"], "Not subscribed to prod");

    // The connection stays usable.
    let ack = subscribe(&mut client, "prod", false).await;
    assert_eq!(ack["success"], true);
}

#[tokio::test]
async fn malformed_request_drops_the_consumer() {
    let server = TestServer::start().await;
    let mut client = connect(&server).await;
    subscribe(&mut client, "prod", false).await;
    assert_eq!(server.hub.consumer_count(), 1);

    client.send(Message::Text("{not json".into())).await.unwrap();

    eventually(|| server.hub.consumer_count() == 0).await;
    assert_eq!(server.aggregator.status().subscriptions, 0);
}

#[tokio::test]
async fn closing_the_socket_releases_subscriptions() {
    let server = TestServer::start().await;
    let mut client = connect(&server).await;
    subscribe(&mut client, "prod", true).await;
    client.close(None).await.unwrap();

    eventually(|| server.hub.consumer_count() == 0).await;

    let monitor = server.aggregator.monitor("prod").unwrap();
    assert_eq!(monitor.subscriber_count(), 0);
    assert!(monitor.quiescent_since().is_some());
}
