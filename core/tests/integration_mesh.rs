// Integration test: two relays, two clients, one offline delivery
//
// This test verifies that:
// - Relays seeded with each other discover and link up
// - A message for an offline identity is forwarded to its residence relay
// - That relay queues it and hands it over once the identity attaches

use meshchat_core::{
    residence, ClientConfig, ClientEvent, ClientState, IdentityKeys, MeshClient, NodeAddress,
    NodeSet, RelayServer, RelayServerConfig,
};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout, Instant};

async fn bind() -> (TcpListener, NodeAddress) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, NodeAddress::from_parts("127.0.0.1", port).unwrap())
}

fn relay_config(own: &NodeAddress, seed: &NodeAddress) -> RelayServerConfig {
    let mut config = RelayServerConfig::new(own.clone());
    config.seed_nodes = [seed.clone()].into_iter().collect();
    config.discovery_timeout = Duration::from_secs(2);
    config.reconnect_interval = Duration::from_millis(200);
    config
}

/// A fresh identity residing on `home`
fn identity_on(nodes: &NodeSet, home: &NodeAddress) -> IdentityKeys {
    loop {
        let keys = IdentityKeys::generate();
        if residence(&keys.public_key_base58(), nodes).as_ref() == Some(home) {
            return keys;
        }
    }
}

async fn wait_for(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_offline_delivery_across_two_relays() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .try_init()
        .ok();

    let (listener_a, node_a) = bind().await;
    let (listener_b, node_b) = bind().await;

    let relay_a = RelayServer::new(relay_config(&node_a, &node_b)).unwrap();
    let relay_b = RelayServer::new(relay_config(&node_b, &node_a)).unwrap();
    let handle_a = relay_a.serve(listener_a).unwrap();
    let handle_b = relay_b.serve(listener_b).unwrap();
    println!("✓ Relays listening: {} and {}", node_a, node_b);

    wait_for("relays to link", || {
        relay_a.has_server_link(&node_b) && relay_b.has_server_link(&node_a)
    })
    .await;
    // Let a simultaneous dial settle
    sleep(Duration::from_millis(500)).await;
    assert!(relay_a.has_server_link(&node_b));
    assert!(relay_b.has_server_link(&node_a));
    println!("✓ Relays linked");

    let nodes = relay_a.nodes();
    assert_eq!(nodes, relay_b.nodes());
    let k1 = identity_on(&nodes, &node_a);
    let k2 = identity_on(&nodes, &node_b);
    let k2_public = k2.public_key_base58();

    // K1 comes online on relay A
    let (alice, _alice_events) = MeshClient::new(k1, ClientConfig::default());
    assert_eq!(alice.bootstrap(node_a.as_str()).await.unwrap(), node_a);
    assert_eq!(alice.connect().await.unwrap(), node_a);
    assert_eq!(alice.state(), ClientState::Connected(node_a.clone()));
    wait_for("alice's session", || relay_a.has_session(alice.public_key())).await;
    println!("✓ Alice attached to {}", node_a);

    // K2 is offline; the message ends up queued on relay B
    alice.send(&k2_public, "hello", false).unwrap();
    wait_for("message queued on B", || relay_b.queued_for(&k2_public).len() == 1).await;
    assert!(relay_a.queued_for(&k2_public).is_empty());
    assert_eq!(relay_a.stats().messages_forwarded, 1);
    println!("✓ Message forwarded and queued on {}", node_b);

    // K2 comes online on relay B and gets it
    let (bob, mut bob_events) = MeshClient::new(k2, ClientConfig::default());
    assert_eq!(bob.bootstrap(node_b.as_str()).await.unwrap(), node_b);
    bob.connect().await.unwrap();

    let event = timeout(Duration::from_secs(5), async {
        loop {
            match bob_events.recv().await {
                Some(ClientEvent::Message { from, text, .. }) => break (from, text),
                Some(_) => continue,
                None => panic!("bob's events closed"),
            }
        }
    })
    .await
    .expect("bob never received the message");

    assert_eq!(event.0, alice.public_key());
    assert_eq!(event.1, "hello");
    println!("✓ Bob received \"hello\" from Alice");

    // Exactly once
    let extra = timeout(Duration::from_millis(300), async {
        loop {
            if let Some(ClientEvent::Message { .. }) = bob_events.recv().await {
                break;
            }
        }
    })
    .await;
    assert!(extra.is_err(), "message delivered twice");
    assert!(relay_b.queued_for(&k2_public).is_empty());

    handle_a.shutdown();
    handle_b.shutdown();
}

#[tokio::test]
async fn test_acknowledged_delivery_on_one_relay() {
    let (listener, node) = bind().await;
    let relay = RelayServer::new(RelayServerConfig::new(node.clone())).unwrap();
    let handle = relay.serve(listener).unwrap();

    let (alice, mut alice_events) = MeshClient::new(IdentityKeys::generate(), ClientConfig::default());
    let bob_keys = IdentityKeys::generate();
    let (bob, mut bob_events) = MeshClient::new(bob_keys.clone(), ClientConfig::default());
    for client in [&alice, &bob] {
        client.bootstrap(node.as_str()).await.unwrap();
        client.connect().await.unwrap();
    }
    wait_for("both sessions", || {
        relay.has_session(alice.public_key()) && relay.has_session(bob.public_key())
    })
    .await;

    let id = alice.send(bob.public_key(), "ping", true).unwrap();

    let received = timeout(Duration::from_secs(5), async {
        loop {
            if let Some(ClientEvent::Message { text, .. }) = bob_events.recv().await {
                break text;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(received, "ping");

    let acked = timeout(Duration::from_secs(5), async {
        loop {
            if let Some(ClientEvent::Ack { id, .. }) = alice_events.recv().await {
                break id;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(acked, id);
    println!("✓ Ack for {} came back", id);

    // A second session for the same identity is refused
    let (duplicate, mut duplicate_events) = MeshClient::new(bob_keys, ClientConfig::default());
    duplicate.bootstrap(node.as_str()).await.unwrap();
    duplicate.connect().await.unwrap();
    let refused = timeout(Duration::from_secs(5), async {
        loop {
            if let Some(ClientEvent::Disconnected) = duplicate_events.recv().await {
                break;
            }
        }
    })
    .await;
    assert!(refused.is_ok(), "duplicate session was not refused");
    assert_eq!(duplicate.state(), ClientState::Disconnected);
    assert_eq!(relay.stats().client_sessions, 2);
    println!("✓ Duplicate session refused");

    handle.shutdown();
}

#[tokio::test]
async fn test_lost_relay_stays_known_and_is_redialed() {
    // Reserve a port nobody listens on yet
    let (reserved, node_b) = bind().await;
    drop(reserved);

    let (listener_a, node_a) = bind().await;
    let mut config = RelayServerConfig::new(node_a.clone());
    config.reconnect_interval = Duration::from_millis(200);
    let relay_a = RelayServer::new(config).unwrap();
    let handle_a = relay_a.serve(listener_a).unwrap();

    assert!(relay_a.merge_remote_nodes(&[node_b.clone()].into_iter().collect()));
    wait_for("failed dial to be dropped", || !relay_a.has_server_link(&node_b)).await;
    assert!(relay_a.nodes().contains(&node_b));
    println!("✓ {} still known after its link failed", node_b);

    // Bring the relay up; only the sweep can link them now
    let listener_b = TcpListener::bind(node_b.as_str()).await.unwrap();
    let relay_b = RelayServer::new(RelayServerConfig::new(node_b.clone())).unwrap();
    let handle_b = relay_b.serve(listener_b).unwrap();

    wait_for("sweep to redial", || {
        relay_a.has_server_link(&node_b) && relay_b.has_server_link(&node_a)
    })
    .await;
    assert!(relay_b.nodes().contains(&node_a));
    println!("✓ {} redialed {}", node_a, node_b);

    handle_b.shutdown();
    wait_for("closed link to be dropped", || !relay_a.has_server_link(&node_b)).await;
    assert!(relay_a.nodes().contains(&node_b));
    println!("✓ Closed link dropped, node kept");

    handle_a.shutdown();
}
