use meshchat_core::message::Message;
use meshchat_core::relay::Delivery;
use meshchat_core::{
    IdentityError, IdentityKeys, IdentityManager, NodeAddress, RelayServer, RelayServerConfig,
};

fn node(s: &str) -> NodeAddress {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_relay_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("relay-4000.json");
    let recipient = IdentityKeys::generate().public_key_base58();
    let sender = IdentityKeys::generate().public_key_base58();

    // First run: learn a node, queue a message for an offline identity
    let queued_id = {
        let mut config = RelayServerConfig::new(node("127.0.0.1:4000"));
        config.state_path = Some(state_path.clone());
        let relay = RelayServer::new(config).unwrap();

        let msg = Message::new(&sender, &recipient, "sealed".to_string(), false);
        let id = msg.id.clone();
        assert_eq!(relay.route_message(msg).unwrap(), Delivery::Queued);

        let learned = [node("127.0.0.1:4001")].into_iter().collect();
        assert!(relay.merge_remote_nodes(&learned));
        id
    };
    assert!(state_path.exists());

    // Second run: same file, no seeds
    {
        let mut config = RelayServerConfig::new(node("127.0.0.1:4000"));
        config.state_path = Some(state_path.clone());
        let relay = RelayServer::new(config).unwrap();

        let nodes = relay.nodes();
        assert!(nodes.contains(&node("127.0.0.1:4000")));
        assert!(nodes.contains(&node("127.0.0.1:4001")));

        let queue = relay.queued_for(&recipient);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, queued_id);
        assert_eq!(queue[0].from, sender);
        assert_eq!(relay.stats().messages_queued, 1);
    }
}

#[test]
fn test_corrupt_relay_state_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("relay.json");
    std::fs::write(&state_path, "{not json").unwrap();

    let mut config = RelayServerConfig::new(node("127.0.0.1:4000"));
    config.state_path = Some(state_path);
    assert!(RelayServer::new(config).is_err());
}

#[test]
fn test_identity_persistence_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity");

    // First instance: generate and seal
    let public_key = {
        let mut manager = IdentityManager::with_path(&path).unwrap();
        assert!(!manager.has_identity().unwrap());
        let public_key = manager.initialize("hunter2").unwrap().public_key_base58();
        public_key
    };
    // manager dropped here, sled releases the database

    // Second instance: same password, same identity
    {
        let mut manager = IdentityManager::with_path(&path).unwrap();
        assert!(manager.has_identity().unwrap());
        let loaded = manager.initialize("hunter2").unwrap().public_key_base58();
        assert_eq!(loaded, public_key);
    }

    // Third instance: wrong password
    {
        let mut manager = IdentityManager::with_path(&path).unwrap();
        let err = manager.initialize("wrong").unwrap_err();
        assert!(matches!(err, IdentityError::BadPassword));
        assert!(manager.keys().is_none());
    }
}
