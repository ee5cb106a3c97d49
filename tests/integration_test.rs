//! Integration tests for client/server replication
//!
//! These tests verify the end-to-end behavior of:
//! - Section creation and joining through the full message exchange
//! - Server id assignment across sections and children
//! - Fingerprint deduplication when clients race, in memory and over TCP
//! - A real TCP session between `ReplicaConnection` and `ConnectionHandler`

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use netrep::error::{ProtocolError, ReplicationError};
use netrep::net::client::ReplicaConnection;
use netrep::net::codec::{FrameDecoder, DEFAULT_MAX_FRAME_SIZE};
use netrep::net::handler::ConnectionHandler;
use netrep::protocol::{ClientMessage, SectionRecord, ServerReply};
use netrep::{
    AppState, AuthorityStore, ClientConfig, EntityKey, NetworkId, RawReplica, ReplicaClient,
    ReplicaState, ServerConfig, TypeRegistry,
};
use pretty_assertions::assert_eq;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Barrier};

const SECTION: &str = "world::Section";
const PROP: &str = "world::Prop";

fn types() -> Arc<TypeRegistry> {
    Arc::new(TypeRegistry::from_names([SECTION, PROP]).unwrap())
}

/// Deliver everything the client has queued to the store, once, and feed the
/// replies back. Returns the number of replies the client applied.
fn step(client: &mut ReplicaClient, store: &mut AuthorityStore) -> usize {
    let mut decoder = FrameDecoder::default();
    decoder.extend(&client.take_outbound());

    let mut replies = BytesMut::new();
    while let Some(frame) = decoder.next_frame().unwrap() {
        let message = ClientMessage::decode(&frame).unwrap();
        store.handle(message).unwrap().encode(&mut replies).unwrap();
    }
    client.receive(&replies).unwrap()
}

/// Step until the client has nothing left to send
fn settle(client: &mut ReplicaClient, store: &mut AuthorityStore) {
    while client.has_outbound() {
        step(client, store);
    }
}

fn state_of(client: &ReplicaClient, key: EntityKey) -> ReplicaState {
    client.entities().state(key).unwrap()
}

fn id_of(client: &ReplicaClient, key: EntityKey) -> i32 {
    client.entities().id_of(key).unwrap().get()
}

/// A fresh section goes CHECK_SECTION, DOESNT_EXIST, CREATE_NEW_SECTION, SECTION_CREATED
#[test]
fn test_new_section_registers_with_first_id() {
    let mut store = AuthorityStore::new();
    let mut client = ReplicaClient::new(types());

    let section = client
        .create_section(Box::new(RawReplica::section(SECTION, b"lobby".to_vec())))
        .unwrap();
    assert_eq!(id_of(&client, section), -1);

    assert_eq!(step(&mut client, &mut store), 1);
    assert_eq!(state_of(&client, section), ReplicaState::DoesntExistReceived);

    assert_eq!(step(&mut client, &mut store), 1);
    assert_eq!(state_of(&client, section), ReplicaState::Registered);
    assert_eq!(id_of(&client, section), 1);
    assert!(!client.entities().contains_id(NetworkId(-1)));

    let stats = store.stats();
    assert_eq!(stats.representations, 1);
    assert_eq!(stats.sections, 1);
}

/// A known fingerprint is answered with the section tree, root first
#[test]
fn test_check_known_section_returns_tree() {
    let mut store = AuthorityStore::new();
    let mut client = ReplicaClient::new(types());
    let section_type = client.types().type_id(SECTION).unwrap();

    client
        .create_section(Box::new(RawReplica::section(SECTION, b"lobby".to_vec())))
        .unwrap();
    settle(&mut client, &mut store);

    let reply = store
        .handle(ClientMessage::CheckSection {
            entity_id: NetworkId(-1),
            fingerprint: b"lobby".to_vec(),
        })
        .unwrap();
    assert_eq!(
        reply,
        ServerReply::SectionExists {
            entity_id: NetworkId(-1),
            records: vec![SectionRecord {
                id: NetworkId(1),
                parent_id: NetworkId::ROOT,
                type_id: section_type,
                payload: Vec::new(),
            }],
        }
    );
}

/// A second client opening the same fingerprint receives the whole tree
#[test]
fn test_second_client_joins_existing_section() {
    let types = types();
    let section_type = types.type_id(SECTION).unwrap();
    let prop_type = types.type_id(PROP).unwrap();
    let mut store = AuthorityStore::new();

    let mut first = ReplicaClient::new(types.clone());
    let section = first
        .create_section(Box::new(RawReplica::section(SECTION, b"lobby".to_vec())))
        .unwrap();
    settle(&mut first, &mut store);
    let crate_a = first
        .create_child(
            section,
            Box::new(RawReplica::new(PROP).with_payload(vec![7, 7])),
        )
        .unwrap();
    settle(&mut first, &mut store);
    let lid = first
        .create_child(crate_a, Box::new(RawReplica::new(PROP).with_payload(vec![9])))
        .unwrap();
    settle(&mut first, &mut store);
    assert_eq!(id_of(&first, crate_a), 2);
    assert_eq!(id_of(&first, lid), 3);

    let mut second = ReplicaClient::new(types);
    let joined = second
        .create_section(Box::new(RawReplica::section(SECTION, b"lobby".to_vec())))
        .unwrap();
    assert_eq!(step(&mut second, &mut store), 1);

    assert_eq!(state_of(&second, joined), ReplicaState::Registered);
    assert_eq!(id_of(&second, joined), 1);
    assert_eq!(second.entities().len(), 3);
    assert!(!second.has_outbound());

    let entities = second.entities();
    let child = entities.key_of(NetworkId(2)).unwrap();
    let grandchild = entities.key_of(NetworkId(3)).unwrap();
    assert_eq!(entities.parent(child).unwrap(), Some(joined));
    assert_eq!(entities.parent(grandchild).unwrap(), Some(child));
    assert_eq!(entities.type_id_of(joined).unwrap(), section_type);
    assert_eq!(entities.type_id_of(grandchild).unwrap(), prop_type);
    assert_eq!(
        entities.replica(child).unwrap().serialize(),
        Some(vec![7, 7])
    );

    // Joining added nothing on the server
    assert_eq!(store.stats().representations, 3);
}

/// Ids are one counter across sections and children
#[test]
fn test_child_ids_continue_sequence() {
    let mut store = AuthorityStore::new();
    let mut client = ReplicaClient::new(types());

    let section = client
        .create_section(Box::new(RawReplica::section(SECTION, b"A".to_vec())))
        .unwrap();
    settle(&mut client, &mut store);

    let mut parent = section;
    for expected in 2..=5 {
        parent = client
            .create_child(parent, Box::new(RawReplica::new(PROP)))
            .unwrap();
        settle(&mut client, &mut store);
        assert_eq!(id_of(&client, parent), expected);
    }

    let prop_type = client.types().type_id(PROP).unwrap();
    let reply = store
        .handle(ClientMessage::CreateNew {
            entity_id: NetworkId(-42),
            type_id: prop_type,
            parent_id: NetworkId(5),
            payload: vec![0x01, 0x02],
        })
        .unwrap();
    assert_eq!(
        reply,
        ServerReply::Created {
            entity_id: NetworkId(-42),
            assigned_id: NetworkId(6),
        }
    );

    let stored = store.get(NetworkId(6)).unwrap();
    assert_eq!(stored.parent_id, NetworkId(5));
    assert_eq!(stored.type_id, prop_type);
    assert_eq!(stored.payload, vec![0x01, 0x02]);
    assert_eq!(store.get(NetworkId(5)).unwrap().children, vec![NetworkId(6)]);
}

/// Both clients see DOESNT_EXIST; the loser of the creation gets the winner's tree
#[test]
fn test_concurrent_section_creation_deduplicates() {
    let types = types();
    let mut store = AuthorityStore::new();
    let mut alice = ReplicaClient::new(types.clone());
    let mut bob = ReplicaClient::new(types.clone());

    let a = alice
        .create_section(Box::new(RawReplica::section(SECTION, b"arena".to_vec())))
        .unwrap();
    let b = bob
        .create_section(Box::new(RawReplica::section(SECTION, b"arena".to_vec())))
        .unwrap();

    step(&mut alice, &mut store);
    step(&mut bob, &mut store);
    assert_eq!(state_of(&alice, a), ReplicaState::DoesntExistReceived);
    assert_eq!(state_of(&bob, b), ReplicaState::DoesntExistReceived);

    step(&mut alice, &mut store);
    step(&mut bob, &mut store);

    assert_eq!(state_of(&alice, a), ReplicaState::Registered);
    assert_eq!(state_of(&bob, b), ReplicaState::Registered);
    assert_eq!(id_of(&alice, a), 1);
    assert_eq!(id_of(&bob, b), 1);

    let stats = store.stats();
    assert_eq!(stats.representations, 1);
    assert_eq!(stats.sections, 1);
}

/// A section whose tree outgrows a single request frame can still be joined
#[test]
fn test_join_section_larger_than_request_limit() {
    let mut store = AuthorityStore::new();
    let mut owner = ReplicaClient::new(types());

    let section = owner
        .create_section(Box::new(RawReplica::section(SECTION, b"vault".to_vec())))
        .unwrap();
    settle(&mut owner, &mut store);

    // Each request fits under the server's frame limit on its own
    let payload = vec![0xA5; DEFAULT_MAX_FRAME_SIZE * 3 / 5];
    for _ in 0..2 {
        let child = owner
            .create_child(
                section,
                Box::new(RawReplica::new(PROP).with_payload(payload.clone())),
            )
            .unwrap();
        settle(&mut owner, &mut store);
        assert_eq!(state_of(&owner, child), ReplicaState::Registered);
    }

    let mut joiner = ReplicaClient::new(types());
    let joined = joiner
        .create_section(Box::new(RawReplica::section(SECTION, b"vault".to_vec())))
        .unwrap();

    let mut decoder = FrameDecoder::default();
    decoder.extend(&joiner.take_outbound());
    let check = ClientMessage::decode(&decoder.next_frame().unwrap().unwrap()).unwrap();
    let mut reply = BytesMut::new();
    store.handle(check).unwrap().encode(&mut reply).unwrap();
    assert!(reply.len() > DEFAULT_MAX_FRAME_SIZE);

    assert_eq!(joiner.receive(&reply).unwrap(), 1);
    assert_eq!(state_of(&joiner, joined), ReplicaState::Registered);
    assert_eq!(joiner.entities().len(), 3);
    let child = joiner.entities().key_of(NetworkId(3)).unwrap();
    assert_eq!(
        joiner.entities().replica(child).unwrap().serialize(),
        Some(payload)
    );
}

/// A server-issued id in a request is rejected
#[test]
fn test_registered_sender_rejected() {
    let mut store = AuthorityStore::new();
    let result = store.handle(ClientMessage::CheckSection {
        entity_id: NetworkId(3),
        fingerprint: b"A".to_vec(),
    });
    assert!(matches!(
        result,
        Err(ReplicationError::Protocol(ProtocolError::RegisteredSender(_)))
    ));
}

/// Spawn a server on an ephemeral port; returns its state and client config
async fn spawn_server() -> (Arc<AppState>, ClientConfig) {
    let (shutdown_tx, _) = broadcast::channel(1);
    let config = ServerConfig {
        replicated_types: vec![SECTION.to_string(), PROP.to_string()],
        ..ServerConfig::default()
    };
    let state = Arc::new(AppState::new(config, shutdown_tx).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let accept_state = state.clone();
    tokio::spawn(async move {
        while let Ok((stream, addr)) = listener.accept().await {
            let handler = ConnectionHandler::new(accept_state.clone(), false);
            tokio::spawn(async move {
                let _ = handler.handle(stream, addr).await;
            });
        }
    });

    let client_config = ClientConfig {
        host: "127.0.0.1".to_string(),
        port,
        ..ClientConfig::default()
    };
    (state, client_config)
}

async fn wait_registered(connection: &mut ReplicaConnection, key: EntityKey) {
    tokio::time::timeout(
        Duration::from_secs(5),
        connection.recv_until(|client| {
            client
                .entities()
                .state(key)
                .map(|state| state.is_registered())
                .unwrap_or(false)
        }),
    )
    .await
    .expect("timed out waiting for registration")
    .unwrap();
}

#[tokio::test]
async fn test_tcp_session_round_trip() {
    let (state, config) = spawn_server().await;

    let mut first = ReplicaConnection::connect(&config, types()).await.unwrap();
    let section = first
        .client_mut()
        .create_section(Box::new(RawReplica::section(SECTION, b"dock".to_vec())))
        .unwrap();
    wait_registered(&mut first, section).await;
    assert_eq!(id_of(first.client(), section), 1);

    let prop = first
        .client_mut()
        .create_child(
            section,
            Box::new(RawReplica::new(PROP).with_payload(vec![1, 2, 3])),
        )
        .unwrap();
    wait_registered(&mut first, prop).await;
    assert_eq!(id_of(first.client(), prop), 2);

    let mut second = ReplicaConnection::connect(&config, types()).await.unwrap();
    let joined = second
        .client_mut()
        .create_section(Box::new(RawReplica::section(SECTION, b"dock".to_vec())))
        .unwrap();
    wait_registered(&mut second, joined).await;

    let entities = second.client().entities();
    assert_eq!(entities.len(), 2);
    let remote_prop = entities.key_of(NetworkId(2)).unwrap();
    assert_eq!(
        entities.replica(remote_prop).unwrap().serialize(),
        Some(vec![1, 2, 3])
    );

    let stats = state.store.lock().stats();
    assert_eq!(stats.representations, 2);
    assert_eq!(stats.sections, 1);

    first.shutdown().await.unwrap();
    second.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_connections_converge_on_one_section() {
    const CLIENTS: usize = 8;
    let (state, config) = spawn_server().await;
    let barrier = Arc::new(Barrier::new(CLIENTS));

    let tasks: Vec<_> = (0..CLIENTS)
        .map(|_| {
            let config = config.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                let mut connection = ReplicaConnection::connect(&config, types()).await.unwrap();
                let section = connection
                    .client_mut()
                    .create_section(Box::new(RawReplica::section(SECTION, b"plaza".to_vec())))
                    .unwrap();

                // Every CHECK_SECTION goes out at once
                barrier.wait().await;
                wait_registered(&mut connection, section).await;

                let id = id_of(connection.client(), section);
                connection.shutdown().await.unwrap();
                id
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap(), 1);
    }

    let stats = state.store.lock().stats();
    assert_eq!(stats.sections, 1);
    assert_eq!(stats.representations, 1);
}
