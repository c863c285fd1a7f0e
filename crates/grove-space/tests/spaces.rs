//! Space resolution, joining and the fresh-read policy

#![allow(clippy::unwrap_used, missing_docs)]

use assert_matches::assert_matches;
use async_trait::async_trait;
use grove_acl::{issue_invite, submit_join, LocalOrderingAuthority, OrderingAuthority, Permission};
use grove_core::crypto::{RecoverySeed, SigningKey, SpaceKeyTriple};
use grove_core::effects::{StorageEffects, StorageError};
use grove_core::{GroveConfig, GroveError, OwnerId, PeerId, SpaceId, SpaceKind, TreeId};
use grove_space::{ChangeOrigin, Fields, LocalNamespaceRegistry, NamespaceCoordinator, Replica};
use grove_store::{MemoryStorage, ReadKeyStore};
use serde_json::json;
use std::sync::Arc;

const PHRASE: &str = "abandon ability able about above absent absorb abstract absurd abuse access accident";

struct Network {
    authority: Arc<LocalOrderingAuthority>,
    namespace: Arc<LocalNamespaceRegistry>,
}

fn network() -> Network {
    Network {
        authority: Arc::new(LocalOrderingAuthority::new(Arc::new(MemoryStorage::new()))),
        namespace: Arc::new(LocalNamespaceRegistry::new(Arc::new(MemoryStorage::new()))),
    }
}

fn replica(net: &Network) -> Replica {
    Replica::in_memory(GroveConfig::default(), net.authority.clone(), net.namespace.clone())
}

fn note(text: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("text".into(), json!(text));
    fields
}

async fn copy_tree(from: &Replica, to: &Replica, space_id: &SpaceId, tree_id: &TreeId) {
    let changes = from.access().store().load_changes(space_id, tree_id).await.unwrap();
    let space = to.resolver().require(space_id).unwrap();
    to.access()
        .validate_and_put_tree(&space, tree_id, changes, ChangeOrigin::Remote(PeerId::new("peer")))
        .await
        .unwrap();
}

#[tokio::test]
async fn resolving_twice_yields_one_space() {
    let net = network();
    let replica = replica(&net);
    let keys = SpaceKeyTriple::generate();

    let a = replica.resolve(OwnerId::new("alice"), SpaceKind::Private, &keys).await.unwrap();
    let b = replica.resolve(OwnerId::new("alice"), SpaceKind::Private, &keys).await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(net.authority.records_after(a.id(), None).await.unwrap().len(), 1);
    assert!(a.is_owner());
}

#[tokio::test]
async fn restart_adopts_existing_namespace_and_root() {
    let net = network();
    let storage = Arc::new(MemoryStorage::new());
    let key_storage = Arc::new(MemoryStorage::new());
    let seed = RecoverySeed::from_phrase(PHRASE).unwrap();

    let first = Replica::new(
        GroveConfig::default(),
        storage.clone(),
        ReadKeyStore::new(key_storage.clone()),
        net.authority.clone(),
        net.namespace.clone(),
    );
    let space = first
        .derive_space(OwnerId::new("alice"), SpaceKind::Community, &seed, 0)
        .await
        .unwrap();
    let tree = first.objects().create_object(space.id(), "note", note("hi")).await.unwrap();

    let second = Replica::new(
        GroveConfig::default(),
        storage,
        ReadKeyStore::new(key_storage.clone()),
        net.authority.clone(),
        net.namespace.clone(),
    );
    let reopened = second
        .derive_space(OwnerId::new("alice"), SpaceKind::Community, &seed, 0)
        .await
        .unwrap();

    assert_eq!(reopened.id(), space.id());
    assert_eq!(net.authority.records_after(space.id(), None).await.unwrap().len(), 1);
    let object = second.objects().read_object(space.id(), &tree).await.unwrap();
    assert_eq!(object.fields, note("hi"));

    let stored = ReadKeyStore::new(key_storage).load(space.id()).await.unwrap().unwrap();
    assert_eq!(Some(&stored), space.access().await.unwrap().current_read_key());
}

#[tokio::test]
async fn header_is_registered_and_metadata_sealed() {
    let net = network();
    let replica = replica(&net);
    let keys = SpaceKeyTriple::generate();
    let space = replica.resolve(OwnerId::new("alice"), SpaceKind::Admin, &keys).await.unwrap();

    let header = net.namespace.lookup(space.id()).await.unwrap().unwrap();
    assert_eq!(header.signing_key, keys.signing.public_key());

    let metadata = space.owner_metadata(&keys.metadata).await.unwrap();
    assert_eq!(metadata.owner, OwnerId::new("alice"));
    assert_eq!(metadata.kind, SpaceKind::Admin);
    assert!(space.owner_metadata(&keys.master).await.is_err());
}

struct ReadOnlyStorage;

#[async_trait]
impl StorageEffects for ReadOnlyStorage {
    async fn store(&self, _key: &str, _value: Vec<u8>) -> Result<(), StorageError> {
        Err(StorageError::PermissionDenied("read-only volume".to_string()))
    }

    async fn retrieve(&self, _key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(None)
    }

    async fn remove(&self, _key: &str) -> Result<bool, StorageError> {
        Ok(false)
    }

    async fn list_keys(&self, _prefix: Option<&str>) -> Result<Vec<String>, StorageError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn unpersistable_read_key_stops_space_creation() {
    let net = network();
    let replica = Replica::new(
        GroveConfig::default(),
        Arc::new(MemoryStorage::new()),
        ReadKeyStore::new(Arc::new(ReadOnlyStorage)),
        net.authority.clone(),
        net.namespace.clone(),
    );
    let keys = SpaceKeyTriple::generate();

    let err = replica
        .resolve(OwnerId::new("alice"), SpaceKind::Private, &keys)
        .await
        .unwrap_err();
    assert_matches!(err, GroveError::KeyPersistence { .. });

    let space_id = SpaceId::derive(&OwnerId::new("alice"), SpaceKind::Private, &keys.master.public_key());
    assert!(net.authority.records_after(&space_id, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn get_tree_reflects_ledger_changes_between_calls() {
    let net = network();
    let alice = replica(&net);
    let bob = replica(&net);
    let bob_key = SigningKey::generate();

    let keys = SpaceKeyTriple::generate();
    let space = alice.resolve(OwnerId::new("alice"), SpaceKind::Community, &keys).await.unwrap();
    let tree = alice.objects().create_object(space.id(), "note", note("secret")).await.unwrap();

    // Bob opens before he is a member.
    let bob_space = bob.open_space(space.id(), bob_key.clone()).await.unwrap();
    copy_tree(&alice, &bob, space.id(), &tree).await;
    let err = bob.access().get_tree(&bob_space, &tree).await.unwrap_err();
    assert_matches!(err, GroveError::NoReadKey { .. });

    let add = space
        .acl()
        .prepare_add_member(&keys.signing, bob_key.public_key(), Permission::Reader)
        .await
        .unwrap();
    net.authority.submit(add).await.unwrap();
    bob.resolver().refresh_ledger(&bob_space).await.unwrap();

    let built = bob.access().get_tree(&bob_space, &tree).await.unwrap();
    assert_eq!(built.len(), 1);
    let object = bob.objects().read_object(space.id(), &tree).await.unwrap();
    assert_eq!(object.fields, note("secret"));
}

#[tokio::test]
async fn acknowledged_join_opens_with_keys() {
    let net = network();
    let alice = replica(&net);
    let bob = replica(&net);
    let bob_key = SigningKey::generate();

    let keys = SpaceKeyTriple::generate();
    let space = alice.resolve(OwnerId::new("alice"), SpaceKind::Community, &keys).await.unwrap();
    let tree = alice.objects().create_object(space.id(), "note", note("welcome")).await.unwrap();

    let secret = issue_invite(space.acl(), net.authority.as_ref(), &keys.signing, Permission::Writer)
        .await
        .unwrap();
    let receipt = submit_join(net.authority.as_ref(), &secret, &bob_key).await.unwrap();
    let joined = bob.open_joined(&receipt, bob_key.clone()).await.unwrap();
    assert!(!joined.is_owner());

    copy_tree(&alice, &bob, space.id(), &tree).await;
    let object = bob.objects().read_object(space.id(), &tree).await.unwrap();
    assert_eq!(object.fields, note("welcome"));

    // Writers may append to objects they did not create.
    bob.objects().update_object(space.id(), &tree, note("hello back")).await.unwrap();
}

#[tokio::test]
async fn removed_member_loses_new_content_but_owner_keeps_history() {
    let net = network();
    let alice = replica(&net);
    let bob = replica(&net);
    let bob_key = SigningKey::generate();

    let keys = SpaceKeyTriple::generate();
    let space = alice.resolve(OwnerId::new("alice"), SpaceKind::Community, &keys).await.unwrap();
    let add = space
        .acl()
        .prepare_add_member(&keys.signing, bob_key.public_key(), Permission::Reader)
        .await
        .unwrap();
    net.authority.submit(add).await.unwrap();
    alice.resolver().refresh_ledger(&space).await.unwrap();

    let tree = alice.objects().create_object(space.id(), "note", note("v1")).await.unwrap();

    let (remove, _new_key) = space
        .acl()
        .prepare_remove_member(&keys.signing, bob_key.public_key())
        .await
        .unwrap();
    net.authority.submit(remove).await.unwrap();
    alice.resolver().refresh_ledger(&space).await.unwrap();
    alice.objects().update_object(space.id(), &tree, note("v2")).await.unwrap();

    let object = alice.objects().read_object(space.id(), &tree).await.unwrap();
    assert_eq!(object.fields, note("v2"));

    let bob_space = bob.open_space(space.id(), bob_key).await.unwrap();
    copy_tree(&alice, &bob, space.id(), &tree).await;
    let err = bob.access().get_tree(&bob_space, &tree).await.unwrap_err();
    assert_matches!(err, GroveError::NoReadKey { .. });
}

#[tokio::test]
async fn open_space_requires_registered_header() {
    let net = network();
    let replica = replica(&net);
    let unknown = SpaceId::derive(
        &OwnerId::new("nobody"),
        SpaceKind::Private,
        &SigningKey::generate().public_key(),
    );
    let err = replica.open_space(&unknown, SigningKey::generate()).await.unwrap_err();
    assert_matches!(err, GroveError::NotFound { .. });
}
