//! Invite / join through the ordering authority

#![allow(clippy::unwrap_used, missing_docs)]

use assert_matches::assert_matches;
use grove_acl::{
    issue_invite, membership_state, submit_join, AclList, InviteSecret, LocalOrderingAuthority, MembershipState,
    OrderingAuthority, Permission,
};
use grove_core::crypto::{ReadKey, SigningKey};
use grove_core::{GroveError, OwnerId, SpaceId, SpaceKind};
use grove_store::MemoryStorage;
use std::sync::Arc;

struct Space {
    authority: Arc<LocalOrderingAuthority>,
    list: AclList,
    owner: SigningKey,
    read_key: ReadKey,
}

async fn space() -> Space {
    let owner = SigningKey::generate();
    let space_id = SpaceId::derive(&OwnerId::new("alice"), SpaceKind::Community, &owner.public_key());
    let authority = Arc::new(LocalOrderingAuthority::new(Arc::new(MemoryStorage::new())));
    let read_key = ReadKey::generate();

    let root = AclList::prepare_root(space_id.clone(), OwnerId::new("alice"), &read_key, Vec::new(), &owner).unwrap();
    authority.submit(root.clone()).await.unwrap();

    let list = AclList::open(space_id, Arc::new(MemoryStorage::new())).await.unwrap();
    list.add_records(&[root]).await.unwrap();
    Space {
        authority,
        list,
        owner,
        read_key,
    }
}

#[tokio::test]
async fn invited_joined_member_progression() {
    let s = space().await;
    let bob = SigningKey::generate();

    let secret = issue_invite(&s.list, s.authority.as_ref(), &s.owner, Permission::Writer)
        .await
        .unwrap();
    let state = s.list.state().await.unwrap();
    assert_eq!(
        membership_state(&state, &secret.invite_id, &bob.public_key()),
        Some(MembershipState::Invited)
    );

    let receipt = submit_join(s.authority.as_ref(), &secret, &bob).await.unwrap();
    assert_eq!(receipt.ack.position, 2);
    assert_eq!(receipt.membership(Some(&state)), MembershipState::JoinSubmitted);

    // Seed bob's replica from the receipt, as the join-before-open path does.
    let bob_list = AclList::open(s.list.space_id().clone(), Arc::new(MemoryStorage::new()))
        .await
        .unwrap();
    bob_list.add_records(&receipt.records).await.unwrap();
    let bob_state = bob_list.state().await.unwrap();
    assert_eq!(receipt.membership(Some(&bob_state)), MembershipState::Member);

    let access = bob_list.access_for(&bob).await.unwrap();
    assert_eq!(access.current_read_key(), Some(&s.read_key));
    assert_eq!(access.permission, Some(Permission::Writer));
}

#[tokio::test]
async fn invite_token_round_trips() {
    let s = space().await;
    let secret = issue_invite(&s.list, s.authority.as_ref(), &s.owner, Permission::Reader)
        .await
        .unwrap();
    let parsed = InviteSecret::from_token(&secret.to_token()).unwrap();
    assert_eq!(parsed.invite_id, secret.invite_id);
    assert_eq!(parsed.invite_key.public_key(), secret.invite_key.public_key());
    assert!(InviteSecret::from_token("garbage").is_err());
}

#[tokio::test]
async fn revoked_invite_cannot_be_redeemed() {
    let s = space().await;
    let secret = issue_invite(&s.list, s.authority.as_ref(), &s.owner, Permission::Reader)
        .await
        .unwrap();
    let revoke = s.list.prepare_revoke_invite(&s.owner, secret.invite_id).await.unwrap();
    s.authority.submit(revoke.clone()).await.unwrap();

    let err = submit_join(s.authority.as_ref(), &secret, &SigningKey::generate())
        .await
        .unwrap_err();
    assert_matches!(err, GroveError::PermissionDenied { .. });
}

#[tokio::test]
async fn invite_is_single_use() {
    let s = space().await;
    let secret = issue_invite(&s.list, s.authority.as_ref(), &s.owner, Permission::Reader)
        .await
        .unwrap();
    submit_join(s.authority.as_ref(), &secret, &SigningKey::generate())
        .await
        .unwrap();

    let err = submit_join(s.authority.as_ref(), &secret, &SigningKey::generate())
        .await
        .unwrap_err();
    assert_matches!(err, GroveError::PermissionDenied { .. });
}

#[tokio::test]
async fn rejoining_is_idempotent() {
    let s = space().await;
    let bob = SigningKey::generate();
    let secret = issue_invite(&s.list, s.authority.as_ref(), &s.owner, Permission::Reader)
        .await
        .unwrap();

    let first = submit_join(s.authority.as_ref(), &secret, &bob).await.unwrap();
    let again = submit_join(s.authority.as_ref(), &secret, &bob).await.unwrap();
    assert_eq!(first.ack.record_id, again.ack.record_id);
}

#[tokio::test]
async fn stale_issuer_catches_up_and_retries() {
    let s = space().await;
    // A second admin-side replica advances the authority behind our back.
    let other = AclList::open(s.list.space_id().clone(), Arc::new(MemoryStorage::new()))
        .await
        .unwrap();
    other
        .add_records(&s.authority.records_after(s.list.space_id(), None).await.unwrap())
        .await
        .unwrap();
    issue_invite(&other, s.authority.as_ref(), &s.owner, Permission::Reader)
        .await
        .unwrap();

    let secret = issue_invite(&s.list, s.authority.as_ref(), &s.owner, Permission::Reader)
        .await
        .unwrap();
    assert_eq!(s.list.len().await, 3);
    assert_eq!(s.list.position_of(&secret.invite_id).await, Some(2));
}
