//! Key derivation laws
//!
//! Signing, master and metadata keys must be reproducible from the seed
//! alone; the read key must not be.

#![allow(clippy::unwrap_used, missing_docs)]

use grove_core::crypto::{derive_signing_key, seal, ReadKey, RecoverySeed, SpaceKeyTriple};
use grove_core::{OwnerId, SpaceId, SpaceKind};
use proptest::prelude::*;

const PHRASE: &str =
    "lava orbit crisp meadow tunnel violin quote gentle harbor salad pepper oyster";

#[test]
fn seed_index_zero_twice_gives_identical_signing_key() {
    let seed = RecoverySeed::from_phrase(PHRASE).unwrap();
    let first = derive_signing_key(&seed, 0).unwrap();
    let second = derive_signing_key(&RecoverySeed::from_phrase(PHRASE).unwrap(), 0).unwrap();

    assert_eq!(*first.to_bytes(), *second.to_bytes());
    assert_eq!(first.public_key(), second.public_key());
}

#[test]
fn derived_triple_reproduces_space_id() {
    let seed = RecoverySeed::from_phrase(PHRASE).unwrap();
    let owner = OwnerId::new("did:key:z6Mk-alice");

    let a = SpaceKeyTriple::derive(&seed, 0).unwrap();
    let b = SpaceKeyTriple::derive(&seed, 0).unwrap();

    assert_eq!(
        SpaceId::derive(&owner, SpaceKind::Private, &a.master.public_key()),
        SpaceId::derive(&owner, SpaceKind::Private, &b.master.public_key()),
    );
}

#[test]
fn read_keys_are_not_derivable() {
    // Two generations never agree, so the only way back to a read key is
    // the persisted copy or the ledger.
    assert_ne!(ReadKey::generate(), ReadKey::generate());
}

#[test]
fn read_key_survives_sealing_to_metadata_key() {
    let seed = RecoverySeed::from_phrase(PHRASE).unwrap();
    let triple = SpaceKeyTriple::derive(&seed, 0).unwrap();
    let read_key = ReadKey::generate();

    let sealed = seal::seal(&triple.signing.public_key(), read_key.as_bytes()).unwrap();
    let opened = seal::open(&triple.signing, &sealed).unwrap();

    assert_eq!(ReadKey::from_slice(&opened).unwrap(), read_key);
    assert!(seal::open(&triple.metadata, &sealed).is_err());
}

proptest! {
    #[test]
    fn derivation_is_pure(seed in proptest::array::uniform32(any::<u8>()), index in 0u32..1_000) {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&seed);
        bytes[32..].copy_from_slice(&seed);
        let seed = RecoverySeed::from_bytes(bytes);

        let a = derive_signing_key(&seed, index).unwrap();
        let b = derive_signing_key(&seed, index).unwrap();
        prop_assert_eq!(*a.to_bytes(), *b.to_bytes());

        let next = derive_signing_key(&seed, index + 1).unwrap();
        prop_assert_ne!(a.public_key(), next.public_key());
    }
}
