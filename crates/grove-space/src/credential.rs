//! Credential trees
//!
//! A credential is a single signed change: created once by the space's
//! registered signer and never appended to. Reads rebuild each tree from
//! the store.

use grove_core::crypto::{PublicKey, SigningKey};
use grove_core::{GroveError, Result, SpaceId, TreeId};
use grove_tree::{ObjectTree, TreeHeader, TreeKind};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::access::{ChangeOrigin, TreeAccess};
use crate::resolver::SpaceResolver;

/// A decrypted credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Tree holding the credential
    pub tree_id: TreeId,
    /// Application credential type
    pub credential_type: String,
    /// Signer
    pub author: PublicKey,
    /// Creation time
    pub created_at_ms: u64,
    /// Opaque payload
    pub payload: Vec<u8>,
}

impl Credential {
    fn from_tree(tree: &ObjectTree) -> Result<Self> {
        let root = tree
            .root()
            .ok_or_else(|| GroveError::invalid_tree(tree.id().to_hex(), "credential tree has no root"))?;
        Ok(Self {
            tree_id: *tree.id(),
            credential_type: tree.header().object_type.clone(),
            author: root.author,
            created_at_ms: root.timestamp_ms,
            payload: root.data.clone(),
        })
    }
}

/// Creates and reads credential trees
#[derive(Debug, Clone)]
pub struct CredentialManager {
    resolver: Arc<SpaceResolver>,
    access: Arc<TreeAccess>,
}

impl CredentialManager {
    /// Manager over open spaces of `resolver`
    pub fn new(resolver: Arc<SpaceResolver>, access: Arc<TreeAccess>) -> Self {
        Self { resolver, access }
    }

    /// Store a new credential signed by `signer`
    ///
    /// Fails with `Signature` unless `signer` is the key registered in the
    /// space header.
    pub async fn add_credential(
        &self,
        space_id: &SpaceId,
        credential_type: &str,
        payload: &[u8],
        signer: &SigningKey,
    ) -> Result<TreeId> {
        let space = self.resolver.require(space_id)?;
        if signer.public_key() != space.header().signing_key {
            return Err(GroveError::signature(format!(
                "{} is not the registered signer of space {space_id}",
                signer.public_key()
            )));
        }

        let keys = space.tree_keys().await?;
        let header = TreeHeader::new(
            space_id.clone(),
            TreeKind::Credential,
            credential_type,
            Uuid::new_v4().to_string(),
        );
        let (tree, root) = ObjectTree::create(header, payload, signer, &keys)?;

        let guard = self.access.lock_tree(space_id, tree.id()).await;
        self.access
            .commit_locked(&guard, &keys, tree.id(), vec![root], ChangeOrigin::Local)
            .await?;
        info!(space = %space_id, tree = %tree.id(), credential_type, "credential added");
        Ok(*tree.id())
    }

    /// Every credential in the space, rebuilt from the store
    pub async fn read_credentials(&self, space_id: &SpaceId) -> Result<Vec<Credential>> {
        let space = self.resolver.require(space_id)?;
        let mut credentials = Vec::new();
        for entry in self.access.index().by_kind(space_id, TreeKind::Credential) {
            let tree = self.access.get_tree(&space, &entry.tree_id).await?;
            credentials.push(Credential::from_tree(&tree)?);
        }
        credentials.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms).then(a.tree_id.cmp(&b.tree_id)));
        Ok(credentials)
    }
}
