//! Shared plumbing for commands

use anyhow::{Context, Result};
use clap::Args;
use grove_acl::LocalOrderingAuthority;
use grove_core::crypto::{RecoverySeed, SpaceKeyTriple};
use grove_core::{GroveConfig, OwnerId, SpaceKind};
use grove_space::{Fields, LocalNamespaceRegistry, Replica, Space};
use grove_store::FilesystemStorage;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Which space a command works on
#[derive(Args, Debug, Clone)]
pub struct SpaceArgs {
    /// Owner identifier
    #[arg(long)]
    pub owner: String,

    /// Space kind: private, community, community-readonly or admin
    #[arg(long, default_value = "private")]
    pub kind: SpaceKind,

    /// Recovery phrase the space keys derive from
    #[arg(long)]
    pub phrase: String,

    /// Derivation index
    #[arg(long, default_value_t = 0)]
    pub index: u32,
}

impl SpaceArgs {
    /// Derive the key triple for this space
    pub fn keys(&self) -> Result<SpaceKeyTriple> {
        let seed = RecoverySeed::from_phrase(&self.phrase)?;
        Ok(SpaceKeyTriple::derive(&seed, self.index)?)
    }
}

/// Load `path` if it exists, defaults otherwise; environment overrides apply
/// either way
pub fn load_config(path: &Path) -> Result<GroveConfig> {
    let mut config = if path.exists() {
        GroveConfig::load_from_file(path).with_context(|| format!("loading {}", path.display()))?
    } else {
        debug!(path = %path.display(), "no config file, using defaults");
        GroveConfig::default()
    };
    config.merge_with_env()?;
    config.validate()?;
    Ok(config)
}

/// Replica over the data directory with a single-node authority and
/// namespace registry beside it
pub fn open_replica(config: GroveConfig) -> Result<Replica> {
    let authority = Arc::new(LocalOrderingAuthority::new(Arc::new(FilesystemStorage::new(
        config.data_dir.join("authority"),
    )?)));
    let namespace = Arc::new(LocalNamespaceRegistry::new(Arc::new(FilesystemStorage::new(
        config.data_dir.join("namespace"),
    )?)));
    Ok(Replica::open_filesystem(config, authority, namespace)?)
}

/// Open (creating on first use) the space `args` selects
pub async fn open_space(replica: &Replica, args: &SpaceArgs) -> Result<(Arc<Space>, SpaceKeyTriple)> {
    let keys = args.keys()?;
    let space = replica
        .resolve(OwnerId::new(args.owner.clone()), args.kind, &keys)
        .await
        .context("opening space")?;
    Ok((space, keys))
}

/// Parse `name=value` pairs; values that are not JSON are taken as strings
pub fn parse_fields(pairs: &[String]) -> Result<Fields> {
    let mut fields = Fields::new();
    for pair in pairs {
        let (name, raw) = pair
            .split_once('=')
            .with_context(|| format!("field '{pair}' is not name=value"))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
        fields.insert(name.to_owned(), value);
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_fields() {
        let fields = parse_fields(&["name=Ada".into(), "age=36".into(), "tags=[\"a\"]".into()]).unwrap();
        assert_eq!(fields["name"], json!("Ada"));
        assert_eq!(fields["age"], json!(36));
        assert_eq!(fields["tags"], json!(["a"]));
        assert!(parse_fields(&["no-equals".into()]).is_err());
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.objects.snapshot_interval, 10);
    }

    #[test]
    fn test_config_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[objects]\nsnapshot_interval = 3\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.objects.snapshot_interval, 3);
    }
}
