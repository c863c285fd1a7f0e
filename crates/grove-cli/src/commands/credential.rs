//! Credential commands

use anyhow::Result;
use clap::Subcommand;
use grove_core::GroveConfig;

use super::common::{self, SpaceArgs};

/// Immutable credentials
#[derive(Subcommand, Debug)]
pub enum CredentialCommand {
    /// Store a credential signed with the space's signing key
    Add {
        #[command(flatten)]
        space: SpaceArgs,

        /// Credential type
        #[arg(long = "type")]
        credential_type: String,

        /// Payload, stored as UTF-8 bytes
        #[arg(long)]
        payload: String,
    },

    /// Print every credential
    List {
        #[command(flatten)]
        space: SpaceArgs,
    },
}

/// Handle `grove credential`
pub async fn run(cmd: CredentialCommand, config: GroveConfig) -> Result<()> {
    let replica = common::open_replica(config)?;
    match cmd {
        CredentialCommand::Add {
            space,
            credential_type,
            payload,
        } => {
            let (space, keys) = common::open_space(&replica, &space).await?;
            let tree = replica
                .credentials()
                .add_credential(space.id(), &credential_type, payload.as_bytes(), &keys.signing)
                .await?;
            println!("{tree}");
        }
        CredentialCommand::List { space } => {
            let (space, _) = common::open_space(&replica, &space).await?;
            for credential in replica.credentials().read_credentials(space.id()).await? {
                println!(
                    "{} {} by {} at {}: {}",
                    credential.tree_id,
                    credential.credential_type,
                    credential.author,
                    credential.created_at_ms,
                    String::from_utf8_lossy(&credential.payload)
                );
            }
        }
    }
    Ok(())
}
