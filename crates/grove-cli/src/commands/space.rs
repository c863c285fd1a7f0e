//! Space commands

use anyhow::Result;
use clap::Subcommand;
use grove_core::GroveConfig;

use super::common::{self, SpaceArgs};

/// Space management
#[derive(Subcommand, Debug)]
pub enum SpaceCommand {
    /// Create the space, or reopen it if it exists
    Create {
        #[command(flatten)]
        space: SpaceArgs,
    },

    /// Show ledger and content state
    Info {
        #[command(flatten)]
        space: SpaceArgs,
    },
}

/// Handle `grove space`
pub async fn run(cmd: SpaceCommand, config: GroveConfig) -> Result<()> {
    let replica = common::open_replica(config)?;
    match cmd {
        SpaceCommand::Create { space } => {
            let (space, _) = common::open_space(&replica, &space).await?;
            println!("{}", space.id());
        }
        SpaceCommand::Info { space: args } => {
            let (space, keys) = common::open_space(&replica, &args).await?;
            let metadata = space.owner_metadata(&keys.metadata).await?;
            let access = space.access().await?;

            println!("space:       {}", space.id());
            println!("owner:       {}", metadata.owner);
            println!("kind:        {}", metadata.kind);
            println!("created:     {}", metadata.created_at_ms);
            println!("ledger:      {} records", space.acl().len().await);
            match access.permission {
                Some(permission) => println!("permission:  {permission}"),
                None => println!("permission:  none"),
            }
            println!("read keys:   {}", access.read_keys.len());
            println!("trees:       {}", replica.access().index().tree_count(space.id()));
        }
    }
    Ok(())
}
