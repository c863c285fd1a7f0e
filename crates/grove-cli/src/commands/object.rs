//! Object commands

use anyhow::{Context, Result};
use clap::Subcommand;
use grove_core::{GroveConfig, TreeId};
use grove_space::{Object, UpdateOutcome};

use super::common::{self, SpaceArgs};

/// Mutable objects
#[derive(Subcommand, Debug)]
pub enum ObjectCommand {
    /// Create an object, or replace the fields of an existing one
    Put {
        #[command(flatten)]
        space: SpaceArgs,

        /// Object type (ignored when updating)
        #[arg(long = "type", default_value = "note")]
        object_type: String,

        /// Tree id of the object to update
        #[arg(long)]
        tree: Option<TreeId>,

        /// Field as name=value; repeatable
        #[arg(short, long = "field")]
        fields: Vec<String>,
    },

    /// Print one object
    Get {
        #[command(flatten)]
        space: SpaceArgs,

        /// Tree id
        #[arg(long)]
        tree: TreeId,
    },

    /// Print every object of a type
    List {
        #[command(flatten)]
        space: SpaceArgs,

        /// Object type
        #[arg(long = "type", default_value = "note")]
        object_type: String,
    },
}

fn print_object(object: &Object) -> Result<()> {
    println!(
        "{} {} ({} since snapshot)",
        object.tree_id, object.object_type, object.changes_since_snapshot
    );
    println!("{}", serde_json::to_string_pretty(&object.fields)?);
    Ok(())
}

/// Handle `grove object`
pub async fn run(cmd: ObjectCommand, config: GroveConfig) -> Result<()> {
    let replica = common::open_replica(config)?;
    match cmd {
        ObjectCommand::Put {
            space,
            object_type,
            tree,
            fields,
        } => {
            let (space, _) = common::open_space(&replica, &space).await?;
            let fields = common::parse_fields(&fields)?;
            match tree {
                None => {
                    let tree = replica.objects().create_object(space.id(), &object_type, fields).await?;
                    println!("{tree}");
                }
                Some(tree) => {
                    let outcome = replica
                        .objects()
                        .update_object(space.id(), &tree, fields)
                        .await
                        .with_context(|| format!("updating {tree}"))?;
                    match outcome {
                        UpdateOutcome::Unchanged => println!("unchanged"),
                        UpdateOutcome::Diff { ops } => println!("diff: {ops} field operations"),
                        UpdateOutcome::Snapshot => println!("snapshot"),
                    }
                }
            }
        }
        ObjectCommand::Get { space, tree } => {
            let (space, _) = common::open_space(&replica, &space).await?;
            let object = replica.objects().read_object(space.id(), &tree).await?;
            print_object(&object)?;
        }
        ObjectCommand::List { space, object_type } => {
            let (space, _) = common::open_space(&replica, &space).await?;
            for object in replica.objects().read_objects_by_type(space.id(), &object_type).await? {
                print_object(&object)?;
            }
        }
    }
    Ok(())
}
