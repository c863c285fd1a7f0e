//! Key derivation

use anyhow::Result;
use clap::Args;
use grove_core::crypto::{RecoverySeed, SpaceKeyTriple};
use grove_core::{OwnerId, SpaceId, SpaceKind};

/// Print the public keys derived from a recovery phrase
#[derive(Args, Debug)]
pub struct KeysArgs {
    /// Recovery phrase
    #[arg(long)]
    pub phrase: String,

    /// Derivation index
    #[arg(long, default_value_t = 0)]
    pub index: u32,

    /// Also print the space id for this owner
    #[arg(long)]
    pub owner: Option<String>,

    /// Space kind used with --owner
    #[arg(long, default_value = "private")]
    pub kind: SpaceKind,
}

/// Handle `grove keys`
pub fn run(args: &KeysArgs) -> Result<()> {
    let seed = RecoverySeed::from_phrase(&args.phrase)?;
    let keys = SpaceKeyTriple::derive(&seed, args.index)?;

    println!("index:    {}", args.index);
    println!("signing:  {}", keys.signing.public_key());
    println!("master:   {}", keys.master.public_key());
    println!("metadata: {}", keys.metadata.public_key());
    if let Some(owner) = &args.owner {
        let space_id = SpaceId::derive(&OwnerId::new(owner.clone()), args.kind, &keys.master.public_key());
        println!("space:    {space_id}");
    }
    Ok(())
}
