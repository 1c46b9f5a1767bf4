#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use anyhow::{Context, Result};
use clap::Parser;

use emviz_core::types::DatasetMetadata;

/// Records how many photos a dataset will contain, or lists an owner's datasets.
#[derive(Debug, Parser)]
#[command(name = "emviz-register")]
struct Args {
    #[arg(
        long,
        env = "EMVIZ_METADATA_ROOT",
        default_value = "/var/lib/emviz/metadata"
    )]
    metadata_root: String,

    #[arg(long)]
    owner: String,

    /// Dataset to register. Omit together with `--expected-count` to list.
    #[arg(long, requires = "expected_count")]
    dataset: Option<String>,

    #[arg(long, requires = "dataset")]
    expected_count: Option<u32>,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    visualization: Option<String>,
}

fn main() -> Result<()> {
    emviz_observe::logging::init_tracing();
    let args = Args::parse();
    let store = emviz_store::open_metadata_store(&args.metadata_root)?;

    let (Some(dataset), Some(expected_count)) = (args.dataset, args.expected_count) else {
        for name in store.datasets_for_owner(&args.owner)? {
            println!("{name}");
        }
        return Ok(());
    };

    let metadata = DatasetMetadata {
        owner: args.owner,
        dataset,
        expected_count,
        model: args.model,
        visualization: args.visualization,
        created_unix_time_ms: emviz_store::unix_time_ms(),
    };
    store
        .register(&metadata)
        .with_context(|| format!("register {}", metadata.dataset_ref()))?;

    tracing::info!(
        target: "emviz_fn",
        event = "dataset_registered",
        owner = %metadata.owner,
        dataset = %metadata.dataset,
        expected = metadata.expected_count,
        "dataset registered"
    );
    println!("registered {} ({} photos)", metadata.dataset_ref(), expected_count);
    Ok(())
}
