use std::sync::Arc;

use clap::Parser;
use diamond_scripts::{
    artifacts::ArtifactStore,
    chain::ChainRegistry,
    cli::{Cli, ScriptContext},
    errors::ScriptError,
    utils::setup_client,
};

#[tokio::main]
async fn main() -> Result<(), ScriptError> {
    let cli = Cli::parse();
    let config = cli.orchestrator_config();
    let poll_interval = cli.poll_interval();
    let Cli {
        priv_key,
        rpc_url,
        artifacts,
        deployments_path,
        command,
        ..
    } = cli;

    tracing_subscriber::fmt().pretty().init();

    let (client, deployer) = setup_client(&priv_key, &rpc_url).await?;
    let registry = Arc::new(
        ChainRegistry::new(client, ArtifactStore::new(artifacts)).with_poll_interval(poll_interval),
    );
    let ctx = ScriptContext {
        deployer,
        deployments_path,
        config,
    };

    command.run(registry, &ctx).await
}
