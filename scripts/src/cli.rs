//! Definitions of CLI arguments and commands for the deploy scripts

use std::{path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use alloy::primitives::{Address, Bytes};
use clap::{Args, Parser, Subcommand};
use diamond_core::{
    constants::{DEFAULT_FACET_NAMES, DIAMOND_INIT_CONTRACT_NAME},
    orchestrator::OrchestratorConfig,
};

use crate::{
    chain::ChainRegistry,
    commands::{deploy, upgrade},
    constants::{
        DEFAULT_ARTIFACTS_DIR, DEFAULT_RPC_URL, DEFAULT_STEP_TIMEOUT_SECS,
        RECEIPT_POLL_INTERVAL_MS, REUSE_SEPARATOR,
    },
    errors::ScriptError,
};

/// Deploy and upgrade EIP-2535 diamond proxies
#[derive(Parser)]
pub struct Cli {
    /// Private key of the deployer
    #[arg(short, long, env = "PKEY", hide_env_values = true)]
    pub priv_key: String,

    /// Network RPC URL
    #[arg(short, long, env = "RPC_URL", default_value = DEFAULT_RPC_URL)]
    pub rpc_url: String,

    /// Directory containing the compiled contract artifacts
    #[arg(short, long, default_value = DEFAULT_ARTIFACTS_DIR)]
    pub artifacts: PathBuf,

    /// Path to a JSON file in which deployed addresses are recorded
    #[arg(short, long)]
    pub deployments_path: Option<PathBuf>,

    /// Seconds allowed for any single deployment or confirmation
    #[arg(long, default_value_t = DEFAULT_STEP_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Milliseconds between transaction receipt polls
    #[arg(long, default_value_t = RECEIPT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,

    /// The command to run
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// The orchestrator configuration given by the global flags
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            step_timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    /// The delay between transaction receipt polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Everything a command needs besides its own arguments
pub struct ScriptContext {
    /// The address transactions are signed with
    pub deployer: Address,
    /// Where deployed addresses are recorded, if anywhere
    pub deployments_path: Option<PathBuf>,
    /// The orchestrator configuration
    pub config: OrchestratorConfig,
}

/// The deploy script commands
#[derive(Subcommand)]
pub enum Command {
    /// Deploy a new diamond along with its facets
    Deploy(DeployArgs),
    /// Cut new or updated facets into an existing diamond
    Upgrade(UpgradeArgs),
}

impl Command {
    /// Run the command against the given registry
    pub async fn run(
        self,
        registry: Arc<ChainRegistry>,
        ctx: &ScriptContext,
    ) -> Result<(), ScriptError> {
        match self {
            Command::Deploy(args) => deploy(args, registry, ctx).await,
            Command::Upgrade(args) => upgrade(args, registry, ctx).await,
        }
    }
}

/// Deploy a diamond with the cut facet installed, then cut in the remaining
/// facets and run the initializer in a single transaction
#[derive(Args)]
pub struct DeployArgs {
    /// Owner of the diamond, defaults to the deployer
    #[arg(short, long)]
    pub owner: Option<Address>,

    /// Facets to cut into the diamond, in order
    #[arg(short, long, value_delimiter = ',', default_values = DEFAULT_FACET_NAMES)]
    pub facets: Vec<String>,

    /// Contracts already deployed by an earlier run, as `Name=0xaddr`
    #[arg(long)]
    pub reuse: Vec<DeployedContract>,

    /// Functions to leave out of a facet's cut, as `Name=function`
    #[arg(long)]
    pub exclude: Vec<ExcludedFunction>,

    /// The initializer to run
    #[command(flatten)]
    pub init: InitArgs,
}

/// Upgrade a diamond's facets
#[derive(Args)]
pub struct UpgradeArgs {
    /// Address of the diamond, read from the deployments file when omitted
    #[arg(long)]
    pub diamond: Option<Address>,

    /// Facets the diamond should route to, in order
    #[arg(short, long, value_delimiter = ',', required = true)]
    pub facets: Vec<String>,

    /// Contracts already deployed by an earlier run, as `Name=0xaddr`
    #[arg(long)]
    pub reuse: Vec<DeployedContract>,

    /// Functions to leave out of a facet's cut, as `Name=function`
    #[arg(long)]
    pub exclude: Vec<ExcludedFunction>,

    /// Facet addresses whose remaining functions should be removed
    #[arg(long, value_delimiter = ',')]
    pub retire: Vec<Address>,

    /// The initializer to run
    #[command(flatten)]
    pub init: InitArgs,
}

/// Initializer arguments shared by both commands
#[derive(Args)]
pub struct InitArgs {
    /// The initializer contract to delegatecall after the cut. `deploy`
    /// defaults to `DiamondInit`, `upgrade` runs no initializer by default
    #[arg(long, conflicts_with = "no_init")]
    pub init: Option<String>,

    /// Calldata for the initializer, defaults to `init()`
    #[arg(long, requires = "init")]
    pub init_calldata: Option<Bytes>,

    /// Run no initializer
    #[arg(long)]
    pub no_init: bool,
}

impl InitArgs {
    /// The initializer contract to run, given the command's default
    pub fn contract(&self, default: Option<&str>) -> Option<String> {
        if self.no_init {
            return None;
        }

        self.init.clone().or_else(|| default.map(str::to_string))
    }
}

/// The default initializer contract for `deploy`
pub const DEFAULT_INIT_CONTRACT: Option<&str> = Some(DIAMOND_INIT_CONTRACT_NAME);

/// A contract confirmed by an earlier run, given as `Name=0xaddr`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeployedContract {
    /// The contract name
    pub name: String,
    /// The deployed address
    pub address: Address,
}

impl FromStr for DeployedContract {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, address) = split_pair(s)?;
        let address =
            Address::from_str(address).map_err(|e| ScriptError::InvalidArgument(e.to_string()))?;

        Ok(DeployedContract {
            name: name.to_string(),
            address,
        })
    }
}

/// A function to leave out of a facet's cut, given as `Name=function`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExcludedFunction {
    /// The facet name
    pub facet: String,
    /// A bare function name or a full signature
    pub function: String,
}

impl FromStr for ExcludedFunction {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (facet, function) = split_pair(s)?;
        Ok(ExcludedFunction {
            facet: facet.to_string(),
            function: function.to_string(),
        })
    }
}

/// Split a `key=value` argument, rejecting empty halves
fn split_pair(s: &str) -> Result<(&str, &str), ScriptError> {
    match s.split_once(REUSE_SEPARATOR) {
        Some((key, value)) if !key.trim().is_empty() && !value.trim().is_empty() => {
            Ok((key.trim(), value.trim()))
        }
        _ => Err(ScriptError::InvalidArgument(format!(
            "expected `Name{}value`, got `{}`",
            REUSE_SEPARATOR, s
        ))),
    }
}
