//! Implementations of the deploy scripts

use std::{collections::HashMap, sync::Arc};

use alloy::primitives::Address;
use diamond_core::{
    constants::DIAMOND_CUT_FACET_NAME,
    orchestrator::{
        DeploymentProgress, DiamondTarget, FacetSpec, InitSpec, UpgradeOrchestrator, UpgradePlan,
    },
    selectors::FacetSelection,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    chain::ChainRegistry,
    cli::{
        DeployArgs, DeployedContract, ExcludedFunction, InitArgs, ScriptContext, UpgradeArgs,
        DEFAULT_INIT_CONTRACT,
    },
    constants::DIAMOND_DEPLOYMENT_KEY,
    errors::ScriptError,
    utils::{parse_addr_from_deployments_file, write_deployed_addresses},
};

/// Deploy a new diamond and cut in its facets
pub(crate) async fn deploy(
    args: DeployArgs,
    registry: Arc<ChainRegistry>,
    ctx: &ScriptContext,
) -> Result<(), ScriptError> {
    let owner = args.owner.unwrap_or(ctx.deployer);
    let mut reused = ReusedContracts::new(&args.reuse);

    let facets = facet_specs(&args.facets, &args.exclude, &mut reused)?;
    let init = init_spec(&args.init, DEFAULT_INIT_CONTRACT, &mut reused);
    let plan = UpgradePlan {
        target: DiamondTarget::Deploy {
            owner,
            cut_facet: reused.take(DIAMOND_CUT_FACET_NAME),
        },
        ..UpgradePlan::deploy(owner)
    }
    .with_facets(facets)
    .with_init(init);
    reused.ensure_all_used()?;

    info!("Deploying diamond owned by {:#x}", owner);
    run_plan(plan, registry, ctx).await
}

/// Cut facets into an existing diamond
pub(crate) async fn upgrade(
    args: UpgradeArgs,
    registry: Arc<ChainRegistry>,
    ctx: &ScriptContext,
) -> Result<(), ScriptError> {
    let diamond = match (args.diamond, &ctx.deployments_path) {
        (Some(diamond), _) => diamond,
        (None, Some(path)) => parse_addr_from_deployments_file(path, DIAMOND_DEPLOYMENT_KEY)?,
        (None, None) => {
            return Err(ScriptError::InvalidArgument(
                "either --diamond or --deployments-path must be given".to_string(),
            ))
        }
    };
    let mut reused = ReusedContracts::new(&args.reuse);

    let facets = facet_specs(&args.facets, &args.exclude, &mut reused)?;
    let init = init_spec(&args.init, None, &mut reused);
    let plan = args
        .retire
        .iter()
        .fold(UpgradePlan::upgrade(diamond), |plan, facet| plan.with_retired(*facet))
        .with_facets(facets)
        .with_init(init);
    reused.ensure_all_used()?;

    run_plan(plan, registry, ctx).await
}

// -----------
// | Helpers |
// -----------

/// Contracts confirmed by an earlier run, consumed as the plan uses them
struct ReusedContracts {
    /// The remaining addresses by contract name
    addresses: HashMap<String, Address>,
}

impl ReusedContracts {
    /// Index the `--reuse` arguments by name
    fn new(contracts: &[DeployedContract]) -> Self {
        ReusedContracts {
            addresses: contracts
                .iter()
                .map(|c| (c.name.clone(), c.address))
                .collect(),
        }
    }

    /// Take the address of a named contract, if one was given
    fn take(&mut self, name: &str) -> Option<Address> {
        self.addresses.remove(name)
    }

    /// Reject reused contracts the plan never refers to
    fn ensure_all_used(&self) -> Result<(), ScriptError> {
        if self.addresses.is_empty() {
            return Ok(());
        }

        let mut names: Vec<&str> = self.addresses.keys().map(String::as_str).collect();
        names.sort_unstable();
        Err(ScriptError::InvalidArgument(format!(
            "reused contracts not part of the deployment: {}",
            names.join(", ")
        )))
    }
}

/// Build the facet list, attaching reused addresses and exclusions
fn facet_specs(
    names: &[String],
    exclusions: &[ExcludedFunction],
    reused: &mut ReusedContracts,
) -> Result<Vec<FacetSpec>, ScriptError> {
    if let Some(stray) = exclusions.iter().find(|e| !names.contains(&e.facet)) {
        return Err(ScriptError::InvalidArgument(format!(
            "cannot exclude {} from {}, which is not being cut",
            stray.function, stray.facet
        )));
    }

    let specs = names
        .iter()
        .map(|name| {
            let excluded: Vec<String> = exclusions
                .iter()
                .filter(|e| &e.facet == name)
                .map(|e| e.function.clone())
                .collect();

            let mut spec = FacetSpec::new(name.as_str());
            if let Some(address) = reused.take(name) {
                spec = spec.deployed_at(address);
            }
            if !excluded.is_empty() {
                spec = spec.with_selection(FacetSelection::Except(excluded));
            }
            spec
        })
        .collect();

    Ok(specs)
}

/// Build the initializer, if the command runs one
fn init_spec(
    args: &InitArgs,
    default: Option<&str>,
    reused: &mut ReusedContracts,
) -> Option<InitSpec> {
    let contract = args.contract(default)?;
    let defaults = InitSpec::diamond_init();

    Some(InitSpec {
        deployed: reused.take(&contract),
        calldata: args.init_calldata.clone().unwrap_or(defaults.calldata),
        contract,
    })
}

/// Run a plan to completion, recording every confirmed address whether or
/// not the plan succeeds
async fn run_plan(
    plan: UpgradePlan,
    registry: Arc<ChainRegistry>,
    ctx: &ScriptContext,
) -> Result<(), ScriptError> {
    let init_contract = plan.init.as_ref().map(|init| init.contract.clone());

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current step");
            interrupt.cancel();
        }
    });

    let mut orchestrator = UpgradeOrchestrator::new(registry, plan)
        .with_config(ctx.config)
        .with_cancellation(cancel);
    let res = orchestrator.run().await;

    let addresses = confirmed_addresses(orchestrator.progress(), init_contract.as_deref());
    for (name, address) in &addresses {
        info!("{}: {:#x}", name, address);
    }
    if let Some(path) = &ctx.deployments_path {
        let written = write_deployed_addresses(path, addresses.iter().map(|(n, a)| (*n, *a)));
        match (&res, written) {
            (Ok(_), Err(e)) => return Err(e),
            (Err(_), Err(e)) => error!("Could not record confirmed addresses: {}", e),
            (_, Ok(())) => info!("Recorded deployed addresses in {}", path.display()),
        }
    }

    match res {
        Ok(diamond) => {
            info!("Diamond ready at {:#x}", diamond);
            Ok(())
        }
        Err(report) => {
            error!("{}", report);
            if report.progress.tx_hash.is_some() || !addresses.is_empty() {
                warn!("Rerun with --reuse for the addresses above to resume");
            }
            Err(report.into())
        }
    }
}

/// Every address confirmed by a run, keyed the way the deployments file
/// records them
fn confirmed_addresses<'a>(
    progress: &'a DeploymentProgress,
    init_contract: Option<&'a str>,
) -> Vec<(&'a str, Address)> {
    let mut addresses = Vec::new();
    if let Some(diamond) = progress.diamond {
        addresses.push((DIAMOND_DEPLOYMENT_KEY, diamond));
    }
    if let Some(cut_facet) = progress.cut_facet {
        addresses.push((DIAMOND_CUT_FACET_NAME, cut_facet));
    }
    for facet in &progress.facets {
        addresses.push((facet.name.as_str(), facet.address));
    }
    for (name, address) in &progress.unattached {
        addresses.push((name.as_str(), *address));
    }
    if let (Some(name), Some(init)) = (init_contract, progress.init) {
        addresses.push((name, init));
    }

    addresses
}
