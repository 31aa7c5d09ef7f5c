use std::sync::Arc;

use alloy_primitives::{Address, Bytes};
use alloy_sol_types::SolCall;
use diamond_core::{
    constants::{DIAMOND_CONTRACT_NAME, DIAMOND_CUT_FACET_NAME, DIAMOND_INIT_CONTRACT_NAME},
    cuts::{build_cuts, DesiredState},
    errors::DiamondError,
    orchestrator::{FacetSpec, UpgradeOrchestrator, UpgradePlan, UpgradeStage, UpgradeState},
    registry::DeploymentRegistry,
    selectors::FacetSelection,
    solidity::initCall,
    types::{FacetCut, FacetCutAction},
};
use diamond_tests::{
    registry::InMemoryRegistry,
    utils::{
        selector, selectors, test_owner, test_registry, BURN_SIGNATURE, DIAMOND_CUT_SIGNATURE,
        MINT_SIGNATURE, OWNERSHIP_FACET, OWNERSHIP_SIGNATURES, SUPPORTS_INTERFACE_SIGNATURE,
        TOKEN_FACET, TOKEN_FACET_V2,
    },
};
use eyre::Result;

/// The single deployed address of a contract
fn deployed(registry: &InMemoryRegistry, name: &str) -> Address {
    let addresses = registry.deployments_of(name);
    assert_eq!(addresses.len(), 1, "{name} deployed {} times", addresses.len());
    addresses[0]
}

/// A plan deploying a diamond with the token and ownership facets
fn token_and_ownership_plan() -> UpgradePlan {
    UpgradePlan::deploy(test_owner())
        .with_facets(vec![FacetSpec::new(TOKEN_FACET), FacetSpec::new(OWNERSHIP_FACET)])
}

/// Deploy a diamond with the token and ownership facets
async fn deploy_token_diamond(registry: &Arc<InMemoryRegistry>) -> Result<Address> {
    let mut orchestrator = UpgradeOrchestrator::new(registry.clone(), token_and_ownership_plan());
    Ok(orchestrator.run().await?)
}

#[tokio::test]
async fn test_deploy_end_to_end() -> Result<()> {
    let registry = Arc::new(test_registry());
    let mut orchestrator = UpgradeOrchestrator::new(registry.clone(), token_and_ownership_plan());
    let diamond = orchestrator.run().await?;

    assert_eq!(deployed(&registry, DIAMOND_CONTRACT_NAME), diamond);
    let cut_facet = deployed(&registry, DIAMOND_CUT_FACET_NAME);
    let token = deployed(&registry, TOKEN_FACET);
    let ownership = deployed(&registry, OWNERSHIP_FACET);
    let init = deployed(&registry, DIAMOND_INIT_CONTRACT_NAME);

    // One cut per new facet, in plan order, with the initializer attached
    let submissions = registry.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(
        submissions[0].cuts,
        vec![
            FacetCut {
                facet_address: token,
                action: FacetCutAction::Add,
                selectors: selectors(&[BURN_SIGNATURE]),
            },
            FacetCut {
                facet_address: ownership,
                action: FacetCutAction::Add,
                selectors: selectors(&OWNERSHIP_SIGNATURES),
            },
        ]
    );
    assert_eq!(submissions[0].init, init);
    assert_eq!(submissions[0].init_calldata, Bytes::from(initCall {}.abi_encode()));

    let routes = registry.routes(diamond).unwrap();
    assert_eq!(routes.len(), 5);
    assert_eq!(routes.facet_of(&selector(DIAMOND_CUT_SIGNATURE)), Some(cut_facet));
    assert_eq!(routes.facet_of(&selector(SUPPORTS_INTERFACE_SIGNATURE)), Some(cut_facet));
    assert_eq!(routes.facet_of(&selector(BURN_SIGNATURE)), Some(token));
    for sig in OWNERSHIP_SIGNATURES {
        assert_eq!(routes.facet_of(&selector(sig)), Some(ownership));
    }
    assert_eq!(routes.facet_of(&selector("init(bytes)")), None);

    assert_eq!(orchestrator.diamond_address(), Some(diamond));
    assert_eq!(
        orchestrator.state(),
        &UpgradeState::Verified {
            diamond,
            tx_hash: Some(submissions[0].tx_hash),
        }
    );

    Ok(())
}

#[tokio::test]
async fn test_step_through_states() -> Result<()> {
    let registry = Arc::new(test_registry());
    let mut orchestrator = UpgradeOrchestrator::new(registry.clone(), token_and_ownership_plan());

    assert_eq!(orchestrator.state().stage(), Some(UpgradeStage::Init));
    assert_eq!(orchestrator.step().await.stage(), Some(UpgradeStage::FacetsDeployed));
    assert!(registry.submissions().is_empty());

    assert_eq!(orchestrator.step().await.stage(), Some(UpgradeStage::CutComputed));
    assert_eq!(orchestrator.progress().cuts.len(), 2);
    assert!(registry.submissions().is_empty());

    assert_eq!(orchestrator.step().await.stage(), Some(UpgradeStage::CutSubmitted));
    assert_eq!(registry.submissions().len(), 1);
    assert_eq!(orchestrator.diamond_address(), None);

    assert!(matches!(orchestrator.step().await, UpgradeState::Verified { .. }));
    assert!(orchestrator.diamond_address().is_some());

    // Terminal states are left as is
    assert!(matches!(orchestrator.step().await, UpgradeState::Verified { .. }));
    assert_eq!(registry.submissions().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_reverted_upgrade() -> Result<()> {
    let registry = Arc::new(test_registry());
    registry.revert_upgrades(true);

    let mut orchestrator = UpgradeOrchestrator::new(registry.clone(), token_and_ownership_plan());
    let report = orchestrator.run().await.unwrap_err();

    let tx_hash = registry.submissions()[0].tx_hash;
    assert_eq!(report.stage, UpgradeStage::CutSubmitted);
    assert_eq!(report.error, DiamondError::UpgradeRevert { tx_hash });
    assert_eq!(report.progress.tx_hash, Some(tx_hash));
    assert_eq!(orchestrator.diamond_address(), None);
    assert!(orchestrator.state().is_terminal());

    // Only the cut facet is routed
    let diamond = report.progress.diamond.unwrap();
    let cut_facet = deployed(&registry, DIAMOND_CUT_FACET_NAME);
    assert_eq!(
        registry.routes(diamond).unwrap().facet_addresses(),
        vec![cut_facet]
    );

    Ok(())
}

#[tokio::test]
async fn test_rerun_is_noop() -> Result<()> {
    let registry = Arc::new(test_registry());
    let diamond = deploy_token_diamond(&registry).await?;
    let token = deployed(&registry, TOKEN_FACET);
    let ownership = deployed(&registry, OWNERSHIP_FACET);

    // The same desired state diffs to nothing against the upgraded diamond
    let desired = DesiredState::new()
        .with_facet(token, selectors(&[BURN_SIGNATURE]))
        .with_facet(ownership, selectors(&OWNERSHIP_SIGNATURES));
    let table = registry.selector_table(diamond).await?;
    assert!(build_cuts(&desired, &table)?.is_empty());

    // And a second run submits nothing
    let plan = UpgradePlan::upgrade(diamond).with_facets(vec![
        FacetSpec::new(TOKEN_FACET).deployed_at(token),
        FacetSpec::new(OWNERSHIP_FACET).deployed_at(ownership),
    ]);
    let mut orchestrator = UpgradeOrchestrator::new(registry.clone(), plan);
    assert_eq!(orchestrator.run().await?, diamond);

    assert_eq!(
        orchestrator.state(),
        &UpgradeState::Verified {
            diamond,
            tx_hash: None,
        }
    );
    assert_eq!(registry.submissions().len(), 1);
    assert_eq!(registry.deployments_of(TOKEN_FACET).len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_upgrade_replaces_and_removes() -> Result<()> {
    let registry = Arc::new(test_registry());
    let diamond = deploy_token_diamond(&registry).await?;
    let token = deployed(&registry, TOKEN_FACET);
    let ownership = deployed(&registry, OWNERSHIP_FACET);

    let plan = UpgradePlan::upgrade(diamond)
        .with_facets(vec![FacetSpec::new(TOKEN_FACET_V2)])
        .with_retired(token)
        .with_retired(ownership);
    let mut orchestrator = UpgradeOrchestrator::new(registry.clone(), plan);
    orchestrator.run().await?;

    let token_v2 = deployed(&registry, TOKEN_FACET_V2);
    let submission = registry.submissions().pop().unwrap();
    assert_eq!(
        submission.cuts,
        vec![
            FacetCut {
                facet_address: token_v2,
                action: FacetCutAction::Add,
                selectors: selectors(&[MINT_SIGNATURE]),
            },
            FacetCut {
                facet_address: token_v2,
                action: FacetCutAction::Replace,
                selectors: selectors(&[BURN_SIGNATURE]),
            },
            FacetCut {
                facet_address: Address::ZERO,
                action: FacetCutAction::Remove,
                selectors: selectors(&OWNERSHIP_SIGNATURES),
            },
        ]
    );
    assert!(submission.init.is_zero());
    assert!(submission.init_calldata.is_empty());

    let routes = registry.routes(diamond).unwrap();
    assert_eq!(routes.selectors_of(token_v2).len(), 2);
    assert!(routes.selectors_of(token).is_empty());
    assert!(routes.selectors_of(ownership).is_empty());
    // The cut facet was never mentioned and keeps its routes
    assert_eq!(
        routes.selectors_of(deployed(&registry, DIAMOND_CUT_FACET_NAME)).len(),
        2
    );

    Ok(())
}

#[tokio::test]
async fn test_partial_facet_selection() -> Result<()> {
    let registry = Arc::new(test_registry());
    let plan = UpgradePlan::deploy(test_owner())
        .with_facets(vec![
            FacetSpec::new(OWNERSHIP_FACET)
                .with_selection(FacetSelection::Only(vec!["owner".to_string()])),
            FacetSpec::new(TOKEN_FACET_V2)
                .with_selection(FacetSelection::Except(vec![MINT_SIGNATURE.to_string()])),
        ])
        .with_init(None);
    let mut orchestrator = UpgradeOrchestrator::new(registry.clone(), plan);
    let diamond = orchestrator.run().await?;

    let routes = registry.routes(diamond).unwrap();
    let ownership = deployed(&registry, OWNERSHIP_FACET);
    let token_v2 = deployed(&registry, TOKEN_FACET_V2);
    assert_eq!(routes.selectors_of(ownership), selectors(&["owner()"]));
    assert_eq!(routes.selectors_of(token_v2), selectors(&[BURN_SIGNATURE]));
    assert!(registry.deployments_of(DIAMOND_INIT_CONTRACT_NAME).is_empty());
    assert!(registry.submissions()[0].init.is_zero());

    Ok(())
}

#[tokio::test]
async fn test_unknown_projected_function() -> Result<()> {
    let registry = Arc::new(test_registry());
    let plan = UpgradePlan::deploy(test_owner()).with_facets(vec![FacetSpec::new(OWNERSHIP_FACET)
        .with_selection(FacetSelection::Only(vec!["renounceOwnership".to_string()]))]);
    let mut orchestrator = UpgradeOrchestrator::new(registry.clone(), plan);

    let report = orchestrator.run().await.unwrap_err();
    assert_eq!(
        report.error,
        DiamondError::UnknownFunction("renounceOwnership".to_string())
    );
    assert!(registry.deployments().is_empty());

    Ok(())
}
