use std::{sync::Arc, time::Duration};

use alloy_primitives::Bytes;
use diamond_core::{
    constants::{DIAMOND_CONTRACT_NAME, DIAMOND_CUT_FACET_NAME},
    errors::DiamondError,
    orchestrator::{
        FacetSpec, InitSpec, OrchestratorConfig, UpgradeOrchestrator, UpgradePlan, UpgradeStage,
        UpgradeState,
    },
    registry::DeploymentRegistry,
};
use diamond_tests::utils::{
    selector, test_owner, test_registry, BURN_SIGNATURE, COLLIDING_SIGNATURE, OWNERSHIP_FACET,
    OWNERSHIP_SIGNATURES, STORAGE_FACET, TOKEN_FACET,
};
use eyre::Result;
use tokio_util::sync::CancellationToken;

/// A plan deploying a diamond with the token facet
fn token_plan() -> UpgradePlan {
    UpgradePlan::deploy(test_owner()).with_facets(vec![FacetSpec::new(TOKEN_FACET)])
}

#[tokio::test]
async fn test_resume_after_facet_deployment_failure() -> Result<()> {
    let registry = Arc::new(test_registry());
    registry.fail_deployments_of(OWNERSHIP_FACET);

    let plan = UpgradePlan::deploy(test_owner())
        .with_facets(vec![FacetSpec::new(TOKEN_FACET), FacetSpec::new(OWNERSHIP_FACET)]);
    let mut orchestrator = UpgradeOrchestrator::new(registry.clone(), plan);
    let report = orchestrator.run().await.unwrap_err();

    assert_eq!(report.stage, UpgradeStage::Init);
    assert!(matches!(
        &report.error,
        DiamondError::DeploymentFailure { contract, .. } if contract == OWNERSHIP_FACET
    ));
    assert!(registry.submissions().is_empty());

    // Everything confirmed before the failure is reported
    let progress = report.progress;
    let diamond = progress.diamond.unwrap();
    let token = progress.facet_address(TOKEN_FACET).unwrap();
    assert!(progress.cut_facet.is_some());
    assert!(progress.init.is_some());
    assert_eq!(progress.facet_address(OWNERSHIP_FACET), None);

    // Resume against the deployed diamond, reusing what was confirmed
    registry.allow_deployments_of(OWNERSHIP_FACET);
    let resume = UpgradePlan::upgrade(diamond)
        .with_facets(vec![
            FacetSpec::new(TOKEN_FACET).deployed_at(token),
            FacetSpec::new(OWNERSHIP_FACET),
        ])
        .with_init(Some(InitSpec {
            deployed: progress.init,
            ..InitSpec::diamond_init()
        }));
    let mut orchestrator = UpgradeOrchestrator::new(registry.clone(), resume);
    assert_eq!(orchestrator.run().await?, diamond);

    assert_eq!(registry.deployments_of(DIAMOND_CONTRACT_NAME).len(), 1);
    assert_eq!(registry.deployments_of(TOKEN_FACET), vec![token]);
    let ownership = registry.deployments_of(OWNERSHIP_FACET)[0];

    let routes = registry.routes(diamond).unwrap();
    assert_eq!(routes.facet_of(&selector(BURN_SIGNATURE)), Some(token));
    for sig in OWNERSHIP_SIGNATURES {
        assert_eq!(routes.facet_of(&selector(sig)), Some(ownership));
    }

    Ok(())
}

#[tokio::test]
async fn test_attach_failure_keeps_deployed_address() -> Result<()> {
    let registry = Arc::new(test_registry());
    registry.fail_attaching_to(OWNERSHIP_FACET);

    let plan = UpgradePlan::deploy(test_owner())
        .with_facets(vec![FacetSpec::new(TOKEN_FACET), FacetSpec::new(OWNERSHIP_FACET)]);
    let mut orchestrator = UpgradeOrchestrator::new(registry.clone(), plan);
    let report = orchestrator.run().await.unwrap_err();

    assert_eq!(report.stage, UpgradeStage::Init);
    assert!(matches!(report.error, DiamondError::Registry(_)));

    // The facet confirmed on chain is reported even though it was never attached
    let ownership = registry.deployments_of(OWNERSHIP_FACET);
    assert_eq!(ownership.len(), 1);
    let progress = report.progress;
    assert_eq!(progress.facet_address(OWNERSHIP_FACET), Some(ownership[0]));
    assert_eq!(progress.unattached, vec![(OWNERSHIP_FACET.to_string(), ownership[0])]);
    assert!(progress.facet_address(TOKEN_FACET).is_some());

    Ok(())
}

#[tokio::test]
async fn test_concurrent_upgrades_serialize() -> Result<()> {
    // Snapshots arrive late, so an unserialized pair would diff the same routes
    let registry = Arc::new(test_registry().with_snapshot_delay(Duration::from_millis(50)));

    // A bare diamond routing only the cut facet
    let bare = UpgradePlan::deploy(test_owner()).with_facets(Vec::new()).with_init(None);
    let diamond = UpgradeOrchestrator::new(registry.clone(), bare).run().await?;
    assert!(registry.submissions().is_empty());

    let token = registry.deploy(TOKEN_FACET, Bytes::new()).await?;
    let ownership = registry.deploy(OWNERSHIP_FACET, Bytes::new()).await?;
    let plan = UpgradePlan::upgrade(diamond).with_facets(vec![
        FacetSpec::new(TOKEN_FACET).deployed_at(token),
        FacetSpec::new(OWNERSHIP_FACET).deployed_at(ownership),
    ]);

    let mut first = UpgradeOrchestrator::new(registry.clone(), plan.clone());
    let mut second = UpgradeOrchestrator::new(registry.clone(), plan);
    let (first_res, second_res) = tokio::join!(first.run(), second.run());
    assert_eq!(first_res?, diamond);
    assert_eq!(second_res?, diamond);

    // Exactly one of them submitted a cut, the other found nothing to do
    assert_eq!(registry.submissions().len(), 1);
    let submitted = [first.state(), second.state()]
        .into_iter()
        .filter(|state| matches!(state, UpgradeState::Verified { tx_hash: Some(_), .. }))
        .count();
    assert_eq!(submitted, 1);

    Ok(())
}

#[tokio::test]
async fn test_step_timeout() -> Result<()> {
    let registry = Arc::new(test_registry().with_deploy_delay(Duration::from_millis(500)));
    let config = OrchestratorConfig {
        step_timeout: Duration::from_millis(20),
    };

    let mut orchestrator =
        UpgradeOrchestrator::new(registry.clone(), token_plan()).with_config(config);
    let report = orchestrator.run().await.unwrap_err();

    assert_eq!(report.stage, UpgradeStage::Init);
    assert_eq!(
        report.error,
        DiamondError::Timeout {
            step: format!("deployment of {}", DIAMOND_CUT_FACET_NAME),
        }
    );
    assert!(registry.deployments().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_submission_failure() -> Result<()> {
    let registry = Arc::new(test_registry());
    registry.reject_submissions(true);

    let mut orchestrator = UpgradeOrchestrator::new(registry.clone(), token_plan());
    let report = orchestrator.run().await.unwrap_err();

    assert_eq!(report.stage, UpgradeStage::CutComputed);
    assert!(matches!(report.error, DiamondError::SubmissionFailure(_)));
    assert_eq!(report.progress.tx_hash, None);
    assert_eq!(report.progress.cuts.len(), 1);
    assert!(registry.submissions().is_empty());

    // The diamond is free for a resumed upgrade
    registry.reject_submissions(false);
    let progress = report.progress;
    let diamond = progress.diamond.unwrap();
    let resume = UpgradePlan::upgrade(diamond)
        .with_facets(vec![
            FacetSpec::new(TOKEN_FACET).deployed_at(progress.facet_address(TOKEN_FACET).unwrap())
        ])
        .with_init(Some(InitSpec {
            deployed: progress.init,
            ..InitSpec::diamond_init()
        }));
    UpgradeOrchestrator::new(registry.clone(), resume).run().await?;

    assert_eq!(registry.submissions().len(), 1);
    assert_eq!(registry.deployments_of(TOKEN_FACET).len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_confirmation_timeout_keeps_tx_hash() -> Result<()> {
    let registry = Arc::new(test_registry().with_confirm_delay(Duration::from_millis(500)));
    let config = OrchestratorConfig {
        step_timeout: Duration::from_millis(100),
    };

    let mut orchestrator =
        UpgradeOrchestrator::new(registry.clone(), token_plan()).with_config(config);
    let report = orchestrator.run().await.unwrap_err();

    let tx_hash = registry.submissions()[0].tx_hash;
    assert_eq!(report.stage, UpgradeStage::CutSubmitted);
    assert_eq!(
        report.error,
        DiamondError::Timeout {
            step: "upgrade confirmation".to_string(),
        }
    );
    assert_eq!(report.progress.tx_hash, Some(tx_hash));

    Ok(())
}

#[tokio::test]
async fn test_dropped_step_keeps_state() -> Result<()> {
    let registry = Arc::new(test_registry().with_deploy_delay(Duration::from_millis(100)));
    let mut orchestrator = UpgradeOrchestrator::new(registry.clone(), token_plan());

    // Drop the step after the cut facet confirms, while the diamond deploys
    let step = tokio::time::timeout(Duration::from_millis(150), orchestrator.step()).await;
    assert!(step.is_err());
    assert_eq!(orchestrator.state(), &UpgradeState::Init);
    assert!(orchestrator.progress().cut_facet.is_some());
    assert!(registry.deployments_of(DIAMOND_CONTRACT_NAME).is_empty());

    // The next attempt picks up the confirmed cut facet
    orchestrator.run().await?;
    assert_eq!(registry.deployments_of(DIAMOND_CUT_FACET_NAME).len(), 1);
    assert_eq!(registry.deployments_of(DIAMOND_CONTRACT_NAME).len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_cancellation_mid_deployment() -> Result<()> {
    let registry = Arc::new(test_registry().with_deploy_delay(Duration::from_secs(5)));
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let mut orchestrator =
        UpgradeOrchestrator::new(registry.clone(), token_plan()).with_cancellation(cancel);
    let report = orchestrator.run().await.unwrap_err();

    assert_eq!(report.stage, UpgradeStage::Init);
    assert_eq!(report.error, DiamondError::Cancelled);
    assert!(registry.deployments().is_empty());
    assert_eq!(orchestrator.diamond_address(), None);

    Ok(())
}

#[tokio::test]
async fn test_cancelled_before_start() -> Result<()> {
    let registry = Arc::new(test_registry());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut orchestrator =
        UpgradeOrchestrator::new(registry.clone(), token_plan()).with_cancellation(cancel);
    let report = orchestrator.run().await.unwrap_err();

    assert_eq!(report.error, DiamondError::Cancelled);
    assert!(registry.deployments().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_colliding_facets_rejected_before_deployment() -> Result<()> {
    let registry = Arc::new(test_registry());
    assert_eq!(selector(BURN_SIGNATURE), selector(COLLIDING_SIGNATURE));

    let plan = UpgradePlan::deploy(test_owner())
        .with_facets(vec![FacetSpec::new(TOKEN_FACET), FacetSpec::new(STORAGE_FACET)]);
    let mut orchestrator = UpgradeOrchestrator::new(registry.clone(), plan);
    let report = orchestrator.run().await.unwrap_err();

    assert_eq!(report.stage, UpgradeStage::Init);
    assert_eq!(
        report.error,
        DiamondError::SelectorCollision {
            selector: selector(BURN_SIGNATURE),
            first: TOKEN_FACET.to_string(),
            second: STORAGE_FACET.to_string(),
        }
    );
    assert!(registry.deployments().is_empty());
    assert!(registry.submissions().is_empty());

    Ok(())
}
