//! The upgrade orchestrator: deploys facets, computes the cut against a fresh
//! routing snapshot, submits it as one `diamondCut` transaction and verifies
//! the result.
//!
//! The orchestrator is an explicit state machine,
//! `Init -> FacetsDeployed -> CutComputed -> CutSubmitted -> Verified`, where
//! any step may instead land in `Failed`. A failure carries every address
//! confirmed so far, so the caller can resume with an
//! [`UpgradePlan::upgrade`] plan that reuses them; cut computation is
//! idempotent, so resuming never double-applies a cut.

use std::{
    collections::HashMap,
    error::Error,
    fmt::{self, Display},
    future::Future,
    sync::{Arc, OnceLock},
    time::Duration,
};

use alloy_primitives::{Address, Bytes, Selector, TxHash};
use alloy_sol_types::SolCall;
use futures::future::{join, join_all};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    constants::{
        DEFAULT_FACET_NAMES, DEFAULT_STEP_TIMEOUT, DIAMOND_CONTRACT_NAME, DIAMOND_CUT_FACET_NAME,
        DIAMOND_INIT_CONTRACT_NAME,
    },
    cuts::{build_cuts, DesiredState},
    errors::DiamondError,
    registry::DeploymentRegistry,
    selectors::{cut_selectors, FacetSelection},
    solidity::{diamond_constructor_args, initCall},
    types::{
        validate_cut_list, DiamondArgs, Facet, FacetCut, FacetCutAction, UpgradeTransaction,
    },
};

// ---------
// | Plans |
// ---------

/// A facet to route through the diamond
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FacetSpec {
    /// The contract name
    pub name: String,
    /// The facet's address, if it is already deployed
    pub deployed: Option<Address>,
    /// Which of the facet's functions to route
    pub selection: FacetSelection,
}

impl FacetSpec {
    /// A facet to deploy, routing all of its functions
    pub fn new(name: impl Into<String>) -> Self {
        FacetSpec {
            name: name.into(),
            deployed: None,
            selection: FacetSelection::All,
        }
    }

    /// Reuse an already deployed instance instead of deploying
    pub fn deployed_at(mut self, address: Address) -> Self {
        self.deployed = Some(address);
        self
    }

    /// Route only part of the facet's functions
    pub fn with_selection(mut self, selection: FacetSelection) -> Self {
        self.selection = selection;
        self
    }
}

/// The initializer delegatecalled once by the upgrade
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitSpec {
    /// The initializer contract name
    pub contract: String,
    /// The initializer's address, if it is already deployed
    pub deployed: Option<Address>,
    /// The calldata for the initializer call
    pub calldata: Bytes,
}

impl InitSpec {
    /// The default `DiamondInit` contract, called with `init()`
    pub fn diamond_init() -> Self {
        InitSpec {
            contract: DIAMOND_INIT_CONTRACT_NAME.to_string(),
            deployed: None,
            calldata: initCall {}.abi_encode().into(),
        }
    }
}

/// The diamond an upgrade targets
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiamondTarget {
    /// Deploy a new diamond with the cut facet installed
    Deploy {
        /// The diamond owner
        owner: Address,
        /// The cut facet's address, if it is already deployed
        cut_facet: Option<Address>,
    },
    /// Upgrade a diamond that already exists
    Existing(Address),
}

/// Everything the orchestrator needs to deploy or upgrade a diamond
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpgradePlan {
    /// The diamond to deploy or upgrade
    pub target: DiamondTarget,
    /// The name of the facet implementing `diamondCut`
    pub cut_facet: String,
    /// The name of the diamond contract
    pub diamond_contract: String,
    /// The facets to route, in the order their cuts are emitted
    pub facets: Vec<FacetSpec>,
    /// The initializer to call, if any
    pub init: Option<InitSpec>,
    /// Facets whose remaining routes should be removed
    pub retired: Vec<Address>,
}

impl UpgradePlan {
    /// A plan deploying a new diamond with the default facets and
    /// initializer
    pub fn deploy(owner: Address) -> Self {
        UpgradePlan {
            target: DiamondTarget::Deploy {
                owner,
                cut_facet: None,
            },
            cut_facet: DIAMOND_CUT_FACET_NAME.to_string(),
            diamond_contract: DIAMOND_CONTRACT_NAME.to_string(),
            facets: DEFAULT_FACET_NAMES.iter().map(|n| FacetSpec::new(*n)).collect(),
            init: Some(InitSpec::diamond_init()),
            retired: Vec::new(),
        }
    }

    /// A plan upgrading an existing diamond, with no facets and no
    /// initializer
    pub fn upgrade(diamond: Address) -> Self {
        UpgradePlan {
            target: DiamondTarget::Existing(diamond),
            cut_facet: DIAMOND_CUT_FACET_NAME.to_string(),
            diamond_contract: DIAMOND_CONTRACT_NAME.to_string(),
            facets: Vec::new(),
            init: None,
            retired: Vec::new(),
        }
    }

    /// Replace the facet list
    pub fn with_facets(mut self, facets: Vec<FacetSpec>) -> Self {
        self.facets = facets;
        self
    }

    /// Replace the initializer
    pub fn with_init(mut self, init: Option<InitSpec>) -> Self {
        self.init = init;
        self
    }

    /// Retire a facet
    pub fn with_retired(mut self, facet: Address) -> Self {
        self.retired.push(facet);
        self
    }
}

/// Configuration for the orchestrator
#[derive(Copy, Clone, Debug)]
pub struct OrchestratorConfig {
    /// The time allowed for any single external step
    pub step_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }
}

// ---------
// | Locks |
// ---------

/// The locks every orchestrator in the process uses unless given its own
static SHARED_LOCKS: OnceLock<ProxyLocks> = OnceLock::new();

/// Per-diamond exclusion shared between orchestrators.
///
/// Held from the routing snapshot until the upgrade is verified or failed, so
/// no two upgrades diff against the same snapshot.
#[derive(Clone, Default)]
pub struct ProxyLocks {
    /// One lock per diamond address
    locks: Arc<Mutex<HashMap<Address, Arc<Mutex<()>>>>>,
}

impl ProxyLocks {
    /// Create an empty lock set, independent of the process-wide one
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide lock set
    pub fn shared() -> Self {
        SHARED_LOCKS.get_or_init(ProxyLocks::new).clone()
    }

    /// Wait for exclusive access to a diamond
    pub async fn acquire(&self, diamond: Address) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(diamond).or_default().clone()
        };

        lock.lock_owned().await
    }
}

// ----------
// | States |
// ----------

/// The non-terminal states, used to report where a failure happened
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpgradeStage {
    /// Deploying the diamond and facets
    Init,
    /// Computing the cut
    FacetsDeployed,
    /// Submitting the cut
    CutComputed,
    /// Confirming and verifying the cut
    CutSubmitted,
}

impl Display for UpgradeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradeStage::Init => write!(f, "facet deployment"),
            UpgradeStage::FacetsDeployed => write!(f, "cut computation"),
            UpgradeStage::CutComputed => write!(f, "cut submission"),
            UpgradeStage::CutSubmitted => write!(f, "cut confirmation"),
        }
    }
}

/// Everything confirmed on chain so far
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeploymentProgress {
    /// The diamond address
    pub diamond: Option<Address>,
    /// The cut facet address, when this run deployed or reused one
    pub cut_facet: Option<Address>,
    /// The facets confirmed so far
    pub facets: Vec<Facet>,
    /// Facets deployed on chain that could not be attached to
    pub unattached: Vec<(String, Address)>,
    /// The initializer address
    pub init: Option<Address>,
    /// The computed cut list
    pub cuts: Vec<FacetCut>,
    /// The upgrade transaction, once submitted
    pub tx_hash: Option<TxHash>,
}

impl DeploymentProgress {
    /// The address of a confirmed facet by name, attached to or not
    pub fn facet_address(&self, name: &str) -> Option<Address> {
        self.facets
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.address)
            .or_else(|| {
                self.unattached
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, addr)| *addr)
            })
    }
}

/// Why and where an upgrade failed, and what had been confirmed by then
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureReport {
    /// The stage that failed
    pub stage: UpgradeStage,
    /// The failure
    pub error: DiamondError,
    /// Everything confirmed before the failure
    pub progress: DeploymentProgress,
}

impl Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.error)
    }
}

impl Error for FailureReport {}

/// The orchestrator's state
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpgradeState {
    /// Nothing deployed yet
    Init,
    /// The diamond exists and every facet is confirmed
    FacetsDeployed {
        /// The diamond address
        diamond: Address,
        /// The confirmed facets, in plan order
        facets: Vec<Facet>,
        /// The confirmed initializer
        init: Option<Address>,
    },
    /// The cut has been computed against a fresh snapshot
    CutComputed {
        /// The diamond address
        diamond: Address,
        /// The transaction to submit
        upgrade: UpgradeTransaction,
        /// The routing the upgrade should produce
        desired: DesiredState,
    },
    /// The cut has been broadcast
    CutSubmitted {
        /// The diamond address
        diamond: Address,
        /// The upgrade transaction hash
        tx_hash: TxHash,
        /// The routing the upgrade should produce
        desired: DesiredState,
    },
    /// The diamond routes every planned selector
    Verified {
        /// The diamond address
        diamond: Address,
        /// The upgrade transaction, if one was needed
        tx_hash: Option<TxHash>,
    },
    /// The upgrade failed
    Failed(FailureReport),
}

impl UpgradeState {
    /// The stage this state is in, `None` when terminal
    pub fn stage(&self) -> Option<UpgradeStage> {
        match self {
            UpgradeState::Init => Some(UpgradeStage::Init),
            UpgradeState::FacetsDeployed { .. } => Some(UpgradeStage::FacetsDeployed),
            UpgradeState::CutComputed { .. } => Some(UpgradeStage::CutComputed),
            UpgradeState::CutSubmitted { .. } => Some(UpgradeStage::CutSubmitted),
            UpgradeState::Verified { .. } | UpgradeState::Failed(_) => None,
        }
    }

    /// Whether the state is `Verified` or `Failed`
    pub fn is_terminal(&self) -> bool {
        self.stage().is_none()
    }
}

// ----------------
// | Orchestrator |
// ----------------

/// Drives a diamond deployment or upgrade through a [`DeploymentRegistry`]
pub struct UpgradeOrchestrator<R> {
    /// The chain client
    registry: Arc<R>,
    /// The deployment to perform
    plan: UpgradePlan,
    /// Timeouts
    config: OrchestratorConfig,
    /// Per-diamond exclusion
    locks: ProxyLocks,
    /// Caller-initiated abort
    cancel: CancellationToken,
    /// The current state
    state: UpgradeState,
    /// Everything confirmed so far
    progress: DeploymentProgress,
    /// Held from the routing snapshot until a terminal state
    proxy_guard: Option<OwnedMutexGuard<()>>,
}

impl<R: DeploymentRegistry> UpgradeOrchestrator<R> {
    /// Create an orchestrator in the `Init` state, serialized with every other
    /// orchestrator in the process on the same diamond
    pub fn new(registry: Arc<R>, plan: UpgradePlan) -> Self {
        UpgradeOrchestrator {
            registry,
            plan,
            config: OrchestratorConfig::default(),
            locks: ProxyLocks::shared(),
            cancel: CancellationToken::new(),
            state: UpgradeState::Init,
            progress: DeploymentProgress::default(),
            proxy_guard: None,
        }
    }

    /// Set the orchestrator configuration
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a lock set other than the process-wide one
    pub fn with_locks(mut self, locks: ProxyLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Abort the upgrade when the token is cancelled
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The current state
    pub fn state(&self) -> &UpgradeState {
        &self.state
    }

    /// Everything confirmed so far
    pub fn progress(&self) -> &DeploymentProgress {
        &self.progress
    }

    /// The diamond address, only once the upgrade is verified
    pub fn diamond_address(&self) -> Option<Address> {
        match self.state {
            UpgradeState::Verified { diamond, .. } => Some(diamond),
            _ => None,
        }
    }

    /// Drive the upgrade to a terminal state, returning the diamond address
    pub async fn run(&mut self) -> Result<Address, FailureReport> {
        loop {
            match self.step().await {
                UpgradeState::Verified { diamond, .. } => return Ok(*diamond),
                UpgradeState::Failed(report) => return Err(report.clone()),
                _ => continue,
            }
        }
    }

    /// Perform a single state transition. Terminal states are left as is.
    ///
    /// The state only changes once the transition completes, so dropping the
    /// returned future leaves the orchestrator where it was. A diamond and
    /// cut facet confirmed before the drop are reused by the next attempt.
    pub async fn step(&mut self) -> &UpgradeState {
        let Some(stage) = self.state.stage() else {
            return &self.state;
        };

        let res = match self.state.clone() {
            UpgradeState::Init => self.deploy_facets().await,
            UpgradeState::FacetsDeployed {
                diamond,
                facets,
                init,
            } => self.compute_cut(diamond, facets, init).await,
            UpgradeState::CutComputed {
                diamond,
                upgrade,
                desired,
            } => self.submit_cut(diamond, upgrade, desired).await,
            UpgradeState::CutSubmitted {
                diamond,
                tx_hash,
                desired,
            } => self.verify_cut(diamond, tx_hash, desired).await,
            terminal => Ok(terminal),
        };

        self.state = match res {
            Ok(next) => next,
            Err(error) => {
                self.proxy_guard = None;
                warn!("Diamond upgrade failed during {}: {}", stage, error);
                UpgradeState::Failed(FailureReport {
                    stage,
                    error,
                    progress: self.progress.clone(),
                })
            }
        };

        &self.state
    }

    // --- Transitions --- //

    /// `Init -> FacetsDeployed`
    async fn deploy_facets(&mut self) -> Result<UpgradeState, DiamondError> {
        self.preflight().await?;

        let diamond = match (self.plan.target.clone(), self.progress.diamond) {
            (DiamondTarget::Existing(diamond), _) => {
                info!("Upgrading existing diamond at {:#x}", diamond);
                diamond
            }
            (DiamondTarget::Deploy { .. }, Some(diamond)) => {
                info!("Reusing {} at {:#x}", self.plan.diamond_contract, diamond);
                diamond
            }
            (DiamondTarget::Deploy { owner, cut_facet }, None) => {
                self.deploy_diamond(owner, cut_facet).await?
            }
        };
        self.progress.diamond = Some(diamond);

        // Facets are independent, deploy them and the initializer together.
        // Every deployment runs to completion so confirmed ones are recorded
        // even when a sibling fails.
        let this = &*self;
        let facet_deployments = join_all(
            this.plan
                .facets
                .iter()
                .map(|spec| this.obtain(&spec.name, spec.deployed)),
        );
        let init_deployment = async {
            match &this.plan.init {
                Some(init) => {
                    let (address, res) = this.obtain(&init.contract, init.deployed).await;
                    (address, res.map(Some))
                }
                None => (None, Ok(None)),
            }
        };
        let (facet_results, (init, init_result)) =
            join(facet_deployments, init_deployment).await;

        let mut first_err = None;
        let mut facets = Vec::with_capacity(facet_results.len());
        for (spec, (address, res)) in self.plan.facets.iter().zip(facet_results) {
            match res {
                Ok(facet) => {
                    self.progress.facets.push(facet.clone());
                    facets.push(facet);
                }
                Err(e) => {
                    if let Some(address) = address {
                        self.progress.unattached.push((spec.name.clone(), address));
                    }
                    first_err.get_or_insert(e);
                }
            }
        }

        self.progress.init = init;
        if let Err(e) = init_result {
            first_err.get_or_insert(e);
        }

        if let Some(e) = first_err {
            return Err(e);
        }

        Ok(UpgradeState::FacetsDeployed {
            diamond,
            facets,
            init,
        })
    }

    /// `FacetsDeployed -> CutComputed`
    async fn compute_cut(
        &mut self,
        diamond: Address,
        facets: Vec<Facet>,
        init: Option<Address>,
    ) -> Result<UpgradeState, DiamondError> {
        // A dropped earlier attempt may already hold the lock
        if self.proxy_guard.is_none() {
            let locks = self.locks.clone();
            let guard = self
                .guarded("diamond lock", async move { Ok(locks.acquire(diamond).await) })
                .await?;
            self.proxy_guard = Some(guard);
        }

        let table = self
            .guarded("routing snapshot", self.registry.selector_table(diamond))
            .await?;

        let mut desired = DesiredState::new();
        for (spec, facet) in self.plan.facets.iter().zip(&facets) {
            desired = desired.with_facet(facet.address, spec.selection.select(&facet.interface)?);
        }
        for retired in &self.plan.retired {
            desired = desired.with_retired(*retired);
        }

        let cuts = build_cuts(&desired, &table)?;
        for cut in &cuts {
            info!(
                "Diamond cut: {} {} selectors on {:#x}",
                cut.action,
                cut.selectors.len(),
                cut.facet_address
            );
        }
        self.progress.cuts = cuts.clone();

        let init_calldata = match (&self.plan.init, init) {
            (Some(spec), Some(_)) => spec.calldata.clone(),
            _ => Bytes::new(),
        };
        let upgrade = UpgradeTransaction::new(cuts, init, init_calldata)?;

        Ok(UpgradeState::CutComputed {
            diamond,
            upgrade,
            desired,
        })
    }

    /// `CutComputed -> CutSubmitted`, or straight to `Verified` when there is
    /// nothing to submit
    async fn submit_cut(
        &mut self,
        diamond: Address,
        upgrade: UpgradeTransaction,
        desired: DesiredState,
    ) -> Result<UpgradeState, DiamondError> {
        if upgrade.is_noop() {
            info!("Diamond at {:#x} is up to date, nothing to submit", diamond);
            self.proxy_guard = None;
            return Ok(UpgradeState::Verified {
                diamond,
                tx_hash: None,
            });
        }

        let tx_hash = self
            .guarded(
                "upgrade submission",
                self.registry.submit_upgrade(diamond, &upgrade),
            )
            .await?;
        self.progress.tx_hash = Some(tx_hash);
        info!("Diamond cut tx: {:#x}", tx_hash);

        Ok(UpgradeState::CutSubmitted {
            diamond,
            tx_hash,
            desired,
        })
    }

    /// `CutSubmitted -> Verified`
    async fn verify_cut(
        &mut self,
        diamond: Address,
        tx_hash: TxHash,
        desired: DesiredState,
    ) -> Result<UpgradeState, DiamondError> {
        let outcome = self
            .guarded("upgrade confirmation", self.registry.confirm(tx_hash))
            .await?;
        if !outcome.success {
            return Err(DiamondError::UpgradeRevert {
                tx_hash: outcome.tx_hash,
            });
        }

        let table = self
            .guarded("routing snapshot", self.registry.selector_table(diamond))
            .await?;
        let pending = build_cuts(&desired, &table)?;
        if !pending.is_empty() {
            return Err(DiamondError::VerificationFailure(format!(
                "{} cuts still pending on {:#x} after {:#x}",
                pending.len(),
                diamond,
                tx_hash
            )));
        }

        self.proxy_guard = None;
        info!("Completed diamond cut on {:#x}", diamond);

        Ok(UpgradeState::Verified {
            diamond,
            tx_hash: Some(tx_hash),
        })
    }

    // --- Helpers --- //

    /// Check every facet's selectors before anything is deployed: each
    /// interface must be collision free, and no two facets may claim the
    /// same selector
    async fn preflight(&self) -> Result<(), DiamondError> {
        let mut claims: HashMap<Selector, usize> = HashMap::new();
        for (idx, spec) in self.plan.facets.iter().enumerate() {
            let interface = self
                .guarded("interface lookup", self.registry.interface(&spec.name))
                .await?;

            for selector in spec.selection.select(&interface)? {
                if let Some(first) = claims.insert(selector, idx) {
                    if first != idx {
                        return Err(DiamondError::SelectorCollision {
                            selector,
                            first: self.plan.facets[first].name.clone(),
                            second: spec.name.clone(),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Deploy the cut facet, then a diamond with it installed
    async fn deploy_diamond(
        &mut self,
        owner: Address,
        cut_facet: Option<Address>,
    ) -> Result<Address, DiamondError> {
        let cut_facet = cut_facet.or(self.progress.cut_facet);
        let (address, res) = self.obtain(&self.plan.cut_facet, cut_facet).await;
        self.progress.cut_facet = address;
        let cut_facet = res?;

        let initial_cut = vec![FacetCut {
            facet_address: cut_facet.address,
            action: FacetCutAction::Add,
            selectors: cut_selectors(&cut_facet.interface)?,
        }];
        validate_cut_list(&initial_cut)?;

        let args = DiamondArgs {
            owner,
            init: None,
            init_calldata: Bytes::new(),
        };
        let name = &self.plan.diamond_contract;
        let diamond = self
            .guarded(
                &format!("deployment of {}", name),
                self.registry
                    .deploy(name, diamond_constructor_args(&args, &initial_cut)),
            )
            .await?;
        info!("{} deployed: {:#x}", name, diamond);

        Ok(diamond)
    }

    /// Deploy a contract, or reuse a known address, and attach to it.
    ///
    /// The address is returned whenever the contract exists on chain, even
    /// if attaching to it failed.
    async fn obtain(
        &self,
        name: &str,
        deployed: Option<Address>,
    ) -> (Option<Address>, Result<Facet, DiamondError>) {
        let address = match deployed {
            Some(address) => {
                info!("Reusing {} at {:#x}", name, address);
                address
            }
            None => {
                let res = self
                    .guarded(
                        &format!("deployment of {}", name),
                        self.registry.deploy(name, Bytes::new()),
                    )
                    .await;
                match res {
                    Ok(address) => {
                        info!("{} deployed: {:#x}", name, address);
                        address
                    }
                    Err(e) => return (None, Err(e)),
                }
            }
        };

        (Some(address), self.attach_to(name, address).await)
    }

    /// Attach to a contract on chain
    async fn attach_to(&self, name: &str, address: Address) -> Result<Facet, DiamondError> {
        self.guarded(
            &format!("attaching to {}", name),
            self.registry.attach(name, address),
        )
        .await
        .map_err(|e| match e {
            DiamondError::Registry(reason) => {
                DiamondError::Registry(format!("{} at {:#x}: {}", name, address, reason))
            }
            e => e,
        })
    }

    /// Run an external step under the step timeout, aborting on cancellation
    async fn guarded<T, F>(&self, step: &str, fut: F) -> Result<T, DiamondError>
    where
        F: Future<Output = Result<T, DiamondError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(DiamondError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!("Cancelled during {}", step);
                Err(DiamondError::Cancelled)
            }
            res = tokio::time::timeout(self.config.step_timeout, fut) => match res {
                Ok(res) => res,
                Err(_) => Err(DiamondError::Timeout { step: step.to_string() }),
            },
        }
    }
}
