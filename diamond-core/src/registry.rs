//! The chain client the orchestrator drives

use alloy_primitives::{Address, Bytes, TxHash};
use async_trait::async_trait;

use crate::{
    errors::DiamondError,
    types::{Facet, FacetInterface, SelectorTable, UpgradeOutcome, UpgradeTransaction},
};

/// Deploys contracts and applies upgrades on a chain.
///
/// Every method blocks until its effect is confirmed or has failed; the
/// orchestrator bounds each call with its own timeout and cancellation.
#[async_trait]
pub trait DeploymentRegistry: Send + Sync {
    /// The interface of a named contract, in declaration order
    async fn interface(&self, name: &str) -> Result<FacetInterface, DiamondError>;

    /// Deploy the named contract with ABI-encoded constructor arguments and
    /// return its address once the deployment is confirmed
    async fn deploy(&self, name: &str, constructor_args: Bytes) -> Result<Address, DiamondError>;

    /// Bind the named contract's interface to a deployed address
    async fn attach(&self, name: &str, address: Address) -> Result<Facet, DiamondError> {
        Ok(Facet {
            name: name.to_string(),
            address,
            interface: self.interface(name).await?,
        })
    }

    /// Read a fresh snapshot of the diamond's selector routing
    async fn selector_table(&self, diamond: Address) -> Result<SelectorTable, DiamondError>;

    /// Broadcast the `diamondCut` call for an upgrade
    async fn submit_upgrade(
        &self,
        diamond: Address,
        upgrade: &UpgradeTransaction,
    ) -> Result<TxHash, DiamondError>;

    /// Wait for a submitted upgrade to be mined and report its status
    async fn confirm(&self, tx_hash: TxHash) -> Result<UpgradeOutcome, DiamondError>;
}
