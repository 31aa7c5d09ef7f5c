//! A deployment registry backed by an Ethereum JSON-RPC node

use std::time::Duration;

use alloy::{
    network::{Ethereum, ReceiptResponse, TransactionBuilder},
    primitives::{Address, Bytes, TxHash},
    providers::{DynProvider, Provider},
    rpc::types::{Filter, TransactionReceipt, TransactionRequest},
};
use alloy_sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use diamond_core::{
    errors::DiamondError,
    registry::DeploymentRegistry,
    solidity::{IDiamondCut, IDiamondLoupe},
    types::{FacetCut, FacetInterface, SelectorTable, UpgradeOutcome, UpgradeTransaction},
};
use tracing::{debug, info, warn};

use crate::{
    artifacts::ArtifactStore,
    constants::{CUT_EVENTS_FROM_BLOCK, RECEIPT_POLL_INTERVAL_MS},
};

/// The provider type used by the scripts
pub type Client = DynProvider<Ethereum>;

/// Deploys artifacts and cuts diamonds through a signing provider
#[derive(Clone)]
pub struct ChainRegistry {
    /// The signing provider
    client: Client,
    /// The compiled contracts available for deployment
    artifacts: ArtifactStore,
    /// The delay between transaction receipt polls
    poll_interval: Duration,
}

impl ChainRegistry {
    /// Create a registry over a signing provider and an artifacts directory
    pub fn new(client: Client, artifacts: ArtifactStore) -> Self {
        ChainRegistry {
            client,
            artifacts,
            poll_interval: Duration::from_millis(RECEIPT_POLL_INTERVAL_MS),
        }
    }

    /// Set the delay between transaction receipt polls
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Poll for a transaction receipt until the transaction is mined.
    ///
    /// Watching the pending transaction directly is unreliable on some nodes,
    /// and the caller bounds the wait with its own timeout.
    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TransactionReceipt, String> {
        loop {
            match self
                .client
                .get_transaction_receipt(tx_hash)
                .await
                .map_err(|e| e.to_string())?
            {
                Some(receipt) => return Ok(receipt),
                None => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    /// Read the routing table through the loupe's `facets()`
    async fn loupe_table(&self, diamond: Address) -> Result<SelectorTable, DiamondError> {
        let tx = TransactionRequest::default()
            .with_to(diamond)
            .with_input(IDiamondLoupe::facetsCall {}.abi_encode());
        let output = self
            .client
            .call(&tx)
            .await
            .map_err(|e| DiamondError::Registry(e.to_string()))?;

        let facets = IDiamondLoupe::facetsCall::abi_decode_returns(&output, true)
            .map_err(|e| DiamondError::Registry(e.to_string()))?
            .facets_;

        SelectorTable::from_facets(
            facets
                .into_iter()
                .map(|facet| (facet.facetAddress, facet.functionSelectors)),
        )
    }

    /// Rebuild the routing table by replaying the diamond's `DiamondCut` events
    async fn replayed_table(&self, diamond: Address) -> Result<SelectorTable, DiamondError> {
        let filter = Filter::new()
            .address(diamond)
            .event_signature(IDiamondCut::DiamondCut::SIGNATURE_HASH)
            .from_block(CUT_EVENTS_FROM_BLOCK);
        let logs = self
            .client
            .get_logs(&filter)
            .await
            .map_err(|e| DiamondError::Registry(e.to_string()))?;

        let mut table = SelectorTable::default();
        for log in logs {
            let event = IDiamondCut::DiamondCut::decode_log_data(&log.inner.data, true)
                .map_err(|e| DiamondError::Registry(e.to_string()))?;
            let cuts = event
                ._diamondCut
                .into_iter()
                .map(FacetCut::try_from)
                .collect::<Result<Vec<_>, _>>()?;

            table.apply(&cuts)?;
        }

        debug!("Replayed {} selector routes from cut events", table.len());
        Ok(table)
    }
}

#[async_trait]
impl DeploymentRegistry for ChainRegistry {
    async fn interface(&self, name: &str) -> Result<FacetInterface, DiamondError> {
        self.artifacts
            .load(name)
            .map(|artifact| artifact.interface)
            .map_err(|e| DiamondError::Registry(e.to_string()))
    }

    async fn deploy(&self, name: &str, constructor_args: Bytes) -> Result<Address, DiamondError> {
        let failure = |reason: String| DiamondError::DeploymentFailure {
            contract: name.to_string(),
            reason,
        };

        let artifact = self.artifacts.load(name).map_err(|e| failure(e.to_string()))?;
        let mut code = artifact.bytecode.to_vec();
        code.extend_from_slice(&constructor_args);

        let tx = TransactionRequest::default().with_deploy_code(code);
        let pending = self
            .client
            .send_transaction(tx)
            .await
            .map_err(|e| failure(e.to_string()))?;
        let tx_hash = *pending.tx_hash();
        debug!("{} deployment sent in {:#x}", name, tx_hash);

        let receipt = self.wait_for_receipt(tx_hash).await.map_err(failure)?;
        if !receipt.status() {
            return Err(failure(format!("deployment reverted in {:#x}", tx_hash)));
        }

        receipt
            .contract_address
            .ok_or_else(|| failure(format!("no contract address in receipt for {:#x}", tx_hash)))
    }

    async fn selector_table(&self, diamond: Address) -> Result<SelectorTable, DiamondError> {
        match self.loupe_table(diamond).await {
            Ok(table) => Ok(table),
            Err(e) => {
                // A diamond that has not had its loupe cut in yet still emits
                // its full cut history
                warn!("Loupe unavailable on {:#x} ({}), replaying cut events", diamond, e);
                self.replayed_table(diamond).await
            }
        }
    }

    async fn submit_upgrade(
        &self,
        diamond: Address,
        upgrade: &UpgradeTransaction,
    ) -> Result<TxHash, DiamondError> {
        let tx = TransactionRequest::default()
            .with_to(diamond)
            .with_input(upgrade.calldata());
        let pending = self
            .client
            .send_transaction(tx)
            .await
            .map_err(|e| DiamondError::SubmissionFailure(e.to_string()))?;

        let tx_hash = *pending.tx_hash();
        info!("Diamond cut sent to {:#x} in {:#x}", diamond, tx_hash);
        Ok(tx_hash)
    }

    async fn confirm(&self, tx_hash: TxHash) -> Result<UpgradeOutcome, DiamondError> {
        let receipt = self
            .wait_for_receipt(tx_hash)
            .await
            .map_err(DiamondError::Registry)?;

        Ok(UpgradeOutcome {
            success: receipt.status(),
            tx_hash,
        })
    }
}
