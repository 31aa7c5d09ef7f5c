//! Definitions of errors that can occur while planning or executing a diamond upgrade

use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

use alloy_primitives::{Selector, TxHash};

/// Errors that can occur while planning or executing a diamond upgrade
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiamondError {
    /// A function signature is not of the form `name(type,...)`
    InvalidSignature(String),
    /// Two signatures, or two facets, resolve to the same selector
    SelectorCollision {
        /// The contested selector
        selector: Selector,
        /// The first claimant, a signature or a facet address
        first: String,
        /// The second claimant
        second: String,
    },
    /// A projection names a function the interface does not declare
    UnknownFunction(String),
    /// A cut list or upgrade transaction violates the diamond cut rules
    InvalidCut(String),
    /// The registry could not deploy a contract
    DeploymentFailure {
        /// The name of the contract being deployed
        contract: String,
        /// The underlying failure
        reason: String,
    },
    /// The registry could not attach to a contract or read the routing table
    Registry(String),
    /// The upgrade transaction could not be broadcast
    SubmissionFailure(String),
    /// The upgrade transaction was mined but reverted
    UpgradeRevert {
        /// The hash of the reverted transaction
        tx_hash: TxHash,
    },
    /// The routing table after the upgrade does not match the plan
    VerificationFailure(String),
    /// An external step did not complete in time
    Timeout {
        /// The step that timed out
        step: String,
    },
    /// The caller cancelled the upgrade
    Cancelled,
}

impl Display for DiamondError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DiamondError::InvalidSignature(s) => write!(f, "invalid function signature: {}", s),
            DiamondError::SelectorCollision {
                selector,
                first,
                second,
            } => write!(
                f,
                "selector collision: {} claimed by both {} and {}",
                selector, first, second
            ),
            DiamondError::UnknownFunction(s) => write!(f, "unknown function: {}", s),
            DiamondError::InvalidCut(s) => write!(f, "invalid facet cut: {}", s),
            DiamondError::DeploymentFailure { contract, reason } => {
                write!(f, "error deploying {}: {}", contract, reason)
            }
            DiamondError::Registry(s) => write!(f, "error reading registry: {}", s),
            DiamondError::SubmissionFailure(s) => write!(f, "error submitting upgrade: {}", s),
            DiamondError::UpgradeRevert { tx_hash } => {
                write!(f, "diamond upgrade failed: {:#x}", tx_hash)
            }
            DiamondError::VerificationFailure(s) => {
                write!(f, "upgrade verification failed: {}", s)
            }
            DiamondError::Timeout { step } => write!(f, "timed out waiting for {}", step),
            DiamondError::Cancelled => write!(f, "upgrade cancelled"),
        }
    }
}

impl Error for DiamondError {}
