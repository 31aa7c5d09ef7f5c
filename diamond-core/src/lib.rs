//! Core logic for composing and upgrading diamond proxies: selector derivation,
//! facet cut diffing, and the upgrade orchestrator that drives a deployment
//! through a [`registry::DeploymentRegistry`].

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]

pub mod constants;
pub mod cuts;
pub mod errors;
pub mod orchestrator;
pub mod registry;
pub mod selectors;
pub mod solidity;
pub mod types;
