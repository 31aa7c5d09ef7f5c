//! Scripts for deploying and upgrading a diamond proxy and its facets.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]

pub mod artifacts;
pub mod chain;
pub mod cli;
mod commands;
pub mod constants;
pub mod errors;
pub mod utils;
