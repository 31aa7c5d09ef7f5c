//! Utilities for the deploy scripts.

use std::{fs, path::Path, str::FromStr};

use alloy::{
    network::EthereumWallet,
    primitives::Address,
    providers::{DynProvider, Provider, ProviderBuilder},
    signers::local::PrivateKeySigner,
    transports::http::reqwest::Url,
};
use serde_json::{Map, Value};
use tracing::info;

use crate::{chain::Client, constants::DEPLOYMENTS_KEY, errors::ScriptError};

/// Sets up a signing client for the given private key and RPC url, returning
/// it along with the signer's address
pub async fn setup_client(
    priv_key: &str,
    rpc_url: &str,
) -> Result<(Client, Address), ScriptError> {
    let signer = PrivateKeySigner::from_str(priv_key)
        .map_err(|e| ScriptError::ClientInitialization(e.to_string()))?;
    let deployer = signer.address();

    let url = Url::parse(rpc_url).map_err(|e| ScriptError::ClientInitialization(e.to_string()))?;
    let provider = ProviderBuilder::new()
        .wallet(EthereumWallet::from(signer))
        .on_http(url);
    let client = DynProvider::new(provider);

    let chain_id = client
        .get_chain_id()
        .await
        .map_err(|e| ScriptError::ClientInitialization(e.to_string()))?;
    info!("Connected to chain {} as {:#x}", chain_id, deployer);

    Ok((client, deployer))
}

/// Reads the deployments file, treating a missing file as empty
fn read_deployments(file_path: &Path) -> Result<Map<String, Value>, ScriptError> {
    if !file_path.exists() {
        return Ok(Map::new());
    }

    let contents =
        fs::read_to_string(file_path).map_err(|e| ScriptError::ReadDeployments(e.to_string()))?;
    match serde_json::from_str(&contents) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ScriptError::ReadDeployments(
            "deployments file is not a JSON object".to_string(),
        )),
        Err(e) => Err(ScriptError::ReadDeployments(e.to_string())),
    }
}

/// Parses a contract's address from the deployments file
pub fn parse_addr_from_deployments_file(
    file_path: &Path,
    contract_key: &str,
) -> Result<Address, ScriptError> {
    let deployments = read_deployments(file_path)?;

    let addr = deployments
        .get(DEPLOYMENTS_KEY)
        .and_then(|d| d.get(contract_key))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ScriptError::ReadDeployments(format!(
                "no {} address in {}",
                contract_key,
                file_path.display()
            ))
        })?;

    Address::from_str(addr).map_err(|e| ScriptError::ReadDeployments(e.to_string()))
}

/// Writes contract addresses to the deployments file, creating it if needed
/// and keeping any other entries
pub fn write_deployed_addresses<'a>(
    file_path: &Path,
    addresses: impl IntoIterator<Item = (&'a str, Address)>,
) -> Result<(), ScriptError> {
    let mut deployments = read_deployments(file_path)?;

    let entry = deployments
        .entry(DEPLOYMENTS_KEY)
        .or_insert_with(|| Value::Object(Map::new()));
    let contracts = entry.as_object_mut().ok_or_else(|| {
        ScriptError::WriteDeployments(format!("{} is not a JSON object", DEPLOYMENTS_KEY))
    })?;
    for (contract_key, address) in addresses {
        contracts.insert(contract_key.to_string(), Value::String(format!("{address:#x}")));
    }

    let contents = serde_json::to_string_pretty(&Value::Object(deployments))
        .map_err(|e| ScriptError::WriteDeployments(e.to_string()))?;
    fs::write(file_path, contents).map_err(|e| ScriptError::WriteDeployments(e.to_string()))
}
