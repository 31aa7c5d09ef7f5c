//! Loading compiled contracts from Foundry or Hardhat artifact files

use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use alloy::{json_abi::Function, primitives::Bytes};
use diamond_core::types::{FacetInterface, FunctionSignature};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    constants::{ABI_FUNCTION_TYPE, ARTIFACT_EXTENSION, SOLIDITY_SOURCE_EXTENSION},
    errors::ScriptError,
};

/// A compiled contract
#[derive(Clone, Debug)]
pub struct ContractArtifact {
    /// The contract name
    pub name: String,
    /// The contract's functions, in ABI declaration order
    pub interface: FacetInterface,
    /// The creation bytecode
    pub bytecode: Bytes,
}

/// The fields of an artifact file the scripts use
#[derive(Deserialize)]
struct RawArtifact {
    /// The ABI entries, in declaration order
    abi: Vec<Value>,
    /// The creation bytecode
    bytecode: RawBytecode,
}

/// Hardhat stores the bytecode as a string, Foundry nests it in an object
#[derive(Deserialize)]
#[serde(untagged)]
enum RawBytecode {
    /// `"bytecode": "0x..."`
    Hex(String),
    /// `"bytecode": { "object": "0x..." }`
    Object {
        /// The hex-encoded bytecode
        object: String,
    },
}

impl RawBytecode {
    /// The hex-encoded bytecode
    fn hex(&self) -> &str {
        match self {
            RawBytecode::Hex(s) => s,
            RawBytecode::Object { object } => object,
        }
    }
}

/// A directory of compiled contract artifacts
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    /// The artifacts directory
    root: PathBuf,
}

impl ArtifactStore {
    /// Create a store reading from the given directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ArtifactStore { root: root.into() }
    }

    /// Load and parse the artifact for a contract
    pub fn load(&self, name: &str) -> Result<ContractArtifact, ScriptError> {
        let path = self.locate(name)?;
        let contents =
            fs::read_to_string(&path).map_err(|e| ScriptError::ReadArtifact(e.to_string()))?;

        parse_artifact(name, &contents)
    }

    /// Find a contract's artifact, either `<root>/<Name>.json` or Foundry's
    /// `<root>/<Name>.sol/<Name>.json`
    fn locate(&self, name: &str) -> Result<PathBuf, ScriptError> {
        let file_name = Path::new(name).with_extension(ARTIFACT_EXTENSION);
        let candidates = [
            self.root.join(&file_name),
            self.root
                .join(Path::new(name).with_extension(SOLIDITY_SOURCE_EXTENSION))
                .join(&file_name),
        ];

        candidates
            .into_iter()
            .find(|path| path.is_file())
            .ok_or_else(|| {
                ScriptError::ReadArtifact(format!(
                    "no artifact for {} in {}",
                    name,
                    self.root.display()
                ))
            })
    }
}

/// Parse an artifact's ABI and bytecode
pub fn parse_artifact(name: &str, contents: &str) -> Result<ContractArtifact, ScriptError> {
    let raw: RawArtifact =
        serde_json::from_str(contents).map_err(|e| ScriptError::ArtifactParsing(e.to_string()))?;

    // `JsonAbi` groups functions by name, so the entries are walked directly
    // to keep declaration order
    let functions = raw
        .abi
        .into_iter()
        .filter(|entry| entry.get("type").and_then(Value::as_str) == Some(ABI_FUNCTION_TYPE))
        .map(|entry| {
            let function: Function = serde_json::from_value(entry)
                .map_err(|e| ScriptError::ArtifactParsing(e.to_string()))?;
            FunctionSignature::parse(&function.signature())
                .map_err(|e| ScriptError::ArtifactParsing(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let bytecode = Bytes::from_str(raw.bytecode.hex())
        .map_err(|e| ScriptError::ArtifactParsing(e.to_string()))?;
    if bytecode.is_empty() {
        return Err(ScriptError::ArtifactParsing(format!(
            "{} has no creation bytecode",
            name
        )));
    }

    Ok(ContractArtifact {
        name: name.to_string(),
        interface: FacetInterface { functions },
        bytecode,
    })
}
