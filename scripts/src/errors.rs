//! Definitions of errors that can occur during the execution of the deploy scripts

use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

use diamond_core::orchestrator::FailureReport;

/// Errors that can occur during the execution of the deploy scripts
#[derive(Debug)]
pub enum ScriptError {
    /// Error reading the deployments file
    ReadDeployments(String),
    /// Error writing the deployments file
    WriteDeployments(String),
    /// Error reading a compilation artifact from disk
    ReadArtifact(String),
    /// Error parsing a compilation artifact
    ArtifactParsing(String),
    /// Error initializing the RPC client
    ClientInitialization(String),
    /// A command line argument could not be interpreted
    InvalidArgument(String),
    /// The diamond deployment or upgrade failed
    Upgrade(Box<FailureReport>),
}

impl Display for ScriptError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::ReadDeployments(s) => write!(f, "error reading deployments: {}", s),
            ScriptError::WriteDeployments(s) => write!(f, "error writing deployments: {}", s),
            ScriptError::ReadArtifact(s) => write!(f, "error reading artifact: {}", s),
            ScriptError::ArtifactParsing(s) => write!(f, "error parsing artifact: {}", s),
            ScriptError::ClientInitialization(s) => write!(f, "error initializing client: {}", s),
            ScriptError::InvalidArgument(s) => write!(f, "invalid argument: {}", s),
            ScriptError::Upgrade(report) => write!(f, "{}", report),
        }
    }
}

impl Error for ScriptError {}

impl From<FailureReport> for ScriptError {
    fn from(report: FailureReport) -> Self {
        ScriptError::Upgrade(Box::new(report))
    }
}
