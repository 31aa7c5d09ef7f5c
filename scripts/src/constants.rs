//! Constants used in the deploy scripts

/// The default RPC URL, a local Anvil or Hardhat node
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

/// The default directory containing compiled contract artifacts
pub const DEFAULT_ARTIFACTS_DIR: &str = "out";

/// The default number of seconds allowed for a single deployment step
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 120;

/// The extension of a compilation artifact
pub const ARTIFACT_EXTENSION: &str = "json";

/// The extension of the per-source directories Foundry writes artifacts into
pub const SOLIDITY_SOURCE_EXTENSION: &str = "sol";

/// The ABI entry type of a function
pub const ABI_FUNCTION_TYPE: &str = "function";

/// The number of milliseconds to wait between receipt polls
pub const RECEIPT_POLL_INTERVAL_MS: u64 = 250;

/// The block from which `DiamondCut` events are replayed
pub const CUT_EVENTS_FROM_BLOCK: u64 = 0;

/// The diamond proxy key in the deployments file
pub const DIAMOND_DEPLOYMENT_KEY: &str = "Diamond";

/// The separator between a contract name and its address in `--reuse`
pub const REUSE_SEPARATOR: char = '=';

/// The top-level key of the deployments file
pub const DEPLOYMENTS_KEY: &str = "deployments";
