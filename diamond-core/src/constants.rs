//! Constants used throughout the diamond deployment logic

use std::time::Duration;

use alloy_primitives::Address;

/// The number of bytes in a function selector
pub const SELECTOR_LENGTH: usize = 4;

/// The facet address used in `Remove` cuts.
///
/// The diamond rejects a `Remove` cut targeting any other address.
pub const REMOVE_FACET_ADDRESS: Address = Address::ZERO;

/// The initializer address meaning "no initializer call"
pub const NO_INIT_ADDRESS: Address = Address::ZERO;

/// The signature of a facet-local initializer.
///
/// Facets may expose this to be called once through `diamondCut`, it is never
/// routed through the diamond itself.
pub const FACET_INIT_SIGNATURE: &str = "init(bytes)";

/// The name of the facet implementing `diamondCut`
pub const DIAMOND_CUT_FACET_NAME: &str = "DiamondCutFacet";

/// The name of the diamond proxy contract
pub const DIAMOND_CONTRACT_NAME: &str = "Diamond";

/// The name of the default initializer contract
pub const DIAMOND_INIT_CONTRACT_NAME: &str = "DiamondInit";

/// The facets installed by a default deployment
pub const DEFAULT_FACET_NAMES: [&str; 2] = ["DiamondLoupeFacet", "OwnershipFacet"];

/// The default time allowed for any single external step
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(120);
