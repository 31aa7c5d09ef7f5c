//! Definitions of the Solidity interfaces used to deploy and cut a diamond

use alloy_primitives::{Address, Bytes};
use alloy_sol_types::SolValue;

use crate::{
    errors::DiamondError,
    types::{DiamondArgs as DiamondArgsConfig, FacetCut, FacetCutAction},
};

pub use abi::*;

/// ABI definitions for the diamond standard interfaces.
///
/// The cut action is declared as `uint8`, which is how the standard's
/// `FacetCutAction` enum is encoded on the wire.
#[allow(missing_docs, clippy::missing_docs_in_private_items)]
mod abi {
    use alloy_sol_types::sol;

    sol! {
        interface IDiamondCut {
            struct FacetCut {
                address facetAddress;
                uint8 action;
                bytes4[] functionSelectors;
            }

            event DiamondCut(FacetCut[] _diamondCut, address _init, bytes _calldata);

            function diamondCut(FacetCut[] calldata _diamondCut, address _init, bytes calldata _calldata) external;
        }

        interface IDiamondLoupe {
            struct Facet {
                address facetAddress;
                bytes4[] functionSelectors;
            }

            function facets() external view returns (Facet[] memory facets_);
        }

        struct DiamondArgs {
            address init;
            bytes initCalldata;
        }

        function init() external;
    }
}

impl From<&FacetCut> for IDiamondCut::FacetCut {
    fn from(cut: &FacetCut) -> Self {
        IDiamondCut::FacetCut {
            facetAddress: cut.facet_address,
            action: cut.action as u8,
            functionSelectors: cut.selectors.clone(),
        }
    }
}

impl TryFrom<IDiamondCut::FacetCut> for FacetCut {
    type Error = DiamondError;

    fn try_from(cut: IDiamondCut::FacetCut) -> Result<Self, Self::Error> {
        Ok(FacetCut {
            facet_address: cut.facetAddress,
            action: FacetCutAction::try_from(cut.action)?,
            selectors: cut.functionSelectors,
        })
    }
}

/// ABI-encode the diamond constructor arguments:
/// `(address owner, FacetCut[] cut, DiamondArgs args)`
pub fn diamond_constructor_args(args: &DiamondArgsConfig, initial_cut: &[FacetCut]) -> Bytes {
    let cuts: Vec<IDiamondCut::FacetCut> = initial_cut.iter().map(Into::into).collect();
    let wire_args = DiamondArgs {
        init: args.init_address(),
        initCalldata: args.init_calldata.clone(),
    };

    (args.owner, cuts, wire_args).abi_encode_params().into()
}

/// Decode diamond constructor arguments produced by [`diamond_constructor_args`]
pub fn decode_diamond_constructor_args(
    data: &[u8],
) -> Result<(DiamondArgsConfig, Vec<FacetCut>), DiamondError> {
    let (owner, cuts, wire_args) =
        <(Address, Vec<IDiamondCut::FacetCut>, DiamondArgs)>::abi_decode_params(data, true)
            .map_err(|e| DiamondError::InvalidCut(e.to_string()))?;

    let cuts = cuts
        .into_iter()
        .map(FacetCut::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    let args = DiamondArgsConfig {
        owner,
        init: (!wire_args.init.is_zero()).then_some(wire_args.init),
        init_calldata: wire_args.initCalldata,
    };

    Ok((args, cuts))
}
