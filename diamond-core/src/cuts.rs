//! Diffing a desired facet layout against a diamond's routing table.
//!
//! [`build_cuts`] emits at most one cut per `(facet, action)` pair and no cut
//! for selectors that are already routed where they should be, so running it
//! against a table that already reflects the desired state yields no cuts.

use std::collections::{HashMap, HashSet};

use alloy_primitives::{Address, Selector};
use serde::{Deserialize, Serialize};

use crate::{
    constants::REMOVE_FACET_ADDRESS,
    errors::DiamondError,
    types::{FacetCut, FacetCutAction, SelectorTable},
};

/// The selectors a facet should own after an upgrade
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredFacet {
    /// The facet's deployed address
    pub address: Address,
    /// The selectors to route to the facet, in declaration order
    pub selectors: Vec<Selector>,
}

/// The routing a diamond should have after an upgrade, for the facets it
/// mentions
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    /// The facets to route to, in the order cuts are emitted
    pub facets: Vec<DesiredFacet>,
    /// Facets being phased out: any selector still routed to one of these
    /// and not desired elsewhere is removed
    pub retired: Vec<Address>,
}

impl DesiredState {
    /// Create an empty desired state
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a facet and the selectors it should own
    pub fn with_facet(mut self, address: Address, selectors: Vec<Selector>) -> Self {
        self.facets.push(DesiredFacet { address, selectors });
        self
    }

    /// Mark a facet as retired
    pub fn with_retired(mut self, address: Address) -> Self {
        self.retired.push(address);
        self
    }

    /// The facets whose current routes this state fully describes, in order
    fn owned_facets(&self) -> Vec<Address> {
        let mut seen = HashSet::new();
        self.facets
            .iter()
            .map(|f| f.address)
            .chain(self.retired.iter().copied())
            .filter(|addr| seen.insert(*addr))
            .collect()
    }
}

/// The Add and Replace selectors accumulated for one facet
#[derive(Default)]
struct FacetDiff {
    /// Selectors not routed anywhere yet
    add: Vec<Selector>,
    /// Selectors routed to another facet
    replace: Vec<Selector>,
}

/// Compute the minimal cut list that moves `current` to `desired`.
///
/// Fails without producing any cut if the desired state assigns one selector
/// to two facets.
pub fn build_cuts(
    desired: &DesiredState,
    current: &SelectorTable,
) -> Result<Vec<FacetCut>, DiamondError> {
    // Claim every desired selector for exactly one facet
    let mut claims: HashMap<Selector, Address> = HashMap::new();
    let mut facet_order: Vec<Address> = Vec::new();
    let mut diffs: HashMap<Address, FacetDiff> = HashMap::new();

    for facet in &desired.facets {
        if !diffs.contains_key(&facet.address) {
            facet_order.push(facet.address);
        }
        let diff = diffs.entry(facet.address).or_default();

        for selector in &facet.selectors {
            match claims.insert(*selector, facet.address) {
                Some(owner) if owner != facet.address => {
                    return Err(DiamondError::SelectorCollision {
                        selector: *selector,
                        first: format!("{:#x}", owner),
                        second: format!("{:#x}", facet.address),
                    });
                }
                // Repeated under the same facet
                Some(_) => continue,
                None => {}
            }

            match current.facet_of(selector) {
                None => diff.add.push(*selector),
                Some(routed) if routed != facet.address => diff.replace.push(*selector),
                Some(_) => {}
            }
        }
    }

    let removed: Vec<Selector> = desired
        .owned_facets()
        .into_iter()
        .flat_map(|facet| current.selectors_of(facet))
        .filter(|selector| !claims.contains_key(selector))
        .collect();

    let mut cuts = Vec::new();
    for address in facet_order {
        let Some(diff) = diffs.remove(&address) else {
            continue;
        };

        for (action, selectors) in [
            (FacetCutAction::Add, diff.add),
            (FacetCutAction::Replace, diff.replace),
        ] {
            if !selectors.is_empty() {
                cuts.push(FacetCut {
                    facet_address: address,
                    action,
                    selectors,
                });
            }
        }
    }

    if !removed.is_empty() {
        cuts.push(FacetCut {
            facet_address: REMOVE_FACET_ADDRESS,
            action: FacetCutAction::Remove,
            selectors: removed,
        });
    }

    Ok(cuts)
}
