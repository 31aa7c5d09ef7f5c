//! Derivation of the selectors a facet exposes.
//!
//! Selector sets are always returned in declaration order, never sorted, so
//! that cut lists built from them are reproducible.

use std::collections::HashMap;

use alloy_primitives::Selector;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    constants::FACET_INIT_SIGNATURE,
    errors::DiamondError,
    types::{FacetInterface, FunctionSignature},
};

/// Which of a facet's functions to route through the diamond
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FacetSelection {
    /// Every function except a facet-local `init(bytes)`
    #[default]
    All,
    /// Only the named functions
    Only(Vec<String>),
    /// Every function except the named ones
    Except(Vec<String>),
}

impl FacetSelection {
    /// The selectors this selection picks out of an interface
    pub fn select(&self, interface: &FacetInterface) -> Result<Vec<Selector>, DiamondError> {
        match self {
            FacetSelection::All => cut_selectors(interface),
            FacetSelection::Only(names) => project(interface, names),
            FacetSelection::Except(names) => exclude(interface, names),
        }
    }
}

/// The selector of a single signature
pub fn selector_of(signature: &str) -> Result<Selector, DiamondError> {
    FunctionSignature::parse(signature).map(|sig| sig.selector())
}

/// All selectors of an interface, in declaration order.
///
/// Fails if two distinct signatures share a selector. Repeated identical
/// signatures yield one selector.
pub fn selectors_of(interface: &FacetInterface) -> Result<Vec<Selector>, DiamondError> {
    Ok(unique_functions(interface)?
        .into_iter()
        .map(|(_, selector)| selector)
        .collect())
}

/// The selectors of the named functions, in declaration order.
///
/// A name is either a bare function name, matching every overload, or a full
/// signature. Every name must match at least one function.
pub fn project<S: AsRef<str>>(
    interface: &FacetInterface,
    names: &[S],
) -> Result<Vec<Selector>, DiamondError> {
    let functions = unique_functions(interface)?;

    if let Some(missing) = names
        .iter()
        .map(AsRef::as_ref)
        .find(|name| !functions.iter().any(|(sig, _)| matches_name(sig, name)))
    {
        return Err(DiamondError::UnknownFunction(missing.to_string()));
    }

    Ok(functions
        .into_iter()
        .filter(|(sig, _)| names.iter().any(|n| matches_name(sig, n.as_ref())))
        .map(|(_, selector)| selector)
        .collect())
}

/// The selectors of every function not named, in declaration order.
///
/// Names that match nothing are ignored.
pub fn exclude<S: AsRef<str>>(
    interface: &FacetInterface,
    names: &[S],
) -> Result<Vec<Selector>, DiamondError> {
    Ok(unique_functions(interface)?
        .into_iter()
        .filter(|(sig, _)| !names.iter().any(|n| matches_name(sig, n.as_ref())))
        .map(|(_, selector)| selector)
        .collect())
}

/// The selectors a facet contributes to a cut: everything except its
/// `init(bytes)` initializer
pub fn cut_selectors(interface: &FacetInterface) -> Result<Vec<Selector>, DiamondError> {
    exclude(interface, &[FACET_INIT_SIGNATURE])
}

/// Deduplicate an interface's signatures and check for selector collisions
/// between distinct signatures
fn unique_functions(
    interface: &FacetInterface,
) -> Result<Vec<(&FunctionSignature, Selector)>, DiamondError> {
    let mut seen: HashMap<Selector, &FunctionSignature> = HashMap::new();
    let mut functions = Vec::with_capacity(interface.functions.len());

    for sig in interface.functions.iter().unique() {
        let selector = sig.selector();
        if let Some(first) = seen.insert(selector, sig) {
            return Err(DiamondError::SelectorCollision {
                selector,
                first: first.to_string(),
                second: sig.to_string(),
            });
        }
        functions.push((sig, selector));
    }

    Ok(functions)
}

/// Whether a signature is referred to by a name, either bare or in full
fn matches_name(sig: &FunctionSignature, name: &str) -> bool {
    let name = name.trim();
    if name.contains('(') {
        FunctionSignature::parse(name).is_ok_and(|n| n == *sig)
    } else {
        sig.name() == name
    }
}
