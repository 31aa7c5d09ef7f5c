//! Type definitions used throughout the diamond deployment logic

use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    str::FromStr,
};

use alloy_primitives::{keccak256, Address, Bytes, Selector, TxHash};
use alloy_sol_types::SolCall;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{NO_INIT_ADDRESS, REMOVE_FACET_ADDRESS, SELECTOR_LENGTH},
    errors::DiamondError,
    solidity::IDiamondCut,
};

// -------------
// | Functions |
// -------------

/// A canonical function signature, e.g. `transferOwnership(address)`
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FunctionSignature(String);

impl FunctionSignature {
    /// Parse a signature, stripping whitespace and validating its shape
    pub fn parse(signature: &str) -> Result<Self, DiamondError> {
        let canonical: String = signature.chars().filter(|c| !c.is_whitespace()).collect();

        let open = canonical
            .find('(')
            .ok_or_else(|| DiamondError::InvalidSignature(signature.to_string()))?;
        let name = &canonical[..open];
        let valid_name = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');

        if !valid_name || !canonical.ends_with(')') || !parens_balanced(&canonical[open..]) {
            return Err(DiamondError::InvalidSignature(signature.to_string()));
        }

        Ok(FunctionSignature(canonical))
    }

    /// The function name, without its parameter list
    pub fn name(&self) -> &str {
        // `parse` guarantees an opening parenthesis
        self.0.split('(').next().unwrap_or_default()
    }

    /// The full canonical signature
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The selector routing calls to this function
    pub fn selector(&self) -> Selector {
        Selector::from_slice(&keccak256(self.0.as_bytes())[..SELECTOR_LENGTH])
    }
}

/// Whether the parentheses in a parameter list are balanced
fn parens_balanced(params: &str) -> bool {
    let mut depth: usize = 0;
    for c in params.chars() {
        match c {
            '(' => depth += 1,
            ')' => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            _ => {}
        }
    }

    depth == 0
}

impl Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FunctionSignature {
    type Err = DiamondError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FunctionSignature::parse(s)
    }
}

impl TryFrom<String> for FunctionSignature {
    type Error = DiamondError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        FunctionSignature::parse(&s)
    }
}

impl From<FunctionSignature> for String {
    fn from(sig: FunctionSignature) -> Self {
        sig.0
    }
}

/// The functions exposed by a contract, in declaration order
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetInterface {
    /// The declared functions
    pub functions: Vec<FunctionSignature>,
}

impl FacetInterface {
    /// Build an interface from a list of signatures
    pub fn parse<S: AsRef<str>>(signatures: &[S]) -> Result<Self, DiamondError> {
        let functions = signatures
            .iter()
            .map(|s| FunctionSignature::parse(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FacetInterface { functions })
    }
}

/// A deployed facet contract
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facet {
    /// The contract name
    pub name: String,
    /// The deployed address
    pub address: Address,
    /// The contract's interface
    pub interface: FacetInterface,
}

// --------
// | Cuts |
// --------

/// The action a facet cut performs on its selectors
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FacetCutAction {
    /// Route currently unrouted selectors to a facet
    Add = 0,
    /// Reroute selectors from their current facet to another
    Replace = 1,
    /// Unroute selectors
    Remove = 2,
}

impl TryFrom<u8> for FacetCutAction {
    type Error = DiamondError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FacetCutAction::Add),
            1 => Ok(FacetCutAction::Replace),
            2 => Ok(FacetCutAction::Remove),
            _ => Err(DiamondError::InvalidCut(format!(
                "unknown cut action {}",
                value
            ))),
        }
    }
}

impl Display for FacetCutAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FacetCutAction::Add => write!(f, "add"),
            FacetCutAction::Replace => write!(f, "replace"),
            FacetCutAction::Remove => write!(f, "remove"),
        }
    }
}

/// A batched instruction applying one action to a set of selectors
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetCut {
    /// The facet the selectors are routed to, zero for `Remove`
    pub facet_address: Address,
    /// The action to apply
    pub action: FacetCutAction,
    /// The selectors the action applies to
    pub selectors: Vec<Selector>,
}

impl FacetCut {
    /// Check the cut against the diamond's cut rules, independent of any
    /// routing state
    pub fn validate(&self) -> Result<(), DiamondError> {
        if self.selectors.is_empty() {
            return Err(DiamondError::InvalidCut(format!(
                "no selectors in {} cut for {:#x}",
                self.action, self.facet_address
            )));
        }

        if let Some(dup) = self.selectors.iter().duplicates().next() {
            return Err(DiamondError::InvalidCut(format!(
                "selector {} repeated in {} cut",
                dup, self.action
            )));
        }

        match self.action {
            FacetCutAction::Remove if self.facet_address != REMOVE_FACET_ADDRESS => {
                Err(DiamondError::InvalidCut(format!(
                    "remove cut must target the zero address, got {:#x}",
                    self.facet_address
                )))
            }
            FacetCutAction::Add | FacetCutAction::Replace if self.facet_address.is_zero() => {
                Err(DiamondError::InvalidCut(format!(
                    "{} cut cannot target the zero address",
                    self.action
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Check that no selector appears in more than one cut of a list
pub fn validate_cut_list(cuts: &[FacetCut]) -> Result<(), DiamondError> {
    for cut in cuts {
        cut.validate()?;
    }

    match cuts.iter().flat_map(|c| c.selectors.iter()).duplicates().next() {
        Some(dup) => Err(DiamondError::InvalidCut(format!(
            "selector {} appears in more than one cut",
            dup
        ))),
        None => Ok(()),
    }
}

// ------------------
// | Selector Table |
// ------------------

/// A snapshot of a diamond's routing: selector to owning facet address
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorTable {
    /// The routes, at most one facet per selector
    routes: BTreeMap<Selector, Address>,
}

impl SelectorTable {
    /// Build a table from a list of facets and the selectors routed to each,
    /// as returned by the loupe's `facets()`
    pub fn from_facets<I, S>(facets: I) -> Result<Self, DiamondError>
    where
        I: IntoIterator<Item = (Address, S)>,
        S: IntoIterator<Item = Selector>,
    {
        let mut routes = BTreeMap::new();
        for (facet, selectors) in facets {
            for selector in selectors {
                if let Some(existing) = routes.insert(selector, facet) {
                    if existing != facet {
                        return Err(DiamondError::SelectorCollision {
                            selector,
                            first: format!("{:#x}", existing),
                            second: format!("{:#x}", facet),
                        });
                    }
                }
            }
        }

        Ok(SelectorTable { routes })
    }

    /// The facet a selector is routed to, if any
    pub fn facet_of(&self, selector: &Selector) -> Option<Address> {
        self.routes.get(selector).copied()
    }

    /// The selectors routed to a facet, in ascending order
    pub fn selectors_of(&self, facet: Address) -> Vec<Selector> {
        self.routes
            .iter()
            .filter(|(_, f)| **f == facet)
            .map(|(s, _)| *s)
            .collect()
    }

    /// The distinct facet addresses with at least one route, in ascending order
    pub fn facet_addresses(&self) -> Vec<Address> {
        self.routes.values().copied().sorted().dedup().collect()
    }

    /// Iterate over all routes in ascending selector order
    pub fn iter(&self) -> impl Iterator<Item = (&Selector, &Address)> {
        self.routes.iter()
    }

    /// The number of routed selectors
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no selector is routed
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Apply a cut list the way the diamond does.
    ///
    /// Either every cut applies or the table is left untouched.
    pub fn apply(&mut self, cuts: &[FacetCut]) -> Result<(), DiamondError> {
        let mut next = self.routes.clone();
        for cut in cuts {
            cut.validate()?;
            for selector in &cut.selectors {
                let current = next.get(selector).copied();
                match (cut.action, current) {
                    (FacetCutAction::Add, None) => {
                        next.insert(*selector, cut.facet_address);
                    }
                    (FacetCutAction::Add, Some(_)) => {
                        return Err(DiamondError::InvalidCut(format!(
                            "can't add function {} that already exists",
                            selector
                        )));
                    }
                    (FacetCutAction::Replace, Some(old)) if old == cut.facet_address => {
                        return Err(DiamondError::InvalidCut(format!(
                            "can't replace function {} with the same facet",
                            selector
                        )));
                    }
                    (FacetCutAction::Replace, Some(_)) => {
                        next.insert(*selector, cut.facet_address);
                    }
                    (FacetCutAction::Remove, Some(_)) => {
                        next.remove(selector);
                    }
                    (FacetCutAction::Replace | FacetCutAction::Remove, None) => {
                        return Err(DiamondError::InvalidCut(format!(
                            "can't {} function {} that doesn't exist",
                            cut.action, selector
                        )));
                    }
                }
            }
        }

        self.routes = next;
        Ok(())
    }
}

// -----------
// | Upgrade |
// -----------

/// The arguments the diamond is constructed with
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiamondArgs {
    /// The diamond owner
    pub owner: Address,
    /// The contract to delegatecall once during construction, if any
    pub init: Option<Address>,
    /// The calldata for the initializer call
    pub init_calldata: Bytes,
}

impl DiamondArgs {
    /// The initializer address as encoded on the wire
    pub fn init_address(&self) -> Address {
        self.init.unwrap_or(NO_INIT_ADDRESS)
    }
}

/// A single `diamondCut` call: the full cut list plus an optional initializer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpgradeTransaction {
    /// The cuts to apply atomically
    pub cuts: Vec<FacetCut>,
    /// The contract to delegatecall after the cuts, if any
    pub init: Option<Address>,
    /// The calldata for the initializer call
    pub init_calldata: Bytes,
}

impl UpgradeTransaction {
    /// Build and validate an upgrade transaction
    pub fn new(
        cuts: Vec<FacetCut>,
        init: Option<Address>,
        init_calldata: Bytes,
    ) -> Result<Self, DiamondError> {
        validate_cut_list(&cuts)?;
        if init.is_none() && !init_calldata.is_empty() {
            return Err(DiamondError::InvalidCut(
                "initializer calldata given without an initializer address".to_string(),
            ));
        }
        if init.is_some_and(|addr| addr.is_zero()) {
            return Err(DiamondError::InvalidCut(
                "initializer address cannot be zero".to_string(),
            ));
        }

        Ok(UpgradeTransaction {
            cuts,
            init,
            init_calldata,
        })
    }

    /// Whether submitting this transaction would change nothing
    pub fn is_noop(&self) -> bool {
        self.cuts.is_empty() && self.init.is_none()
    }

    /// The initializer address as encoded on the wire
    pub fn init_address(&self) -> Address {
        self.init.unwrap_or(NO_INIT_ADDRESS)
    }

    /// The `diamondCut` calldata for this transaction
    pub fn calldata(&self) -> Bytes {
        IDiamondCut::diamondCutCall {
            _diamondCut: self.cuts.iter().map(Into::into).collect(),
            _init: self.init_address(),
            _calldata: self.init_calldata.clone(),
        }
        .abi_encode()
        .into()
    }
}

/// The confirmed result of an upgrade transaction
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UpgradeOutcome {
    /// Whether the transaction succeeded
    pub success: bool,
    /// The transaction hash
    pub tx_hash: TxHash,
}
