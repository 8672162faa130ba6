// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Namespace negotiation.
//!
//! Maps a proposal's required/optional namespaces and the locally available
//! accounts onto the namespaces a session will be settled with. Pure and
//! deterministic: every list in the output is sorted and deduplicated.
//!
//! Rules:
//! - every required namespace needs at least one local account and at least
//!   one resolvable chain, otherwise the whole negotiation fails
//! - optional namespaces that do not resolve are dropped
//! - `accounts` is the cross product of accepted chains and the local
//!   addresses that support each chain, ordered by chain then address

use std::collections::{BTreeMap, BTreeSet};

use crate::models::{ChainId, ProposalNamespaces, SessionNamespace, SessionNamespaces};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    #[error("required namespace {0} has no local account")]
    UnsupportedNamespace(String),

    #[error("required namespace {0} has no resolvable chain")]
    NoResolvableChains(String),
}

/// Chains a local account can sign for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainSupport {
    /// Every chain of the account's namespace.
    Any,
    /// Only the listed chain ids.
    Only(BTreeSet<String>),
}

/// An address the wallet holds keys for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAccount {
    pub namespace: String,
    pub address: String,
    pub chains: ChainSupport,
}

impl LocalAccount {
    pub fn any_chain(namespace: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            address: address.into(),
            chains: ChainSupport::Any,
        }
    }

    pub fn on_chains<I, S>(namespace: impl Into<String>, address: impl Into<String>, chains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            namespace: namespace.into(),
            address: address.into(),
            chains: ChainSupport::Only(chains.into_iter().map(Into::into).collect()),
        }
    }

    /// Whether this account can sign on `chain`.
    pub fn supports(&self, chain: &ChainId) -> bool {
        if chain.namespace() != self.namespace {
            return false;
        }
        match &self.chains {
            ChainSupport::Any => true,
            ChainSupport::Only(set) => set.contains(&chain.to_string()),
        }
    }
}

/// Requested chains/methods/events for one namespace, merged across keys.
#[derive(Default)]
struct Requested {
    chains: BTreeSet<ChainId>,
    methods: BTreeSet<String>,
    events: BTreeSet<String>,
}

/// Fold proposal namespaces by namespace, accepting CAIP-2 keys like `eip155:10`.
fn collect(into: &mut BTreeMap<String, Requested>, namespaces: &ProposalNamespaces) {
    for (key, requested) in namespaces {
        let (namespace, inline_chain) = match key.parse::<ChainId>() {
            Ok(chain) => (chain.namespace().to_string(), Some(chain)),
            Err(_) => (key.clone(), None),
        };

        let entry = into.entry(namespace.clone()).or_default();
        entry.chains.extend(inline_chain);
        entry.chains.extend(
            requested
                .chains
                .iter()
                .filter_map(|c| c.parse::<ChainId>().ok())
                .filter(|c| c.namespace() == namespace),
        );
        entry.methods.extend(requested.methods.iter().cloned());
        entry.events.extend(requested.events.iter().cloned());
    }
}

fn namespace_keys(namespaces: &ProposalNamespaces) -> BTreeSet<String> {
    namespaces
        .keys()
        .map(|key| match key.parse::<ChainId>() {
            Ok(chain) => chain.namespace().to_string(),
            Err(_) => key.clone(),
        })
        .collect()
}

fn resolve(namespace: &str, requested: &Requested, available: &[LocalAccount]) -> Option<SessionNamespace> {
    let mut chains = Vec::new();
    let mut accounts = Vec::new();

    for chain in &requested.chains {
        let mut addresses: Vec<&str> = available
            .iter()
            .filter(|a| a.supports(chain))
            .map(|a| a.address.as_str())
            .collect();
        if addresses.is_empty() {
            continue;
        }
        addresses.sort_unstable();
        addresses.dedup();
        chains.push(chain.to_string());
        accounts.extend(addresses.into_iter().map(|addr| format!("{chain}:{addr}")));
    }

    if chains.is_empty() {
        tracing::debug!(namespace, "no resolvable chains");
        return None;
    }

    Some(SessionNamespace {
        chains,
        methods: requested.methods.iter().cloned().collect(),
        events: requested.events.iter().cloned().collect(),
        accounts,
    })
}

/// Compute the namespaces a session is settled with.
pub fn negotiate(
    required: &ProposalNamespaces,
    optional: &ProposalNamespaces,
    available: &[LocalAccount],
) -> Result<SessionNamespaces, NegotiationError> {
    let required_keys = namespace_keys(required);

    let mut requested = BTreeMap::new();
    collect(&mut requested, required);
    collect(&mut requested, optional);

    for namespace in &required_keys {
        if !available.iter().any(|a| &a.namespace == namespace) {
            return Err(NegotiationError::UnsupportedNamespace(namespace.clone()));
        }
    }

    let mut accepted = SessionNamespaces::new();
    for (namespace, wanted) in &requested {
        match resolve(namespace, wanted, available) {
            Some(ns) => {
                accepted.insert(namespace.clone(), ns);
            }
            None if required_keys.contains(namespace) => {
                return Err(NegotiationError::NoResolvableChains(namespace.clone()));
            }
            None => {}
        }
    }

    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProposalNamespace;

    fn ns(chains: &[&str], methods: &[&str], events: &[&str]) -> ProposalNamespace {
        ProposalNamespace {
            chains: chains.iter().map(|s| s.to_string()).collect(),
            methods: methods.iter().map(|s| s.to_string()).collect(),
            events: events.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn one(key: &str, namespace: ProposalNamespace) -> ProposalNamespaces {
        let mut map = ProposalNamespaces::new();
        map.insert(key.to_string(), namespace);
        map
    }

    #[test]
    fn single_evm_account_covers_all_requested_chains() {
        let required = one("eip155", ns(&["eip155:1", "eip155:137"], &["personal_sign"], &[]));
        let accounts = [LocalAccount::any_chain("eip155", "0xAAA")];

        let accepted = negotiate(&required, &ProposalNamespaces::new(), &accounts).unwrap();
        let evm = &accepted["eip155"];
        assert_eq!(evm.chains, vec!["eip155:1", "eip155:137"]);
        assert_eq!(evm.methods, vec!["personal_sign"]);
        assert_eq!(evm.accounts, vec!["eip155:1:0xAAA", "eip155:137:0xAAA"]);
    }

    #[test]
    fn required_and_optional_are_merged_and_deduplicated() {
        let required = one("eip155", ns(&["eip155:1"], &["personal_sign", "eth_sendTransaction"], &["chainChanged"]));
        let optional = one("eip155", ns(&["eip155:1", "eip155:10"], &["personal_sign", "eth_signTypedData_v4"], &["accountsChanged"]));
        let accounts = [LocalAccount::any_chain("eip155", "0xAAA")];

        let evm = &negotiate(&required, &optional, &accounts).unwrap()["eip155"];
        assert_eq!(evm.chains, vec!["eip155:1", "eip155:10"]);
        assert_eq!(
            evm.methods,
            vec!["eth_sendTransaction", "eth_signTypedData_v4", "personal_sign"]
        );
        assert_eq!(evm.events, vec!["accountsChanged", "chainChanged"]);
    }

    #[test]
    fn missing_required_namespace_fails() {
        let required = one("solana", ns(&["solana:mainnet-beta"], &["solana_signMessage"], &[]));
        let accounts = [LocalAccount::any_chain("eip155", "0xAAA")];

        assert_eq!(
            negotiate(&required, &ProposalNamespaces::new(), &accounts),
            Err(NegotiationError::UnsupportedNamespace("solana".into()))
        );
    }

    #[test]
    fn required_namespace_without_resolvable_chain_fails_everything() {
        let mut required = one("eip155", ns(&["eip155:1"], &["personal_sign"], &[]));
        required.insert("solana".into(), ns(&["solana:devnet"], &["solana_signMessage"], &[]));
        let accounts = [
            LocalAccount::any_chain("eip155", "0xAAA"),
            LocalAccount::on_chains("solana", "7xKX", ["solana:mainnet-beta"]),
        ];

        assert_eq!(
            negotiate(&required, &ProposalNamespaces::new(), &accounts),
            Err(NegotiationError::NoResolvableChains("solana".into()))
        );
    }

    #[test]
    fn unresolvable_optional_namespace_is_dropped() {
        let required = one("eip155", ns(&["eip155:1"], &["personal_sign"], &[]));
        let optional = one("solana", ns(&["solana:mainnet-beta"], &["solana_signMessage"], &[]));
        let accounts = [LocalAccount::any_chain("eip155", "0xAAA")];

        let accepted = negotiate(&required, &optional, &accounts).unwrap();
        assert!(accepted.contains_key("eip155"));
        assert!(!accepted.contains_key("solana"));
    }

    #[test]
    fn chain_restricted_accounts_limit_cross_product() {
        let required = one("solana", ns(&["solana:mainnet-beta", "solana:devnet"], &["solana_signMessage"], &[]));
        let accounts = [
            LocalAccount::on_chains("solana", "MainKey", ["solana:mainnet-beta"]),
            LocalAccount::any_chain("solana", "AnyKey"),
        ];

        let sol = &negotiate(&required, &ProposalNamespaces::new(), &accounts).unwrap()["solana"];
        assert_eq!(sol.chains, vec!["solana:devnet", "solana:mainnet-beta"]);
        assert_eq!(
            sol.accounts,
            vec![
                "solana:devnet:AnyKey",
                "solana:mainnet-beta:AnyKey",
                "solana:mainnet-beta:MainKey",
            ]
        );
    }

    #[test]
    fn caip2_namespace_key_is_folded_into_its_namespace() {
        let required = one("eip155:10", ns(&[], &["personal_sign"], &[]));
        let accounts = [LocalAccount::any_chain("eip155", "0xAAA")];

        let accepted = negotiate(&required, &ProposalNamespaces::new(), &accounts).unwrap();
        assert_eq!(accepted["eip155"].chains, vec!["eip155:10"]);
        assert_eq!(accepted["eip155"].accounts, vec!["eip155:10:0xAAA"]);
    }

    #[test]
    fn negotiation_is_deterministic() {
        let mut required = one("eip155", ns(&["eip155:137", "eip155:1"], &["personal_sign", "eth_sign"], &[]));
        required.insert("solana".into(), ns(&["solana:mainnet-beta"], &["solana_signMessage"], &[]));
        let optional = one("eip155", ns(&["eip155:42161"], &["eth_sendTransaction"], &["chainChanged"]));
        let accounts = [
            LocalAccount::any_chain("eip155", "0xBBB"),
            LocalAccount::any_chain("eip155", "0xAAA"),
            LocalAccount::any_chain("solana", "7xKX"),
        ];

        let first = negotiate(&required, &optional, &accounts).unwrap();
        let second = negotiate(&required, &optional, &accounts).unwrap();
        assert_eq!(first, second);
        assert_eq!(first["eip155"].accounts[0], "eip155:1:0xAAA");
    }
}
