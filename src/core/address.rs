use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Where funds move from or to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressKind {
    /// An address on a blockchain
    Wallet { chain: String, address: String },
    /// An account on a centralized platform (exchange, lender)
    Platform { platform: String, nickname: String },
    /// Any bank account, fiat on/off ramps
    BankAccount,
    /// A counterparty we know nothing about
    Void { note: String },
}

/// An address together with whether the user owns it.
///
/// Identity is the natural key (`chain-address`, `platform-nickname`, `BankAccount` or
/// `Void - note`); two addresses are the same entity iff their keys match.
#[derive(Debug, Clone)]
pub struct Address {
    kind: AddressKind,
    controlled: bool,
    key: String,
}

impl Address {
    /// Blockchain address, lower-cased.
    pub fn wallet(chain: &str, address: &str, controlled: bool) -> Self {
        Self::wallet_case_sensitive(chain, &address.to_lowercase(), controlled)
    }

    /// Blockchain address kept verbatim, for chains with case-sensitive encodings.
    pub fn wallet_case_sensitive(chain: &str, address: &str, controlled: bool) -> Self {
        Self::with_kind(
            AddressKind::Wallet {
                chain: chain.to_string(),
                address: address.to_string(),
            },
            controlled,
        )
    }

    pub fn platform(platform: &str, nickname: &str, controlled: bool) -> Self {
        Self::with_kind(
            AddressKind::Platform {
                platform: platform.to_string(),
                nickname: nickname.to_string(),
            },
            controlled,
        )
    }

    pub fn bank_account() -> Self {
        Self::with_kind(AddressKind::BankAccount, false)
    }

    pub fn void(note: &str) -> Self {
        Self::with_kind(
            AddressKind::Void {
                note: note.to_string(),
            },
            false,
        )
    }

    fn with_kind(kind: AddressKind, controlled: bool) -> Self {
        let key = match &kind {
            AddressKind::Wallet { chain, address } => format!("{chain}-{address}"),
            AddressKind::Platform { platform, nickname } => format!("{platform}-{nickname}"),
            AddressKind::BankAccount => "BankAccount".to_string(),
            AddressKind::Void { note } => format!("Void - {note}"),
        };
        Address {
            kind,
            controlled,
            key,
        }
    }

    pub fn kind(&self) -> &AddressKind {
        &self.kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_controlled(&self) -> bool {
        self.controlled
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Address", 2)?;
        state.serialize_field("id", &self.key)?;
        state.serialize_field("controlled", &self.controlled)?;
        state.end()
    }
}

/// Owns the single shared instance of every address seen during a run.
#[derive(Debug, Default)]
pub struct AddressRegistry {
    addresses: HashMap<String, Arc<Address>>,
}

impl AddressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the registered instance for the address key, registering it first if needed.
    /// The first registration's `controlled` flag is kept.
    pub fn register(&mut self, address: Address) -> Arc<Address> {
        if let Some(existing) = self.addresses.get(address.key()) {
            if existing.controlled != address.controlled {
                log::warn!(
                    "Address {} registered as controlled={}, ignoring controlled={}",
                    existing.key,
                    existing.controlled,
                    address.controlled
                );
            }
            return Arc::clone(existing);
        }
        let address = Arc::new(address);
        self.addresses
            .insert(address.key.clone(), Arc::clone(&address));
        address
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_keys() {
        assert_eq!(
            Address::wallet("ethereum", "0xABCdef", true).key(),
            "ethereum-0xabcdef"
        );
        assert_eq!(
            Address::wallet_case_sensitive("algorand", "ABCdef", true).key(),
            "algorand-ABCdef"
        );
        assert_eq!(
            Address::platform("kucoin", "main", true).key(),
            "kucoin-main"
        );
        assert_eq!(Address::bank_account().key(), "BankAccount");
        assert_eq!(Address::void("Miner").key(), "Void - Miner");
    }

    #[test]
    fn bank_and_void_are_never_controlled() {
        assert!(!Address::bank_account().is_controlled());
        assert!(!Address::void("Other BTC address").is_controlled());
    }

    #[test]
    fn registry_returns_same_instance_for_same_key() {
        let mut registry = AddressRegistry::new();
        let a = registry.register(Address::wallet("ethereum", "0xAA", true));
        let b = registry.register(Address::wallet("ethereum", "0xaa", true));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_keeps_first_controlled_flag() {
        let mut registry = AddressRegistry::new();
        let first = registry.register(Address::platform("coinbase", "me", true));
        let second = registry.register(Address::platform("coinbase", "me", false));
        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.is_controlled());
    }
}
