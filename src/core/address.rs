//! Opaque code addresses.
//!
//! A CFG address space is a single flat range of unsigned integers; there is
//! no notion of virtual/physical/relative address here (contrast the richer
//! multi-kind address model used elsewhere in binary analysis tooling).
//! Zero is reserved to mean "no address" and is never a valid Block/Phantom
//! address.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A code address. `Address(0)` means "no address" and is used only for the
/// sentinel nodes (Entry/Exit/Halt), never for a Block or Phantom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub u64);

impl Address {
    pub const NONE: Address = Address(0);

    pub fn new(value: u64) -> Self {
        Address(value)
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn checked_add(&self, offset: u64) -> Option<Address> {
        self.0.checked_add(offset).map(Address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Address(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_hex() {
        assert_eq!(Address(0x400).to_string(), "0x400");
        assert_eq!(Address(0).to_string(), "0x0");
    }

    #[test]
    fn test_none_sentinel() {
        assert!(Address::NONE.is_none());
        assert!(!Address(1).is_none());
    }

    #[test]
    fn test_ordering() {
        assert!(Address(0x100) < Address(0x200));
    }

    #[test]
    fn test_checked_add() {
        assert_eq!(Address(0x400).checked_add(8), Some(Address(0x408)));
        assert_eq!(Address(u64::MAX).checked_add(1), None);
    }
}
