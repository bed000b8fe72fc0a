//! Rights bitmask
//!
//! A [`Right`] is a set of discrete permissions. Resolution combines
//! rights from several sources with bitwise OR; a check succeeds only
//! when every requested bit is present.
//!
//! ```
//! use cretoai_access::Right;
//!
//! let held = Right::VIEW | Right::CHANGE;
//! assert!(held.satisfies(Right::VIEW));
//! assert!(!held.satisfies(Right::VIEW | Right::DELETE));
//! assert_eq!(held.missing(Right::VIEW | Right::DELETE), Right::DELETE);
//! ```

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Discrete permissions held on a policy
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Right: u32 {
        /// Read the protected object
        const VIEW          = 0b0000_0001;
        /// Create objects under it
        const CREATE        = 0b0000_0010;
        /// Modify it
        const CHANGE        = 0b0000_0100;
        /// Remove it
        const DELETE        = 0b0000_1000;
        /// Duplicate it
        const COPY          = 0b0001_0000;
        /// Relocate it
        const MOVE          = 0b0010_0000;
        /// Grant and revoke rights on it
        const MANAGE_ACCESS = 0b0100_0000;
    }
}

impl Right {
    /// No access
    pub const NONE: Self = Self::empty();

    /// Every right
    pub const FULL_ACCESS: Self = Self::VIEW
        .union(Self::CREATE)
        .union(Self::CHANGE)
        .union(Self::DELETE)
        .union(Self::COPY)
        .union(Self::MOVE)
        .union(Self::MANAGE_ACCESS);

    /// Whether every bit of `required` is held
    #[must_use]
    pub fn satisfies(self, required: Self) -> bool {
        self.contains(required)
    }

    /// Bits of `required` that are not held
    #[must_use]
    pub fn missing(self, required: Self) -> Self {
        required.difference(self)
    }

    /// Human-readable names of the held rights
    pub fn names(self) -> Vec<&'static str> {
        if self == Self::FULL_ACCESS {
            return vec!["FULL_ACCESS"];
        }
        self.iter_names().map(|(name, _)| name).collect()
    }
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        f.write_str(&self.names().join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_full_access_covers_all_bits() {
        assert_eq!(Right::FULL_ACCESS, Right::all());
        assert!(Right::FULL_ACCESS.satisfies(Right::MANAGE_ACCESS | Right::DELETE));
    }

    #[test]
    fn test_display() {
        assert_eq!(Right::NONE.to_string(), "NONE");
        assert_eq!((Right::VIEW | Right::CHANGE).to_string(), "VIEW|CHANGE");
        assert_eq!(Right::FULL_ACCESS.to_string(), "FULL_ACCESS");
    }

    #[test]
    fn test_none_satisfies_only_none() {
        assert!(Right::NONE.satisfies(Right::NONE));
        assert!(!Right::NONE.satisfies(Right::VIEW));
    }

    proptest! {
        #[test]
        fn prop_union_satisfies_parts(a in 0u32..128, b in 0u32..128) {
            let a = Right::from_bits_truncate(a);
            let b = Right::from_bits_truncate(b);
            let union = a | b;
            prop_assert!(union.satisfies(a));
            prop_assert!(union.satisfies(b));
        }

        #[test]
        fn prop_missing_is_exact(held in 0u32..128, required in 0u32..128) {
            let held = Right::from_bits_truncate(held);
            let required = Right::from_bits_truncate(required);
            let missing = held.missing(required);
            prop_assert_eq!(missing.is_empty(), held.satisfies(required));
            prop_assert!((held | missing).satisfies(required));
        }
    }
}
