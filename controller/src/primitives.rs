//! # Ledger Primitives
//!
//! Fixed-width byte values that cross the boundary between the controller and
//! its external collaborators: account/contract addresses, ciphertext handles,
//! and transaction hashes. All of them render as `0x`-prefixed lowercase hex
//! and parse from the same form (the prefix is optional on input).
//!
//! None of these types carry semantics beyond equality. A [`Handle`] in
//! particular is a reference to a ciphertext held by the ledger, never the
//! ciphertext itself.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Numeric network identifier (EVM chain id).
pub type NetworkId = u64;

// ---------------------------------------------------------------------------
// Parse errors
// ---------------------------------------------------------------------------

/// Errors produced when parsing a hex-encoded primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexParseError {
    /// The decoded value has the wrong number of bytes.
    #[error("expected {expected} bytes, got {got}")]
    InvalidLength {
        /// Byte length the type requires.
        expected: usize,
        /// Byte length that was supplied.
        got: usize,
    },

    /// The input contains characters that are not hex digits.
    #[error("invalid hex: {0}")]
    InvalidHex(String),
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], HexParseError> {
    let body = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);

    if body.len() != N * 2 {
        return Err(HexParseError::InvalidLength {
            expected: N,
            got: body.len() / 2,
        });
    }

    let mut out = [0u8; N];
    hex::decode_to_slice(body, &mut out).map_err(|e| HexParseError::InvalidHex(e.to_string()))?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Fixed-width hex newtypes
// ---------------------------------------------------------------------------

macro_rules! hex_newtype {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name([u8; $len]);

        impl $name {
            /// Byte width of this value.
            pub const LEN: usize = $len;

            /// Wraps raw bytes.
            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Borrows the raw bytes.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// `true` when every byte is zero.
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }

            /// Lowercase `0x`-prefixed hex rendering.
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = HexParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                decode_fixed::<$len>(s.trim()).map(Self)
            }
        }

        impl TryFrom<String> for $name {
            type Error = HexParseError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl From<$name> for String {
            fn from(v: $name) -> String {
                v.to_hex()
            }
        }
    };
}

hex_newtype!(
    /// A 20-byte account or contract address.
    Address,
    20
);

hex_newtype!(
    /// An opaque 32-byte reference to a ciphertext stored by the ledger.
    Handle,
    32
);

hex_newtype!(
    /// A 32-byte transaction hash.
    TxHash,
    32
);

impl Address {
    /// The canonical null address. A deployment at this address is treated
    /// as "not deployed".
    pub const ZERO: Address = Address([0u8; 20]);
}

impl Handle {
    /// The canonical empty handle: the ledger returns it for accounts that
    /// have never held an encrypted value.
    pub const EMPTY: Handle = Handle([0u8; 32]);

    /// `true` for the canonical empty handle.
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

// ---------------------------------------------------------------------------
// Identity fingerprint
// ---------------------------------------------------------------------------

/// Identifies one installation of a signer in the live session.
///
/// A fresh fingerprint is minted every time a signer is installed, so
/// reconnecting the same account still counts as an identity change for any
/// operation that started before the reconnect.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityFingerprint(Uuid);

impl IdentityFingerprint {
    /// Mints a new random fingerprint.
    pub fn mint() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Debug for IdentityFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityFingerprint({})", self.0)
    }
}

impl fmt::Display for IdentityFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parses_with_and_without_prefix() {
        let with = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
            .parse::<Address>()
            .unwrap();
        let without = "5fbdb2315678afecb367f032d93f642f64180aa3"
            .parse::<Address>()
            .unwrap();
        assert_eq!(with, without);
        assert_eq!(with.to_hex(), "0x5fbdb2315678afecb367f032d93f642f64180aa3");
    }

    #[test]
    fn address_rejects_wrong_length() {
        let err = "0x1234".parse::<Address>().unwrap_err();
        assert_eq!(err, HexParseError::InvalidLength { expected: 20, got: 2 });
    }

    #[test]
    fn address_rejects_non_hex() {
        let bad = format!("0x{}", "zz".repeat(20));
        assert!(matches!(
            bad.parse::<Address>(),
            Err(HexParseError::InvalidHex(_))
        ));
    }

    #[test]
    fn empty_handle_is_all_zero() {
        assert!(Handle::EMPTY.is_empty());
        assert!(Handle::EMPTY.is_zero());
        assert!(!Handle::from_bytes([1u8; 32]).is_empty());
    }

    #[test]
    fn serde_uses_hex_strings() {
        let addr = Address::from_bytes([0xab; 20]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "ab".repeat(20)));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn fingerprints_are_unique_per_mint() {
        assert_ne!(IdentityFingerprint::mint(), IdentityFingerprint::mint());
    }
}
