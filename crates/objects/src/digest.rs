use std::fmt::{Debug, Display, Formatter};

use hex::FromHex;
use sha3::{Digest, Keccak256};

use crate::errors::ConversionError;

// CONSTANTS
// ================================================================================================

pub const DIGEST_SIZE: usize = 32;
pub const ADDRESS_SIZE: usize = 20;

/// Keccak-256 of the provided bytes.
pub fn keccak256(data: impl AsRef<[u8]>) -> [u8; DIGEST_SIZE] {
    Keccak256::digest(data.as_ref()).into()
}

// FIXED SIZE BYTE STRINGS
// ================================================================================================

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $size:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name([u8; $size]);

        impl $name {
            pub const SIZE: usize = $size;

            pub const fn new(bytes: [u8; $size]) -> Self {
                Self(bytes)
            }

            pub const fn as_bytes(&self) -> &[u8; $size] {
                &self.0
            }

            pub fn from_slice(slice: &[u8]) -> Result<Self, ConversionError> {
                match slice.len() {
                    len if len < $size => {
                        Err(ConversionError::InsufficientData { expected: $size, got: len })
                    },
                    len if len > $size => {
                        Err(ConversionError::TooMuchData { expected: $size, got: len })
                    },
                    _ => {
                        let mut bytes = [0u8; $size];
                        bytes.copy_from_slice(slice);
                        Ok(Self(bytes))
                    },
                }
            }

            /// Returns a `0x` prefixed hex representation.
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }

            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|byte| *byte == 0)
            }
        }

        impl From<[u8; $size]> for $name {
            fn from(bytes: [u8; $size]) -> Self {
                Self(bytes)
            }
        }

        impl From<$name> for [u8; $size] {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                Display::fmt(self, f)
            }
        }

        impl FromHex for $name {
            type Error = ConversionError;

            fn from_hex<T: AsRef<[u8]>>(hex: T) -> Result<Self, Self::Error> {
                let hex = hex.as_ref();
                let hex = hex.strip_prefix(b"0x").unwrap_or(hex);
                Self::from_slice(&hex::decode(hex)?)
            }
        }
    };
}

fixed_bytes!(
    /// Keccak-256 of a batch's public inputs, the identity of a batch across nodes.
    BatchHash,
    DIGEST_SIZE
);
fixed_bytes!(
    /// Keccak-256 of an encoded inner transaction.
    TransactionId,
    DIGEST_SIZE
);
fixed_bytes!(Nullifier, DIGEST_SIZE);
fixed_bytes!(NoteCommitment, DIGEST_SIZE);
fixed_bytes!(
    /// Root of one of the world-state trees.
    Root,
    DIGEST_SIZE
);
fixed_bytes!(
    /// Hash of a transaction on the base chain.
    ChainTxHash,
    DIGEST_SIZE
);
fixed_bytes!(
    /// Base chain account address.
    Address,
    ADDRESS_SIZE
);

impl Address {
    /// Derives the address from an uncompressed secp256k1 public key without its `0x04` tag.
    pub fn from_public_key(uncompressed: &[u8; 64]) -> Self {
        let hash = keccak256(uncompressed);
        let mut address = [0u8; ADDRESS_SIZE];
        address.copy_from_slice(&hash[DIGEST_SIZE - ADDRESS_SIZE..]);
        Self(address)
    }
}
