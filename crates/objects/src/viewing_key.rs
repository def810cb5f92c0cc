use std::fmt::{Debug, Formatter};

use crate::{codec::ByteReader, errors::ConversionError};

/// Size of an encrypted viewing key.
pub const VIEWING_KEY_SIZE: usize = 176;

/// Encrypted note data which lets the recipient of a note discover it.
///
/// The sequencer never decrypts viewing keys, it only stores them and forwards them to the chain.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ViewingKey(Box<[u8; VIEWING_KEY_SIZE]>);

impl ViewingKey {
    pub fn new(bytes: [u8; VIEWING_KEY_SIZE]) -> Self {
        Self(Box::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; VIEWING_KEY_SIZE] {
        &self.0
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, ConversionError> {
        let mut reader = ByteReader::new(slice);
        let key = Self::new(reader.read_array()?);
        reader.finish()?;
        Ok(key)
    }

    /// Splits a concatenation of viewing keys.
    pub fn split_all(bytes: &[u8]) -> Result<Vec<Self>, ConversionError> {
        if bytes.len() % VIEWING_KEY_SIZE != 0 {
            let expected = bytes.len().next_multiple_of(VIEWING_KEY_SIZE);
            return Err(ConversionError::InsufficientData { expected, got: bytes.len() });
        }

        bytes.chunks_exact(VIEWING_KEY_SIZE).map(Self::from_slice).collect()
    }

    /// Concatenates viewing keys in iteration order.
    pub fn concat<'a>(keys: impl IntoIterator<Item = &'a ViewingKey>) -> Vec<u8> {
        keys.into_iter().flat_map(|key| key.0.iter().copied()).collect()
    }
}

impl AsRef<[u8]> for ViewingKey {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl Debug for ViewingKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ViewingKey(0x{}..)", hex::encode(&self.0[..8]))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn split_all_requires_whole_keys() {
        let keys = [ViewingKey::new([1; VIEWING_KEY_SIZE]), ViewingKey::new([2; VIEWING_KEY_SIZE])];
        let bytes = ViewingKey::concat(&keys);

        assert_eq!(ViewingKey::split_all(&bytes).unwrap(), keys);
        assert_matches!(
            ViewingKey::split_all(&bytes[1..]),
            Err(ConversionError::InsufficientData { got, .. }) if got == 2 * VIEWING_KEY_SIZE - 1
        );
    }
}
