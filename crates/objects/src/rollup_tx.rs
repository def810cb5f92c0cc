use crate::{
    codec::{write_prefixed, ByteReader},
    digest::{Address, ADDRESS_SIZE, DIGEST_SIZE},
    errors::ConversionError,
    viewing_key::{ViewingKey, VIEWING_KEY_SIZE},
};

/// Size of a recoverable secp256k1 signature, `r || s || v`.
pub const SIGNATURE_SIZE: usize = 65;

/// Encodes a value as a 32 byte big-endian integer, the width the chain uses for amounts.
pub fn encode_u256(value: u64) -> [u8; DIGEST_SIZE] {
    let mut out = [0u8; DIGEST_SIZE];
    out[DIGEST_SIZE - 8..].copy_from_slice(&value.to_be_bytes());
    out
}

fn decode_u256(bytes: &[u8; DIGEST_SIZE], field: &'static str) -> Result<u64, ConversionError> {
    let (high, low) = bytes.split_at(DIGEST_SIZE - 8);
    if high.iter().any(|byte| *byte != 0) {
        return Err(ConversionError::ValueOutOfRange { field });
    }
    let mut value = [0u8; 8];
    value.copy_from_slice(low);
    Ok(u64::from_be_bytes(value))
}

/// The payload of the chain transaction which publishes a batch.
///
/// Encoding (all integers big-endian):
///
/// ```text
/// proof_len u32 | proof | key_count u32 | viewing keys | sig_count u32 | (sig_len u32 | sig)*
/// | provider signature [65] | provider [20] | fee receiver [20] | fee limit [32]
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RollupTransaction {
    pub proof_data: Vec<u8>,
    pub viewing_keys: Vec<ViewingKey>,
    /// Signatures of the transactions which carry one, in transaction order.
    pub signatures: Vec<Vec<u8>>,
    pub provider_signature: [u8; SIGNATURE_SIZE],
    pub provider: Address,
    pub fee_receiver: Address,
    pub fee_limit: u64,
}

impl RollupTransaction {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.proof_data.len()
                + self.viewing_keys.len() * VIEWING_KEY_SIZE
                + SIGNATURE_SIZE
                + 2 * ADDRESS_SIZE
                + DIGEST_SIZE
                + 12,
        );

        write_prefixed(&mut out, &self.proof_data);
        out.extend_from_slice(&(self.viewing_keys.len() as u32).to_be_bytes());
        for key in &self.viewing_keys {
            out.extend_from_slice(key.as_bytes());
        }
        out.extend_from_slice(&(self.signatures.len() as u32).to_be_bytes());
        for signature in &self.signatures {
            write_prefixed(&mut out, signature);
        }
        out.extend_from_slice(&self.provider_signature);
        out.extend_from_slice(self.provider.as_bytes());
        out.extend_from_slice(self.fee_receiver.as_bytes());
        out.extend_from_slice(&encode_u256(self.fee_limit));

        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConversionError> {
        let mut reader = ByteReader::new(bytes);

        let proof_len = reader.read_len()?;
        let proof_data = reader.read_slice(proof_len)?.to_vec();

        let key_count = reader.read_len()?;
        let viewing_keys = ViewingKey::split_all(
            reader.read_slice(key_count.saturating_mul(VIEWING_KEY_SIZE))?,
        )?;

        let sig_count = reader.read_len()?;
        let mut signatures = Vec::new();
        for _ in 0..sig_count {
            let len = reader.read_len()?;
            signatures.push(reader.read_slice(len)?.to_vec());
        }

        let provider_signature = reader.read_array()?;
        let provider = Address::new(reader.read_array()?);
        let fee_receiver = Address::new(reader.read_array()?);
        let fee_limit = decode_u256(&reader.read_array()?, "fee_limit")?;
        reader.finish()?;

        Ok(Self {
            proof_data,
            viewing_keys,
            signatures,
            provider_signature,
            provider,
            fee_receiver,
            fee_limit,
        })
    }
}
