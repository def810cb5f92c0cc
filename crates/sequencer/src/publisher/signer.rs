//! Provider signatures over published batches.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rollup_node_objects::{
    keccak256,
    rollup_tx::{encode_u256, SIGNATURE_SIZE},
    Address,
};

use crate::errors::SignerError;

/// Prefix of messages signed the way chain wallets sign them.
const SIGNED_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

/// Recovery ids are shifted by this offset in the last signature byte.
const RECOVERY_ID_OFFSET: u8 = 27;

/// The message a provider signs to publish a batch.
pub fn signing_message(
    public_inputs: &[u8],
    fee_receiver: &Address,
    fee_limit: u64,
    fee_distributor: &Address,
) -> Vec<u8> {
    [
        public_inputs,
        fee_receiver.as_bytes(),
        &encode_u256(fee_limit),
        fee_distributor.as_bytes(),
    ]
    .concat()
}

/// Digest of a message signed as a wallet message: the Keccak-256 of the message is prefixed
/// and hashed again.
pub fn signed_message_digest(message: &[u8]) -> [u8; 32] {
    keccak256([SIGNED_MESSAGE_PREFIX, &keccak256(message)].concat())
}

/// Recovers the address which produced a signature from [`ProviderSigner::sign`].
pub fn recover_address(
    message: &[u8],
    signature: &[u8; SIGNATURE_SIZE],
) -> Result<Address, SignerError> {
    let (rs, v) = signature.split_at(SIGNATURE_SIZE - 1);
    let signature = Signature::from_slice(rs)?;
    let recovery_id = RecoveryId::from_byte(v[0].saturating_sub(RECOVERY_ID_OFFSET))
        .ok_or_else(k256::ecdsa::Error::new)?;

    let key =
        VerifyingKey::recover_from_prehash(&signed_message_digest(message), &signature, recovery_id)?;

    Ok(address_of(&key))
}

fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let mut public_key = [0u8; 64];
    public_key.copy_from_slice(&point.as_bytes()[1..]);
    Address::from_public_key(&public_key)
}

// PROVIDER SIGNER
// ================================================================================================

/// The rollup provider's secp256k1 key.
#[derive(Clone)]
pub struct ProviderSigner {
    key: SigningKey,
    address: Address,
}

impl ProviderSigner {
    pub fn new(key: SigningKey) -> Self {
        let address = address_of(key.verifying_key());
        Self { key, address }
    }

    /// Parses a hex-encoded private key, with or without `0x` prefix.
    pub fn from_hex(key: &str) -> Result<Self, SignerError> {
        let bytes = hex::decode(key.strip_prefix("0x").unwrap_or(key))?;
        Ok(Self::new(SigningKey::from_slice(&bytes)?))
    }

    /// A signer with a freshly generated key.
    pub fn random() -> Self {
        Self::new(SigningKey::random(&mut rand::rngs::OsRng))
    }

    /// Address derived from the public key, used as provider and fee receiver.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Signs `message` as a wallet message, returning `r || s || v` with `v` in `{27, 28}`.
    pub fn sign(&self, message: &[u8]) -> Result<[u8; SIGNATURE_SIZE], SignerError> {
        let (signature, recovery_id) =
            self.key.sign_prehash_recoverable(&signed_message_digest(message))?;

        let mut out = [0u8; SIGNATURE_SIZE];
        out[..SIGNATURE_SIZE - 1].copy_from_slice(&signature.to_bytes());

        let v = recovery_id.to_byte();
        out[SIGNATURE_SIZE - 1] = if v <= 1 { v + RECOVERY_ID_OFFSET } else { v };

        Ok(out)
    }
}

impl std::fmt::Debug for ProviderSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSigner").field("address", &self.address).finish_non_exhaustive()
    }
}
