//! Signature recovery and hashing
//!
//! Signatures are produced off-ledger by key holders over the
//! personal-message form of a payload digest:
//!
//! ```text
//! keccak256("\x19Ethereum Signed Message:\n32" || keccak256(payload))
//! ```
//!
//! The prefix keeps a signature made for this ledger from being replayed
//! as a raw transaction hash or in any other signing context.

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};

use crate::error::{Error, Result};
use crate::types::{Address, MessageHash, RecoverableSignature};
use crate::{ADDRESS_LEN, SIGNATURE_LEN};

/// Domain separation prefix for a 32-byte personal message
pub const PERSONAL_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

/// Hash data using Keccak-256
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Hash multiple pieces of data using Keccak-256
pub fn keccak256_multi(data: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for d in data {
        hasher.update(d);
    }
    hasher.finalize().into()
}

/// Wrap a payload digest with the personal-message prefix
pub fn personal_message_hash(digest: &MessageHash) -> MessageHash {
    MessageHash::new(keccak256_multi(&[
        PERSONAL_MESSAGE_PREFIX,
        digest.as_bytes(),
    ]))
}

/// Address of a public key: last 20 bytes of keccak256 over the
/// uncompressed point without its 0x04 tag
pub fn address_of(key: &VerifyingKey) -> Address {
    let encoded = key.to_encoded_point(false);
    let hash = keccak256(&encoded.as_bytes()[1..]);
    let mut bytes = [0u8; ADDRESS_LEN];
    bytes.copy_from_slice(&hash[32 - ADDRESS_LEN..]);
    Address::new(bytes)
}

/// Address controlled by a signing key
pub fn address_of_signing_key(key: &SigningKey) -> Address {
    address_of(key.verifying_key())
}

/// Recover the address that signed `digest`.
///
/// Does not compare the result against anything; callers decide whether
/// the recovered address is the one they expected.
pub fn recover(digest: &MessageHash, signature: &[u8]) -> Result<Address> {
    if signature.len() != SIGNATURE_LEN {
        return Err(Error::InvalidSignatureFormat(format!(
            "expected {} bytes, got {}",
            SIGNATURE_LEN,
            signature.len()
        )));
    }

    let recovery_id = parse_recovery_id(signature[64])?;

    // Rejects zero or out-of-range r and s
    let sig = EcdsaSignature::from_slice(&signature[..64])
        .map_err(|e| Error::InvalidSignatureFormat(format!("bad r/s: {}", e)))?;

    let prehash = personal_message_hash(digest);
    let key = VerifyingKey::recover_from_prehash(prehash.as_bytes(), &sig, recovery_id)
        .map_err(|e| Error::InvalidSignatureFormat(format!("key recovery failed: {}", e)))?;

    Ok(address_of(&key))
}

/// Accepts both raw (0/1) and legacy (27/28) recovery bytes
fn parse_recovery_id(v: u8) -> Result<RecoveryId> {
    let byte = match v {
        0 | 1 => v,
        27 | 28 => v - 27,
        other => {
            return Err(Error::InvalidSignatureFormat(format!(
                "invalid recovery id: {}",
                other
            )))
        }
    };
    RecoveryId::from_byte(byte)
        .ok_or_else(|| Error::InvalidSignatureFormat(format!("invalid recovery id: {}", v)))
}

/// Sign a payload digest the way a wallet's personal-sign does.
///
/// The ledger never holds keys; this exists for key holders and tests.
pub fn sign_digest(key: &SigningKey, digest: &MessageHash) -> Result<RecoverableSignature> {
    let prehash = personal_message_hash(digest);
    let (sig, recovery_id) = key
        .sign_prehash_recoverable(prehash.as_bytes())
        .map_err(|e| Error::Crypto(format!("signing failed: {}", e)))?;

    let mut bytes = [0u8; SIGNATURE_LEN];
    bytes[..64].copy_from_slice(&sig.to_bytes());
    bytes[64] = 27 + recovery_id.to_byte();
    Ok(RecoverableSignature::new(bytes))
}
