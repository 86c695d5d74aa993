//! Property-based tests for custody-core using proptest
//!
//! These tests verify invariants that should hold for all valid inputs.

use k256::ecdsa::SigningKey;
use proptest::prelude::*;
use custody_core::{
    crypto::{address_of_signing_key, recover, sign_digest},
    Address, Asset, DepositPayload, TransferBatch, TransferLine,
};

// ============================================
// Arbitrary Implementations
// ============================================

fn arb_address() -> impl Strategy<Value = Address> {
    any::<[u8; 20]>().prop_map(Address::new)
}

fn arb_asset() -> impl Strategy<Value = Asset> {
    arb_address().prop_map(Asset::new)
}

fn arb_line() -> impl Strategy<Value = TransferLine> {
    (arb_address(), any::<u128>(), arb_asset())
        .prop_map(|(recipient, amount, asset)| TransferLine::new(recipient, amount, asset))
}

fn arb_batch() -> impl Strategy<Value = TransferBatch> {
    prop::collection::vec(arb_line(), 0..8).prop_map(TransferBatch::new)
}

fn arb_signing_key() -> impl Strategy<Value = SigningKey> {
    // Small non-zero scalars are always valid secp256k1 keys
    (1u64..u64::MAX).prop_map(|n| {
        let mut secret = [0u8; 32];
        secret[24..].copy_from_slice(&n.to_be_bytes());
        SigningKey::from_slice(&secret).unwrap()
    })
}

// ============================================
// Property Tests
// ============================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // ----------------------------------------
    // Batch Encoding Properties
    // ----------------------------------------

    #[test]
    fn batch_decode_inverts_encode(batch in arb_batch()) {
        let encoded = batch.encode();
        prop_assert_eq!(encoded.len(), 64 + 96 * batch.len());
        let decoded = TransferBatch::decode(&encoded).unwrap();
        prop_assert_eq!(decoded, batch);
    }

    #[test]
    fn swapping_distinct_lines_changes_digest(a in arb_line(), b in arb_line()) {
        prop_assume!(a != b);
        let forward = TransferBatch::new(vec![a, b]);
        let reversed = TransferBatch::new(vec![b, a]);
        prop_assert_ne!(forward.digest(), reversed.digest());
    }

    #[test]
    fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = TransferBatch::decode(&bytes);
    }

    // ----------------------------------------
    // Signature Properties
    // ----------------------------------------

    #[test]
    fn signature_recovers_signer(
        key in arb_signing_key(),
        asset in arb_asset(),
        amount in any::<u128>(),
    ) {
        let digest = DepositPayload::new(asset, amount).digest();
        let sig = sign_digest(&key, &digest).unwrap();
        prop_assert_eq!(recover(&digest, sig.as_bytes()).unwrap(), address_of_signing_key(&key));
    }

    #[test]
    fn signature_bound_to_amount(
        key in arb_signing_key(),
        asset in arb_asset(),
        amount in any::<u128>(),
        other in any::<u128>(),
    ) {
        prop_assume!(amount != other);
        let sig = sign_digest(&key, &DepositPayload::new(asset, amount).digest()).unwrap();
        let replayed = DepositPayload::new(asset, other).digest();

        match recover(&replayed, sig.as_bytes()) {
            Ok(address) => {
                prop_assert_ne!(address, address_of_signing_key(&key));
            }
            Err(e) => {
                prop_assert!(matches!(e, custody_core::Error::InvalidSignatureFormat(_)));
            }
        }
    }

    #[test]
    fn recover_never_panics(
        bytes in prop::collection::vec(any::<u8>(), 0..80),
        digest in any::<[u8; 32]>(),
    ) {
        let _ = recover(&custody_core::MessageHash::new(digest), &bytes);
    }
}
