//! Fuzz tests for transport framing and message ids

use proptest::prelude::*;
use vault_tss_core::{
    EncryptedTransport, EncryptionKey, MessageDigest,
    transport::{body_hash, frame},
};

proptest! {
    /// Flipping any bit of a sealed body is caught by the tag
    #[test]
    fn tampered_bodies_never_open(
        payload in prop::collection::vec(any::<u8>(), 0..512),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        use base64::Engine as _;

        let transport = EncryptedTransport::new(&EncryptionKey::generate()).unwrap();
        let sealed = transport.seal(&payload).unwrap();
        let mut raw = base64::engine::general_purpose::STANDARD.decode(&sealed).unwrap();
        let i = position.index(raw.len());
        raw[i] ^= 1 << bit;
        let tampered = base64::engine::general_purpose::STANDARD.encode(&raw);

        prop_assert!(transport.open(&tampered).is_err());
        prop_assert_eq!(transport.open(&sealed).unwrap(), payload);
    }

    /// The message hash depends only on the plaintext, not on the nonce
    #[test]
    fn body_hash_ignores_encryption(payload in prop::collection::vec(any::<u8>(), 0..256)) {
        let transport = EncryptedTransport::new(&EncryptionKey::generate()).unwrap();
        let framed = frame(&payload);

        let first = transport.encrypt(&framed).unwrap();
        let second = transport.encrypt(&framed).unwrap();
        prop_assert_ne!(first, second);
        prop_assert_eq!(body_hash(&framed).len(), 32);
    }

    /// Distinct digests get distinct relay tags
    #[test]
    fn message_ids_are_distinct(a in prop::array::uniform32(any::<u8>()), b in prop::array::uniform32(any::<u8>())) {
        let (da, db) = (MessageDigest::from_bytes(a), MessageDigest::from_bytes(b));
        prop_assert_eq!(da.message_id().len(), 32);
        prop_assert_eq!(da.message_id() == db.message_id(), a == b);
        prop_assert_eq!(MessageDigest::from_hex(da.as_hex()).unwrap(), da);
    }

    /// Anything but 32 bytes is refused
    #[test]
    fn digests_must_be_32_bytes(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let parsed = MessageDigest::from_hex(&hex::encode(&bytes));
        prop_assert_eq!(parsed.is_ok(), bytes.len() == 32);
    }
}
