//! Integration tests for batched keysign
//!
//! Every signature is verified against the digest at its own index, using
//! the public key the simulated engine derives for the requested path.

use crate::support::{Deployment, digest};
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use vault_tss_core::{Error, KeyType, MessageDigest, SigningResult, sign::derive_path_bytes};

const PATH: &str = "m/44'/60'/0'/0/0";

fn verify_ecdsa(public_key: &[u8], digest_hex: &str, result: &SigningResult) {
    let key = k256::ecdsa::VerifyingKey::from_sec1_bytes(public_key).unwrap();
    let signature = k256::ecdsa::Signature::from_slice(&result.to_bytes().unwrap()).unwrap();
    let digest = hex::decode(digest_hex).unwrap();
    key.verify_prehash(&digest, &signature).unwrap();
}

#[tokio::test]
async fn test_keysign_preserves_message_order() {
    let deployment = Deployment::random();
    let vault = deployment.keygen().await;
    let messages = vec![digest(0x10), digest(0x20), digest(0x30)];

    let results = deployment
        .device
        .keysign(&vault, &messages, PATH, KeyType::Ecdsa, "secret")
        .await
        .unwrap();
    deployment.server.wait_idle().await.unwrap();

    assert_eq!(results.len(), messages.len());
    let public_key = deployment.signing_key(&vault, KeyType::Ecdsa, &derive_path_bytes(PATH));
    for (message, result) in messages.iter().zip(&results) {
        assert_eq!(result.r.len(), 64);
        assert_eq!(result.s.len(), 64);
        assert_eq!(result.recovery_id.len(), 2);
        verify_ecdsa(&public_key, message, result);
    }

    // Swapping indices must break verification
    let key = k256::ecdsa::VerifyingKey::from_sec1_bytes(&public_key).unwrap();
    let first = k256::ecdsa::Signature::from_slice(&results[0].to_bytes().unwrap()).unwrap();
    assert!(
        key.verify_prehash(&hex::decode(&messages[1]).unwrap(), &first)
            .is_err()
    );
}

#[tokio::test]
async fn test_keysign_der_matches_scalars() {
    let deployment = Deployment::random();
    let vault = deployment.keygen().await;

    let results = deployment
        .device
        .keysign(&vault, &[digest(7)], "", KeyType::Ecdsa, "secret")
        .await
        .unwrap();
    let result = &results[0];

    let der = k256::ecdsa::Signature::from_der(&hex::decode(&result.der_signature).unwrap())
        .unwrap();
    assert_eq!(der.to_bytes().as_slice(), result.to_bytes().unwrap().as_slice());

    // No derivation path signs with the root key
    let root = hex::decode(&vault.public_key_ecdsa).unwrap();
    verify_ecdsa(&root, &digest(7), result);
}

#[tokio::test]
async fn test_eddsa_keysign() {
    let deployment = Deployment::random();
    let vault = deployment.keygen().await;
    let messages = vec![digest(1), digest(2)];

    let results = deployment
        .device
        .keysign(&vault, &messages, "", KeyType::Eddsa, "secret")
        .await
        .unwrap();

    let public_key: [u8; 32] = hex::decode(&vault.public_key_eddsa)
        .unwrap()
        .try_into()
        .unwrap();
    let key = ed25519_dalek::VerifyingKey::from_bytes(&public_key).unwrap();
    for (message, result) in messages.iter().zip(&results) {
        assert_eq!(result.recovery_id, SigningResult::DEFAULT_RECOVERY_ID);
        let signature = ed25519_dalek::Signature::from_bytes(&result.to_bytes().unwrap());
        key.verify_strict(&hex::decode(message).unwrap(), &signature)
            .unwrap();
    }
}

#[tokio::test]
async fn test_each_message_uses_its_own_relay_channel() {
    let deployment = Deployment::random();
    let vault = deployment.keygen().await;
    let messages = vec![digest(0xaa), digest(0xbb)];

    deployment
        .device
        .keysign(&vault, &messages, "", KeyType::Ecdsa, "secret")
        .await
        .unwrap();
    deployment.server.wait_idle().await.unwrap();

    // Skip the keygen session, which used the default channel
    let session = deployment
        .relay
        .session_ids()
        .into_iter()
        .find(|s| !deployment.relay.setup_tags(s).contains(&String::new()))
        .unwrap();
    let mut expected: Vec<String> = messages
        .iter()
        .map(|m| MessageDigest::from_hex(m).unwrap().message_id())
        .collect();
    expected.sort();
    assert_eq!(deployment.relay.setup_tags(&session), expected);
}

#[tokio::test]
async fn test_missing_key_share_fails_before_any_session() {
    let deployment = Deployment::random();
    let mut vault = deployment.keygen().await;
    vault.key_shares.retain(|s| s.pub_key != vault.public_key_eddsa);
    let sessions_before = deployment.relay.session_ids().len();

    let err = deployment
        .device
        .keysign(&vault, &[digest(1)], "", KeyType::Eddsa, "secret")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::KeyShareNotFound(ref key) if *key == vault.public_key_eddsa));
    assert_eq!(deployment.relay.session_ids().len(), sessions_before);
}

#[tokio::test]
async fn test_malformed_digest_is_rejected() {
    let deployment = Deployment::random();
    let vault = deployment.keygen().await;

    for bad in ["abcd".to_string(), "zz".repeat(32), String::new()] {
        let err = deployment
            .device
            .keysign(&vault, &[bad], "", KeyType::Ecdsa, "secret")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    let err = deployment
        .device
        .keysign(&vault, &[], "", KeyType::Ecdsa, "secret")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}
